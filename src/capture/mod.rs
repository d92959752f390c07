//! Background capture loop feeding the frame queue.

pub mod accounting;
mod pools;
mod stats;
mod steady;
pub mod worker;

pub use accounting::{DroppedFrameAccounting, DroppedRange, SignalMonitor};
pub use pools::{FramePools, ANC_BUFFER_SIZE, AUDIO_BUFFER_SIZE};
pub use stats::{CaptureStats, CaptureStatsSnapshot};
pub use worker::{hardware_frame_count, CaptureContext, CaptureThread, CaptureWorker};
