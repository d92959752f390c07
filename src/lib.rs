pub mod anc;
pub mod buffer;
pub mod capture;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod format;
pub mod frame;
pub mod queue;
pub mod resolver;
pub mod source;

pub use anc::{AncPacket, AncillaryDecoder, PacketDecoder};
pub use buffer::{BufferPool, PoolError, PooledBuffer};
pub use capture::{CaptureStats, CaptureStatsSnapshot};
pub use clock::{ClockSource, ClockTime, SystemClock};
pub use config::{Ntv2SrcConfig, SourceSettings};
pub use device::{CaptureDevice, DeviceError, DeviceManager};
pub use error::{CapabilityField, Ntv2SrcError, Result};
pub use events::{EventBus, QosOrigin, SignalLossReason, SrcEvent};
pub use format::{supported_formats, FormatInfo, VideoFormat};
pub use frame::{CapturedFrame, Timecode};
pub use resolver::DeviceConfig;
pub use source::{FlowError, Latency, LifecycleState, Ntv2Source, Ntv2SourceBuilder};
