//! Consumer side: pulling frames and reporting latency.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

use super::lifecycle::Ntv2Source;
use crate::anc::{find_captions, AncPacket};
use crate::capture::CaptureStats;
use crate::clock::ClockTime;
use crate::device::VancMode;
use crate::format::FormatInfo;
use crate::frame::{AudioPayload, CapturedFrame, FrameItem, Timecode};
use crate::queue::Flushing;
use crate::resolver::{DeviceConfig, AUDIO_SAMPLE_RATE};

/// Why no frame was returned.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowError {
    #[error("source is flushing")]
    Flushing,
    #[error("source has no applied configuration")]
    NotNegotiated,
}

impl From<Flushing> for FlowError {
    fn from(_: Flushing) -> Self {
        FlowError::Flushing
    }
}

/// Latency the source adds, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Latency {
    pub min: ClockTime,
    pub max: ClockTime,
}

impl Latency {
    /// Three frames minimum, a full queue of those maximum.
    pub fn new(info: &FormatInfo, queue_size: usize) -> Self {
        let min = info.min_latency();
        Self {
            min,
            max: min.saturating_mul(queue_size as u64),
        }
    }
}

impl Ntv2Source {
    /// Block until the next captured frame is available.
    ///
    /// Returns [`FlowError::Flushing`] as soon as the source is unlocked or
    /// stopped, and [`FlowError::NotNegotiated`] outside a capture session.
    pub fn next_frame(&self) -> Result<CapturedFrame, FlowError> {
        let config = self
            .inner
            .lock()
            .session
            .as_ref()
            .map(|session| Arc::clone(&session.config))
            .ok_or(FlowError::NotNegotiated)?;

        let item = self.queue.pop_blocking()?;
        let frame = self.assemble(item, &config);
        CaptureStats::increment(&self.stats.frames_delivered);
        trace!("Delivering frame at {}", frame.pts);
        Ok(frame)
    }

    /// Latency of the current session, `None` before start.
    pub fn latency(&self) -> Option<Latency> {
        let inner = self.inner.lock();
        inner
            .session
            .as_ref()
            .map(|session| Latency::new(&session.config.info, session.queue_size))
    }

    fn assemble(&self, item: FrameItem, config: &DeviceConfig) -> CapturedFrame {
        let FrameItem {
            capture_time,
            mut video,
            audio,
            anc_field1,
            anc_field2,
            timecode,
        } = item;

        let mut ancillary: Vec<AncPacket> = Vec::new();
        if config.vanc_mode == VancMode::Tall {
            let layout = config.raster_layout();
            if let Some(decoder) = &self.decoder {
                let vanc_size = layout.vanc_size().min(video.len());
                ancillary = decoder.decode_vanc(&video[..vanc_size], &layout);
            }
            let (offset, size) = layout.visible_region();
            video.set_region(offset, size);
        } else if let (Some(decoder), Some(field1)) = (&self.decoder, &anc_field1) {
            ancillary = decoder.decode_side_channel(field1, anc_field2.as_deref());
        }

        CapturedFrame {
            pts: capture_time,
            duration: config.info.frame_duration(),
            info: config.info,
            video,
            audio: AudioPayload {
                buffer: audio,
                channels: config.audio_channels,
                sample_rate: AUDIO_SAMPLE_RATE,
            },
            timecode: timecode.and_then(|raw| Timecode::from_raw(raw, &config.info)),
            captions: find_captions(&ancillary),
            ancillary,
        }
    }
}
