use tracing::debug;

use crate::buffer::BufferPool;
use crate::resolver::DeviceConfig;

/// Size of one audio buffer.
pub const AUDIO_BUFFER_SIZE: usize = 401 * 1024;
/// Size of one ancillary side-channel buffer.
pub const ANC_BUFFER_SIZE: usize = 8 * 1024;

/// The buffer pools of one capture session.
#[derive(Debug, Clone)]
pub struct FramePools {
    pub video: BufferPool,
    pub audio: BufferPool,
    /// Only present when ancillary data is captured through the side channel
    pub anc: Option<BufferPool>,
}

impl FramePools {
    pub fn new(config: &DeviceConfig, queue_size: usize) -> Self {
        let video = BufferPool::new("video", config.video_buffer_size(), 2 * queue_size);
        let audio = BufferPool::new("audio", AUDIO_BUFFER_SIZE, 2 * queue_size);
        let anc = config.captures_side_channel_anc().then(|| {
            // One buffer per field, for as many frames as the video pool holds
            let fields = if config.info.interlaced { 2 } else { 1 };
            BufferPool::new("anc", ANC_BUFFER_SIZE, fields * 2 * queue_size)
        });

        debug!(
            "Buffer pools: video {}x{} bytes, audio {}x{} bytes, anc {}",
            video.max_buffers(),
            video.buffer_size(),
            audio.max_buffers(),
            audio.buffer_size(),
            anc.as_ref()
                .map_or("off".to_string(), |p| format!("{}x{} bytes", p.max_buffers(), p.buffer_size()))
        );

        Self { video, audio, anc }
    }

    pub fn set_active(&self, active: bool) {
        self.video.set_active(active);
        self.audio.set_active(active);
        if let Some(anc) = &self.anc {
            anc.set_active(active);
        }
    }
}
