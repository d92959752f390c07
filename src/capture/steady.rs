//! Steady-state capture iteration.

use parking_lot::MutexGuard;
use tracing::{debug, trace, warn};

use super::accounting::{DroppedFrameAccounting, SignalMonitor};
use super::stats::CaptureStats;
use super::worker::CaptureWorker;
use crate::buffer::PooledBuffer;
use crate::clock::compute_timestamp;
use crate::device::{DeviceError, TransferRequest, TransferResult};
use crate::error::Result;
use crate::events::{QosOrigin, SignalLossReason, SrcEvent};
use crate::frame::FrameItem;
use crate::queue::ControlState;

type StateGuard<'a> = MutexGuard<'a, ControlState>;

/// Buffers acquired for one transfer.
struct FrameBuffers {
    video: PooledBuffer,
    audio: PooledBuffer,
    anc_field1: Option<PooledBuffer>,
    anc_field2: Option<PooledBuffer>,
}

impl CaptureWorker {
    /// Capture frames until `playing` is cleared or shutdown is requested.
    ///
    /// Entered and left with the queue lock held. Only the transfer and the
    /// vertical interrupt wait run with the lock released.
    pub(super) fn steady_state(&self, state: &mut StateGuard<'_>) -> Result<()> {
        let mut accounting = DroppedFrameAccounting::new();
        let mut signal = SignalMonitor::new();

        while state.playing && !state.shutdown {
            if !self.check_signal(state, &mut signal, &mut accounting) {
                continue;
            }

            let status = self.ctx.device.autocirculate_status(self.ctx.config.channel);
            if let Some(range) = accounting.observe(
                status.frames_processed,
                status.frames_dropped,
                &self.ctx.config.info,
            ) {
                warn!(
                    "Dropped {} frames on the device (processed {})",
                    range.frames, status.frames_processed
                );
                CaptureStats::add(&self.ctx.stats.hardware_drops, range.frames);
                self.ctx.events.publish(SrcEvent::Qos {
                    origin: QosOrigin::HardwareDrop,
                    timestamp: range.timestamp,
                    duration: range.duration,
                });
            }

            if !status.running || status.buffer_level <= 1 {
                trace!(
                    "Waiting for frames (running {}, buffer level {})",
                    status.running,
                    status.buffer_level
                );
                self.wait_vertical_interrupt(state);
                continue;
            }

            let mut buffers = self.acquire_buffers()?;

            let transferred = MutexGuard::unlocked(state, || self.transfer(&mut buffers));
            let result = match transferred {
                Ok(result) => result,
                Err(e) => {
                    warn!("Failed to transfer frame: {}", e);
                    CaptureStats::increment(&self.ctx.stats.transfer_failures);
                    continue;
                }
            };

            let capture_time = compute_timestamp(
                self.ctx.clock.pipeline_time(),
                self.ctx.clock.wall_time_us(),
                result.frame_time,
                state.base_time,
            );
            let item = self.build_item(buffers, &result, capture_time);

            if state.flushing {
                trace!("Flushing, releasing frame at {}", capture_time);
                CaptureStats::increment(&self.ctx.stats.flushed_frames);
                continue;
            }

            trace!("Queueing frame at {}", capture_time);
            if let Some(dropped) = state.queue.push(item) {
                warn!("Element queue overrun, dropping old frame");
                CaptureStats::increment(&self.ctx.stats.overflow_drops);
                self.ctx.events.publish(SrcEvent::Qos {
                    origin: QosOrigin::QueueOverflow,
                    timestamp: dropped.timestamp,
                    duration: dropped.duration,
                });
            }
            CaptureStats::increment(&self.ctx.stats.frames_captured);
            self.ctx.queue.notify();
        }

        Ok(())
    }

    /// True when the configured signal is present. Otherwise waits one
    /// vertical interrupt and reports the loss on its first occurrence.
    fn check_signal(
        &self,
        state: &mut StateGuard<'_>,
        signal: &mut SignalMonitor,
        accounting: &mut DroppedFrameAccounting,
    ) -> bool {
        let config = &self.ctx.config;
        let reason = match self.ctx.device.input_video_format(config.input_source) {
            None => SignalLossReason::NoSignal,
            Some(detected) if detected != config.hw_format => {
                SignalLossReason::DifferentFormat {
                    detected: detected.to_string(),
                }
            }
            Some(_) => {
                if signal.found() {
                    self.ctx.events.publish(SrcEvent::SignalRecovered);
                }
                return true;
            }
        };

        debug!("No usable signal on {}: {:?}", config.input_source, reason);
        if signal.lost() {
            CaptureStats::increment(&self.ctx.stats.signal_losses);
            self.ctx.events.publish(SrcEvent::SignalLost { reason });
        }
        accounting.reset();
        self.wait_vertical_interrupt(state);
        false
    }

    fn wait_vertical_interrupt(&self, state: &mut StateGuard<'_>) {
        let channel = self.ctx.config.channel;
        MutexGuard::unlocked(state, || {
            self.ctx.device.wait_for_input_vertical_interrupt(channel)
        });
    }

    fn acquire_buffers(&self) -> Result<FrameBuffers> {
        let pools = &self.ctx.pools;
        let video = pools.video.acquire()?;
        let audio = pools.audio.acquire()?;

        let (anc_field1, anc_field2) = match &pools.anc {
            Some(pool) => {
                let field1 = pool.acquire()?;
                let field2 = if self.ctx.config.info.interlaced {
                    Some(pool.acquire()?)
                } else {
                    None
                };
                (Some(field1), field2)
            }
            None => (None, None),
        };

        Ok(FrameBuffers {
            video,
            audio,
            anc_field1,
            anc_field2,
        })
    }

    fn transfer(&self, buffers: &mut FrameBuffers) -> std::result::Result<TransferResult, DeviceError> {
        let mut request = TransferRequest {
            video: buffers.video.storage_mut(),
            audio: buffers.audio.storage_mut(),
            anc_field1: buffers.anc_field1.as_mut().map(|b| b.storage_mut()),
            anc_field2: buffers.anc_field2.as_mut().map(|b| b.storage_mut()),
        };
        self.ctx
            .device
            .autocirculate_transfer(self.ctx.config.channel, &mut request)
    }

    fn build_item(&self, buffers: FrameBuffers, result: &TransferResult, capture_time: u64) -> FrameItem {
        let FrameBuffers {
            mut video,
            mut audio,
            mut anc_field1,
            mut anc_field2,
        } = buffers;

        video.set_size(result.video_bytes);
        audio.set_size(result.audio_bytes);
        if let Some(anc) = anc_field1.as_mut() {
            anc.set_size(result.anc_field1_bytes);
        }
        if let Some(anc) = anc_field2.as_mut() {
            anc.set_size(result.anc_field2_bytes);
        }

        FrameItem {
            capture_time,
            video,
            audio,
            anc_field1,
            anc_field2,
            timecode: result.timecode(self.ctx.config.timecode_index),
        }
    }
}
