//! Capture thread: outer Idle/Active loop, engage and disengage.

use parking_lot::MutexGuard;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use super::pools::FramePools;
use super::stats::CaptureStats;
use crate::clock::ClockSource;
use crate::device::{setup_lock, CaptureDevice, CirculateInit};
use crate::error::{Ntv2SrcError, Result};
use crate::events::{EventBus, SrcEvent};
use crate::queue::{ControlState, SharedQueue};
use crate::resolver::DeviceConfig;

/// Everything the capture thread needs for one session.
pub struct CaptureContext {
    pub device: Arc<dyn CaptureDevice>,
    pub config: Arc<DeviceConfig>,
    pub queue: Arc<SharedQueue>,
    pub pools: FramePools,
    pub clock: Arc<dyn ClockSource>,
    pub events: Arc<EventBus>,
    pub stats: Arc<CaptureStats>,
    pub queue_size: usize,
    pub cpu_core: Option<usize>,
}

/// Frames the transfer engine cycles through on the device.
pub fn hardware_frame_count(queue_size: usize) -> u32 {
    (queue_size / 2).max(1) as u32
}

pub struct CaptureWorker {
    pub(super) ctx: CaptureContext,
}

impl CaptureWorker {
    pub fn new(ctx: CaptureContext) -> Self {
        Self { ctx }
    }

    pub fn run(self) {
        if let Some(core) = self.ctx.cpu_core {
            match pin_current_thread(core) {
                Ok(()) => debug!("Capture thread pinned to CPU core {}", core),
                Err(e) => error!("Failed to pin capture thread to CPU core {}: {}", core, e),
            }
        }

        let mut state = self.ctx.queue.lock();
        loop {
            while !state.playing && !state.shutdown {
                debug!("Waiting for playing or shutdown");
                self.ctx.queue.wait(&mut state);
            }
            if state.shutdown {
                debug!("Shutting down");
                break;
            }

            debug!("Starting capture on {}", self.ctx.config.channel);
            let outcome = match MutexGuard::unlocked(&mut state, || self.engage()) {
                Ok(()) => {
                    CaptureStats::increment(&self.ctx.stats.sessions_started);
                    self.steady_state(&mut state)
                }
                Err(e) => Err(e),
            };
            MutexGuard::unlocked(&mut state, || self.disengage());

            if let Err(e) = outcome {
                self.park_after_error(&mut state, &e);
            } else {
                debug!("Stopped capture on {}", self.ctx.config.channel);
            }
        }

        drop(state);
        debug!("Capture thread for {} exiting", self.ctx.config.channel);
    }

    /// Report the error that ended the session and wait until play is
    /// toggled or shutdown.
    fn park_after_error(&self, state: &mut MutexGuard<'_, ControlState>, err: &Ntv2SrcError) {
        if err.is_fatal() {
            CaptureStats::increment(&self.ctx.stats.fatal_errors);
        } else {
            warn!(
                "Capture on {} stopped by a recoverable error: {}",
                self.ctx.config.channel, err
            );
        }
        self.ctx.events.publish(SrcEvent::StreamError {
            message: err.to_string(),
        });
        let generation = state.play_generation;
        while state.playing && state.play_generation == generation && !state.shutdown {
            self.ctx.queue.wait(state);
        }
    }

    fn engage(&self) -> Result<()> {
        let device = &*self.ctx.device;
        let config = &*self.ctx.config;
        let channel = config.channel;

        device
            .enable_channel(channel)
            .map_err(|e| Ntv2SrcError::engagement("channel", e.message.as_str()))?;

        let _setup = setup_lock();

        device.autocirculate_stop(channel);
        device.enable_input_interrupt(channel);
        device.subscribe_input_vertical_event(channel);

        let init = CirculateInit {
            frame_count: hardware_frame_count(self.ctx.queue_size),
            audio_system: config.audio_system,
            with_rp188: true,
            with_anc: config.captures_side_channel_anc(),
        };
        device
            .autocirculate_init_for_input(channel, init)
            .map_err(|e| Ntv2SrcError::engagement("transfer engine", e.message.as_str()))?;

        device.autocirculate_start(channel);
        info!(
            "Capture engaged on {} with {} device frames",
            channel, init.frame_count
        );
        Ok(())
    }

    fn disengage(&self) {
        let device = &*self.ctx.device;
        let channel = self.ctx.config.channel;

        let _setup = setup_lock();
        device.autocirculate_stop(channel);
        device.unsubscribe_input_vertical_event(channel);
        device.disable_input_interrupt(channel);
        debug!("Capture disengaged on {}", channel);
    }
}

/// Join handle of a running capture thread.
pub struct CaptureThread {
    handle: Option<JoinHandle<()>>,
}

impl CaptureThread {
    pub fn spawn(ctx: CaptureContext) -> Result<Self> {
        let name = format!("ntv2src-capture-{}", ctx.config.channel.0 + 1);
        let worker = CaptureWorker::new(ctx);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || worker.run())?;
        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Wait for the thread to exit; it must have been told to shut down.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Capture thread panicked");
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn pin_current_thread(core: usize) -> io::Result<()> {
    if core >= 8 * std::mem::size_of::<libc::cpu_set_t>() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("CPU core {} outside the affinity mask", core),
        ));
    }

    // SAFETY: cpu_set_t is plain data and is fully initialized before use
    let rc = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn pin_current_thread(_core: usize) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "CPU affinity is only supported on Linux",
    ))
}
