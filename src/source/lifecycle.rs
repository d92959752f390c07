//! Lifecycle state machine of a capture source.
//!
//! The control thread drives a source through Closed, Opened, Configured and
//! Playing. Only this module spawns or joins the capture thread; play and
//! pause just flip the `playing` flag the thread waits on.

use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::consumer::Latency;
use super::LifecycleState;
use crate::anc::AncillaryDecoder;
use crate::capture::{
    CaptureContext, CaptureStats, CaptureStatsSnapshot, CaptureThread, FramePools,
};
use crate::clock::ClockSource;
use crate::config::SourceSettings;
use crate::device::{CaptureDevice, DeviceManager};
use crate::error::{Ntv2SrcError, Result};
use crate::events::{EventBus, SrcEvent};
use crate::queue::SharedQueue;
use crate::resolver::{resolve_and_apply, DeviceConfig};

/// Resources that exist between start and stop.
pub(super) struct Session {
    pub(super) config: Arc<DeviceConfig>,
    pub(super) queue_size: usize,
    pools: FramePools,
    thread: CaptureThread,
}

pub(super) struct SourceInner {
    pub(super) state: LifecycleState,
    settings: SourceSettings,
    device: Option<Arc<dyn CaptureDevice>>,
    pub(super) session: Option<Session>,
}

/// Live capture source for one channel of a capture device.
pub struct Ntv2Source {
    pub(super) inner: Mutex<SourceInner>,
    pub(super) queue: Arc<SharedQueue>,
    manager: Arc<dyn DeviceManager>,
    clock: Arc<dyn ClockSource>,
    events: Arc<EventBus>,
    pub(super) stats: Arc<CaptureStats>,
    pub(super) decoder: Option<Arc<dyn AncillaryDecoder>>,
}

impl Ntv2Source {
    pub(super) fn from_parts(
        settings: SourceSettings,
        manager: Arc<dyn DeviceManager>,
        clock: Arc<dyn ClockSource>,
        events: Arc<EventBus>,
        decoder: Option<Arc<dyn AncillaryDecoder>>,
    ) -> Self {
        let queue = SharedQueue::new(
            settings.queue_size as usize,
            settings.video_format.info().frame_duration(),
        );

        Self {
            inner: Mutex::new(SourceInner {
                state: LifecycleState::Closed,
                settings,
                device: None,
                session: None,
            }),
            queue: Arc::new(queue),
            manager,
            clock,
            events,
            stats: Arc::new(CaptureStats::new()),
            decoder,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lock().state
    }

    pub fn settings(&self) -> SourceSettings {
        self.inner.lock().settings.clone()
    }

    /// Replace the settings. Only allowed while Closed or Opened.
    pub fn update_settings(&self, settings: SourceSettings) -> Result<()> {
        settings.validate()?;

        let mut inner = self.inner.lock();
        match inner.state {
            LifecycleState::Closed | LifecycleState::Opened => {
                inner.settings = settings;
                Ok(())
            }
            state => Err(Ntv2SrcError::invalid_state(format!(
                "settings cannot change while {}",
                state
            ))),
        }
    }

    /// Configuration applied by the last successful start.
    pub fn device_config(&self) -> Result<Arc<DeviceConfig>> {
        self.inner
            .lock()
            .session
            .as_ref()
            .map(|session| Arc::clone(&session.config))
            .ok_or(Ntv2SrcError::NotConfigured)
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SrcEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> CaptureStatsSnapshot {
        self.stats.snapshot()
    }

    /// Closed → Opened: acquire the device handle.
    pub fn open(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        expect_state(&inner, "open", &[LifecycleState::Closed])?;

        let device = self.manager.open(&inner.settings.device_identifier)?;
        if !device.is_ready() {
            return Err(Ntv2SrcError::device(format!(
                "{} is not ready",
                device.display_name()
            )));
        }
        device.set_multi_format_mode(true);

        info!(
            "Opened {} (serial {})",
            device.display_name(),
            device.serial_number().as_deref().unwrap_or("unknown")
        );
        inner.device = Some(device);
        self.transition(&mut inner, LifecycleState::Opened);
        Ok(())
    }

    /// Opened → Configured: apply the configuration, allocate the pools and
    /// spawn the idle capture thread.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        expect_state(&inner, "start", &[LifecycleState::Opened])?;

        let device = inner
            .device
            .clone()
            .ok_or_else(|| Ntv2SrcError::invalid_state("no device handle while opened"))?;
        let queue_size = inner.settings.queue_size as usize;
        let config = Arc::new(resolve_and_apply(&*device, &inner.settings)?);

        let pools = FramePools::new(&config, queue_size);
        pools.set_active(true);
        self.queue
            .reset_session(queue_size, config.info.frame_duration());

        let context = CaptureContext {
            device,
            config: Arc::clone(&config),
            queue: Arc::clone(&self.queue),
            pools: pools.clone(),
            clock: Arc::clone(&self.clock),
            events: Arc::clone(&self.events),
            stats: Arc::clone(&self.stats),
            queue_size,
            cpu_core: inner.settings.capture_cpu_core,
        };
        let thread = match CaptureThread::spawn(context) {
            Ok(thread) => thread,
            Err(e) => {
                pools.set_active(false);
                return Err(e);
            }
        };

        debug!(
            "Capture thread started on {} with a queue of {} frames",
            config.channel, queue_size
        );
        let latency = Latency::new(&config.info, queue_size);
        inner.session = Some(Session {
            config,
            queue_size,
            pools,
            thread,
        });
        self.transition(&mut inner, LifecycleState::Configured);

        self.events.publish(SrcEvent::LatencyChanged {
            min: latency.min,
            max: latency.max,
        });
        Ok(())
    }

    /// Configured → Playing.
    pub fn play(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        expect_state(&inner, "play", &[LifecycleState::Configured])?;

        self.queue.set_playing(true, self.clock.pipeline_time());
        self.transition(&mut inner, LifecycleState::Playing);
        Ok(())
    }

    /// Playing → Configured. The capture thread disengages and idles.
    pub fn pause(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        expect_state(&inner, "pause", &[LifecycleState::Playing])?;

        self.queue.set_playing(false, self.clock.pipeline_time());
        self.transition(&mut inner, LifecycleState::Configured);
        Ok(())
    }

    /// Configured or Playing → Opened: join the capture thread and release
    /// everything the session allocated.
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        expect_state(
            &inner,
            "stop",
            &[LifecycleState::Configured, LifecycleState::Playing],
        )?;

        self.teardown(&mut inner);
        self.transition(&mut inner, LifecycleState::Opened);
        Ok(())
    }

    /// Opened → Closed: drop the device handle.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        expect_state(&inner, "close", &[LifecycleState::Opened])?;

        inner.device = None;
        self.transition(&mut inner, LifecycleState::Closed);
        Ok(())
    }

    /// Walk one transition at a time until `target` is reached.
    pub fn set_state(&self, target: LifecycleState) -> Result<()> {
        use LifecycleState::*;

        loop {
            let current = self.state();
            let next = match current.towards(target) {
                Some(next) => next,
                None => return Ok(()),
            };

            match (current, next) {
                (Closed, Opened) => self.open()?,
                (Opened, Configured) => self.start()?,
                (Configured, Playing) => self.play()?,
                (Playing, Configured) => self.pause()?,
                (Configured, Opened) => self.stop()?,
                (Opened, Closed) => self.close()?,
                (from, to) => {
                    return Err(Ntv2SrcError::invalid_state(format!(
                        "no transition from {} to {}",
                        from, to
                    )))
                }
            }
        }
    }

    /// Start flushing: blocked consumers return immediately and the capture
    /// thread stops queueing.
    pub fn unlock(&self) {
        debug!("Unlock");
        self.queue.flush_begin();
    }

    pub fn unlock_stop(&self) {
        debug!("Unlock stop");
        self.queue.flush_end();
    }

    fn teardown(&self, inner: &mut SourceInner) {
        let session = match inner.session.take() {
            Some(session) => session,
            None => return,
        };

        self.queue.request_shutdown();
        session.thread.join();
        let released = self.queue.drain_and_release();
        session.pools.set_active(false);
        debug!(
            "Stopped capture session on {}, released {} queued frames",
            session.config.channel, released
        );
    }

    fn transition(&self, inner: &mut SourceInner, to: LifecycleState) {
        let from = std::mem::replace(&mut inner.state, to);
        self.events.publish(SrcEvent::StateChanged { from, to });
    }
}

fn expect_state(
    inner: &MutexGuard<'_, SourceInner>,
    operation: &str,
    allowed: &[LifecycleState],
) -> Result<()> {
    if allowed.contains(&inner.state) {
        Ok(())
    } else {
        Err(Ntv2SrcError::invalid_state(format!(
            "cannot {} while {}",
            operation, inner.state
        )))
    }
}

impl Drop for Ntv2Source {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        self.teardown(&mut inner);
        inner.device = None;
        inner.state = LifecycleState::Closed;
        drop(inner);

        debug_assert!(self.queue.is_empty(), "frame queue must be empty on drop");
    }
}
