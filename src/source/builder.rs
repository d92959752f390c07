use std::sync::Arc;

use super::lifecycle::Ntv2Source;
use crate::anc::AncillaryDecoder;
use crate::clock::{ClockSource, SystemClock};
use crate::config::SourceSettings;
use crate::device::DeviceManager;
use crate::error::{Ntv2SrcError, Result};
use crate::events::EventBus;

/// Builder for a capture source
pub struct Ntv2SourceBuilder {
    settings: Option<SourceSettings>,
    manager: Option<Arc<dyn DeviceManager>>,
    clock: Option<Arc<dyn ClockSource>>,
    events: Option<Arc<EventBus>>,
    decoder: Option<Arc<dyn AncillaryDecoder>>,
}

impl Ntv2SourceBuilder {
    pub fn new() -> Self {
        Self {
            settings: None,
            manager: None,
            clock: None,
            events: None,
            decoder: None,
        }
    }

    pub fn settings(mut self, settings: SourceSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn device_manager(mut self, manager: Arc<dyn DeviceManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Pipeline clock; the system monotonic clock when not set.
    pub fn clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Decoder for ancillary data; frames carry no packets without one.
    pub fn decoder(mut self, decoder: Arc<dyn AncillaryDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn build(self) -> Result<Ntv2Source> {
        let manager = self.manager.ok_or_else(|| {
            Ntv2SrcError::invalid_setting("device_manager", "a device manager must be specified")
        })?;
        let settings = self.settings.unwrap_or_default();
        settings.validate()?;

        Ok(Ntv2Source::from_parts(
            settings,
            manager,
            self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
            self.events.unwrap_or_default(),
            self.decoder,
        ))
    }
}

impl Default for Ntv2SourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
