//! Hardware abstraction of a capture card.
//!
//! Every register write and transfer call the capture path needs goes
//! through [`CaptureDevice`]. Real vendor bindings implement it outside this
//! crate; [`sim::SimulatedDevice`] implements it in memory.

pub mod routing;
pub mod types;

#[cfg(feature = "simulator")]
pub mod sim;

pub use routing::{setup_lock, SignalRouter};
pub use types::*;

use std::sync::Arc;
use thiserror::Error;

use crate::format::HwVideoFormat;
use crate::frame::RawTimecode;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DeviceError {
    pub message: String,
}

impl DeviceError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Host buffers handed to one frame transfer.
pub struct TransferRequest<'a> {
    pub video: &'a mut [u8],
    pub audio: &'a mut [u8],
    pub anc_field1: Option<&'a mut [u8]>,
    pub anc_field2: Option<&'a mut [u8]>,
}

/// Outcome of a successful frame transfer.
#[derive(Debug, Clone, Default)]
pub struct TransferResult {
    pub video_bytes: usize,
    pub audio_bytes: usize,
    pub anc_field1_bytes: usize,
    pub anc_field2_bytes: usize,
    /// Hardware capture time of the frame in 100 ns ticks of the wall clock
    pub frame_time: i64,
    pub timecodes: Vec<(TimecodeIndex, RawTimecode)>,
}

impl TransferResult {
    pub fn timecode(&self, index: TimecodeIndex) -> Option<RawTimecode> {
        self.timecodes
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, tc)| *tc)
    }
}

/// Handle to one opened capture device.
pub trait CaptureDevice: Send + Sync {
    fn display_name(&self) -> String;
    fn serial_number(&self) -> Option<String>;
    fn is_ready(&self) -> bool;
    fn capabilities(&self) -> &DeviceCapabilities;

    fn set_multi_format_mode(&self, enable: bool);
    fn set_capture_mode(&self, channel: Channel);
    fn set_video_format(&self, channel: Channel, format: HwVideoFormat);
    fn set_frame_buffer_format(&self, channel: Channel, format: PixelFormat);
    fn set_sdi_transmit_enable(&self, channel: Channel, enable: bool);
    fn set_vanc_mode(&self, channel: Channel, mode: VancMode);
    fn configure_audio(&self, system: AudioSystem, setup: AudioSetup);
    fn set_reference(&self, reference: ReferenceSource);

    fn routing(&self) -> SignalRouter;
    fn apply_routing(&self, router: &SignalRouter);

    /// Detected signal format on a connector, `None` without a valid signal.
    fn input_video_format(&self, input: InputSource) -> Option<HwVideoFormat>;

    fn enable_channel(&self, channel: Channel) -> Result<(), DeviceError>;
    fn enable_input_interrupt(&self, channel: Channel);
    fn disable_input_interrupt(&self, channel: Channel);
    fn subscribe_input_vertical_event(&self, channel: Channel);
    fn unsubscribe_input_vertical_event(&self, channel: Channel);

    /// Block until the next input vertical interrupt of `channel` (or a timeout).
    fn wait_for_input_vertical_interrupt(&self, channel: Channel);

    fn autocirculate_init_for_input(
        &self,
        channel: Channel,
        init: CirculateInit,
    ) -> Result<(), DeviceError>;
    fn autocirculate_start(&self, channel: Channel);
    fn autocirculate_stop(&self, channel: Channel);
    fn autocirculate_status(&self, channel: Channel) -> CirculateStatus;

    /// Copy the oldest captured frame of `channel` into the host buffers.
    fn autocirculate_transfer(
        &self,
        channel: Channel,
        request: &mut TransferRequest<'_>,
    ) -> Result<TransferResult, DeviceError>;
}

/// Opens devices by identifier (index or serial number).
pub trait DeviceManager: Send + Sync {
    fn open(&self, identifier: &str) -> Result<Arc<dyn CaptureDevice>, DeviceError>;
}
