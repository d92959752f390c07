//! Scriptable in-memory capture device.
//!
//! Paces transfers with a fixed frame interval and lets tests (and the CLI)
//! change the detected input signal, inject hardware frame drops and
//! transfer failures while a capture session is running.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

use super::{
    AudioSetup, AudioSystem, CaptureDevice, Channel, CirculateInit, CirculateStatus,
    DeviceCapabilities, DeviceError, DeviceManager, InputSource, PixelFormat, ReferenceSource,
    SignalRouter, TimecodeIndex, TransferRequest, TransferResult, VancMode,
};
use crate::anc::{CEA708_DID, CEA708_SDID};
use crate::clock::wall_clock_us;
use crate::format::{HwVideoFormat, FORMAT_TABLE};
use crate::frame::RawTimecode;

/// Per-channel register state, exposed for inspection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelState {
    pub enabled: bool,
    pub capture_mode: bool,
    pub video_format: Option<HwVideoFormat>,
    pub pixel_format: Option<PixelFormat>,
    pub vanc_mode: Option<VancMode>,
    pub sdi_transmit: Option<bool>,
    pub interrupt_enabled: bool,
    pub vertical_subscribed: bool,
    pub circulate_init: Option<CirculateInit>,
    pub circulating: bool,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub sessions: u32,
}

#[derive(Debug)]
struct SimState {
    ready: bool,
    multi_format: bool,
    routing: SignalRouter,
    reference: Option<ReferenceSource>,
    audio: HashMap<AudioSystem, AudioSetup>,
    channels: HashMap<Channel, ChannelState>,
    signal: Option<HwVideoFormat>,
    input_signals: HashMap<InputSource, Option<HwVideoFormat>>,
    buffer_level: u32,
    failing_transfers: u32,
    fail_enable_channel: bool,
    fail_circulate_init: bool,
    captions: Option<Vec<u8>>,
}

pub struct SimulatedDevice {
    name: String,
    serial: Option<String>,
    caps: DeviceCapabilities,
    frame_interval: Duration,
    state: Mutex<SimState>,
    vertical_waits: AtomicU64,
    transfers: AtomicU64,
}

impl SimulatedDevice {
    pub fn new(caps: DeviceCapabilities) -> Self {
        Self {
            name: caps.model.clone(),
            serial: None,
            caps,
            frame_interval: Duration::from_millis(1),
            state: Mutex::new(SimState {
                ready: true,
                multi_format: false,
                routing: SignalRouter::new(),
                reference: None,
                audio: HashMap::new(),
                channels: HashMap::new(),
                signal: None,
                input_signals: HashMap::new(),
                buffer_level: 3,
                failing_transfers: 0,
                fail_enable_channel: false,
                fail_circulate_init: false,
                captions: None,
            }),
            vertical_waits: AtomicU64::new(0),
            transfers: AtomicU64::new(0),
        }
    }

    /// Four-channel card supporting every single-link format.
    pub fn with_default_capabilities() -> Self {
        Self::new(default_capabilities())
    }

    pub fn with_serial<S: Into<String>>(mut self, serial: S) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Time each transfer and vertical interrupt wait takes.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn with_signal(self, format: Option<HwVideoFormat>) -> Self {
        self.state.lock().signal = format;
        self
    }

    /// Change the signal detected on every input without an override.
    pub fn set_signal(&self, format: Option<HwVideoFormat>) {
        debug!("Simulated signal changed to {:?}", format);
        self.state.lock().signal = format;
    }

    pub fn set_input_signal(&self, input: InputSource, format: Option<HwVideoFormat>) {
        self.state.lock().input_signals.insert(input, format);
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.lock().ready = ready;
    }

    /// Frames waiting on the device, as reported by the status call.
    pub fn set_buffer_level(&self, level: u32) {
        self.state.lock().buffer_level = level;
    }

    /// Bump the cumulative hardware dropped-frame counter of `channel`.
    pub fn inject_dropped_frames(&self, channel: Channel, count: u64) {
        let mut state = self.state.lock();
        state.channels.entry(channel).or_default().frames_dropped += count;
    }

    /// Make the next `count` transfers fail.
    pub fn fail_transfers(&self, count: u32) {
        self.state.lock().failing_transfers = count;
    }

    pub fn fail_enable_channel(&self, fail: bool) {
        self.state.lock().fail_enable_channel = fail;
    }

    pub fn fail_circulate_init(&self, fail: bool) {
        self.state.lock().fail_circulate_init = fail;
    }

    /// Caption payload written into the ancillary data of every frame.
    pub fn set_captions(&self, payload: Option<Vec<u8>>) {
        self.state.lock().captions = payload;
    }

    pub fn channel_state(&self, channel: Channel) -> ChannelState {
        self.state
            .lock()
            .channels
            .get(&channel)
            .cloned()
            .unwrap_or_default()
    }

    pub fn reference(&self) -> Option<ReferenceSource> {
        self.state.lock().reference
    }

    pub fn audio_setup(&self, system: AudioSystem) -> Option<AudioSetup> {
        self.state.lock().audio.get(&system).copied()
    }

    pub fn is_multi_format(&self) -> bool {
        self.state.lock().multi_format
    }

    pub fn vertical_waits(&self) -> u64 {
        self.vertical_waits.load(Ordering::Acquire)
    }

    pub fn transfers(&self) -> u64 {
        self.transfers.load(Ordering::Acquire)
    }

    fn with_channel<R>(&self, channel: Channel, f: impl FnOnce(&mut ChannelState) -> R) -> R {
        let mut state = self.state.lock();
        f(state.channels.entry(channel).or_default())
    }
}

impl CaptureDevice for SimulatedDevice {
    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn serial_number(&self) -> Option<String> {
        self.serial.clone()
    }

    fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    fn set_multi_format_mode(&self, enable: bool) {
        self.state.lock().multi_format = enable;
    }

    fn set_capture_mode(&self, channel: Channel) {
        self.with_channel(channel, |c| c.capture_mode = true);
    }

    fn set_video_format(&self, channel: Channel, format: HwVideoFormat) {
        self.with_channel(channel, |c| c.video_format = Some(format));
    }

    fn set_frame_buffer_format(&self, channel: Channel, format: PixelFormat) {
        self.with_channel(channel, |c| c.pixel_format = Some(format));
    }

    fn set_sdi_transmit_enable(&self, channel: Channel, enable: bool) {
        self.with_channel(channel, |c| c.sdi_transmit = Some(enable));
    }

    fn set_vanc_mode(&self, channel: Channel, mode: VancMode) {
        self.with_channel(channel, |c| c.vanc_mode = Some(mode));
    }

    fn configure_audio(&self, system: AudioSystem, setup: AudioSetup) {
        self.state.lock().audio.insert(system, setup);
    }

    fn set_reference(&self, reference: ReferenceSource) {
        self.state.lock().reference = Some(reference);
    }

    fn routing(&self) -> SignalRouter {
        self.state.lock().routing.clone()
    }

    fn apply_routing(&self, router: &SignalRouter) {
        self.state.lock().routing = router.clone();
    }

    fn input_video_format(&self, input: InputSource) -> Option<HwVideoFormat> {
        let state = self.state.lock();
        state
            .input_signals
            .get(&input)
            .copied()
            .unwrap_or(state.signal)
    }

    fn enable_channel(&self, channel: Channel) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if state.fail_enable_channel {
            return Err(DeviceError::new(format!("cannot enable {}", channel)));
        }
        state.channels.entry(channel).or_default().enabled = true;
        Ok(())
    }

    fn enable_input_interrupt(&self, channel: Channel) {
        self.with_channel(channel, |c| c.interrupt_enabled = true);
    }

    fn disable_input_interrupt(&self, channel: Channel) {
        self.with_channel(channel, |c| c.interrupt_enabled = false);
    }

    fn subscribe_input_vertical_event(&self, channel: Channel) {
        self.with_channel(channel, |c| c.vertical_subscribed = true);
    }

    fn unsubscribe_input_vertical_event(&self, channel: Channel) {
        self.with_channel(channel, |c| c.vertical_subscribed = false);
    }

    fn wait_for_input_vertical_interrupt(&self, _channel: Channel) {
        thread::sleep(self.frame_interval);
        self.vertical_waits.fetch_add(1, Ordering::AcqRel);
    }

    fn autocirculate_init_for_input(
        &self,
        channel: Channel,
        init: CirculateInit,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if state.fail_circulate_init {
            return Err(DeviceError::new(format!(
                "transfer engine init failed on {}",
                channel
            )));
        }
        let c = state.channels.entry(channel).or_default();
        c.circulate_init = Some(init);
        c.frames_processed = 0;
        c.frames_dropped = 0;
        Ok(())
    }

    fn autocirculate_start(&self, channel: Channel) {
        self.with_channel(channel, |c| {
            c.circulating = true;
            c.sessions += 1;
        });
    }

    fn autocirculate_stop(&self, channel: Channel) {
        self.with_channel(channel, |c| c.circulating = false);
    }

    fn autocirculate_status(&self, channel: Channel) -> CirculateStatus {
        let mut state = self.state.lock();
        let buffer_level = state.buffer_level;
        let c = state.channels.entry(channel).or_default();
        let frame_count = c.circulate_init.map_or(0, |init| init.frame_count);
        CirculateStatus {
            running: c.circulating,
            start_frame: 0,
            end_frame: frame_count.saturating_sub(1),
            active_frame: (c.frames_processed % frame_count.max(1) as u64) as u32,
            frames_processed: c.frames_processed,
            frames_dropped: c.frames_dropped,
            buffer_level: if c.circulating { buffer_level } else { 0 },
        }
    }

    fn autocirculate_transfer(
        &self,
        channel: Channel,
        request: &mut TransferRequest<'_>,
    ) -> Result<TransferResult, DeviceError> {
        let (format, vanc_size, captions, audio_channels) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.failing_transfers > 0 {
                state.failing_transfers -= 1;
                return Err(DeviceError::new("simulated transfer failure"));
            }
            let captions = state.captions.clone();
            let c = state.channels.entry(channel).or_default();
            if !c.circulating {
                return Err(DeviceError::new(format!("{} is not circulating", channel)));
            }
            let audio_channels = c
                .circulate_init
                .and_then(|init| state.audio.get(&init.audio_system))
                .map_or(self.caps.max_audio_channels, |setup| setup.channels);
            let vanc_size = c.video_format.map_or(0, |f| {
                f.info()
                    .raster_layout(c.vanc_mode.unwrap_or(VancMode::Off))
                    .vanc_size()
            });
            (c.video_format, vanc_size, captions, audio_channels)
        };

        thread::sleep(self.frame_interval);

        let frame_number = self.with_channel(channel, |c| {
            c.frames_processed += 1;
            c.frames_processed
        });
        self.transfers.fetch_add(1, Ordering::AcqRel);

        // Tall rasters carry the caption packet in the first VANC line
        let vanc_size = vanc_size.min(request.video.len());
        if vanc_size > 0 {
            let vanc = &mut request.video[..vanc_size];
            match captions.as_deref() {
                Some(payload) => {
                    write_anc_packet(vanc, payload);
                }
                None => vanc[0] = 0,
            }
        }

        let stamp = frame_number.to_le_bytes();
        let marked = stamp.len().min(request.video.len() - vanc_size);
        request.video[vanc_size..vanc_size + marked].copy_from_slice(&stamp[..marked]);

        let (fps_n, fps_d) = format.map_or((25, 1), |f| f.rate.fraction());
        let samples = (48_000u64 * fps_d as u64 / fps_n.max(1) as u64) as usize;
        let audio_bytes = (samples * audio_channels as usize * 4).min(request.audio.len());

        let anc_field1_bytes = match (request.anc_field1.as_deref_mut(), captions.as_deref()) {
            (Some(anc), Some(payload)) => write_anc_packet(anc, payload),
            _ => 0,
        };

        let nominal_fps = ((fps_n + fps_d - 1) / fps_d.max(1)).max(1) as u64;
        let total_seconds = frame_number / nominal_fps;
        let label = frame_number % nominal_fps;
        let (label, second_of_pair) = if nominal_fps > 30 {
            (label / 2, label % 2 == 1)
        } else {
            (label, false)
        };
        let timecode = RawTimecode::from_hmsf(
            ((total_seconds / 3600) % 24) as u8,
            ((total_seconds / 60) % 60) as u8,
            (total_seconds % 60) as u8,
            label as u8,
            false,
        )
        .with_field(second_of_pair);
        let sdi_input = channel.0 + 1;

        trace!("Simulated transfer of frame {} on {}", frame_number, channel);

        Ok(TransferResult {
            video_bytes: request.video.len(),
            audio_bytes,
            anc_field1_bytes,
            anc_field2_bytes: 0,
            // Captured one millisecond before the transfer completed
            frame_time: (wall_clock_us() - 1_000) * 10,
            timecodes: vec![
                (TimecodeIndex::Sdi { input: sdi_input, embedded_ltc: false }, timecode),
                (TimecodeIndex::Sdi { input: sdi_input, embedded_ltc: true }, timecode),
                (TimecodeIndex::Ltc1, timecode),
                (TimecodeIndex::Ltc2, timecode),
                (TimecodeIndex::Default, timecode),
            ],
        })
    }
}

/// Writes `[did, sdid, len, payload..]`, returning the bytes written.
fn write_anc_packet(buffer: &mut [u8], payload: &[u8]) -> usize {
    let len = payload.len().min(255).min(buffer.len().saturating_sub(3));
    if buffer.len() < 3 {
        return 0;
    }
    buffer[0] = CEA708_DID;
    buffer[1] = CEA708_SDID;
    buffer[2] = len as u8;
    buffer[3..3 + len].copy_from_slice(&payload[..len]);
    3 + len
}

pub fn default_capabilities() -> DeviceCapabilities {
    DeviceCapabilities {
        model: "Simulated Capture Card".to_string(),
        num_channels: 4,
        video_formats: FORMAT_TABLE
            .iter()
            .filter_map(|entry| entry.single)
            .collect(),
        frame_buffer_formats: vec![PixelFormat::Ycbcr10Bit, PixelFormat::Ycbcr8Bit],
        custom_anc: true,
        num_audio_systems: 4,
        frame_store1_display: true,
        bidirectional_sdi: true,
        max_audio_channels: 16,
    }
}

/// Opens registered simulated devices by index or serial number.
#[derive(Default)]
pub struct SimulatedDeviceManager {
    devices: Mutex<Vec<Arc<SimulatedDevice>>>,
}

impl SimulatedDeviceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device; its index is the registration order.
    pub fn register(&self, device: Arc<SimulatedDevice>) -> usize {
        let mut devices = self.devices.lock();
        devices.push(device);
        devices.len() - 1
    }
}

impl DeviceManager for SimulatedDeviceManager {
    fn open(&self, identifier: &str) -> Result<Arc<dyn CaptureDevice>, DeviceError> {
        let devices = self.devices.lock();
        let by_index = identifier
            .parse::<usize>()
            .ok()
            .and_then(|index| devices.get(index));
        let found = by_index.or_else(|| {
            devices
                .iter()
                .find(|d| d.serial.as_deref() == Some(identifier))
        });

        match found {
            Some(device) => Ok(Arc::clone(device) as Arc<dyn CaptureDevice>),
            None => Err(DeviceError::new(format!(
                "no device matches identifier '{}'",
                identifier
            ))),
        }
    }
}
