//! Turns user settings into a validated device configuration and programs it.

use tracing::{debug, info};

use crate::config::{ReferenceSourceSetting, SourceSettings, TimecodeIndexSetting};
use crate::device::{
    setup_lock, AudioSetup, AudioSystem, CaptureDevice, Channel, DeviceCapabilities,
    HwAudioSource, InputCrosspoint, InputSource, OutputCrosspoint, PixelFormat, ReferenceSource,
    TimecodeIndex, VancMode,
};
use crate::error::{CapabilityField, Ntv2SrcError, Result};
use crate::format::{FormatInfo, HwVideoFormat, RasterLayout, VideoFormat};

/// Audio sample rate every capture session runs at.
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;

/// Immutable snapshot of the hardware configuration of one capture session.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub channel: Channel,
    pub video_format: VideoFormat,
    pub hw_format: HwVideoFormat,
    pub info: FormatInfo,
    pub pixel_format: PixelFormat,
    pub input_source: InputSource,
    pub input_crosspoint: OutputCrosspoint,
    pub frame_buffer_crosspoint: InputCrosspoint,
    pub vanc_mode: VancMode,
    pub audio_system: AudioSystem,
    pub audio_source: HwAudioSource,
    pub audio_channels: u16,
    pub reference_source: ReferenceSource,
    pub timecode_index: TimecodeIndex,
}

impl DeviceConfig {
    /// Ancillary data travels in separate buffers instead of the raster.
    pub fn captures_side_channel_anc(&self) -> bool {
        self.vanc_mode == VancMode::Off
    }

    pub fn raster_layout(&self) -> RasterLayout {
        self.info.raster_layout(self.vanc_mode)
    }

    /// Bytes of one captured video frame, VANC lines included.
    pub fn video_buffer_size(&self) -> usize {
        self.raster_layout().total_size()
    }
}

/// Resolve `settings` against `device` and program the device with the result.
///
/// Runs under the process-wide setup lock. Nothing is written to the device
/// when resolution fails.
pub fn resolve_and_apply(device: &dyn CaptureDevice, settings: &SourceSettings) -> Result<DeviceConfig> {
    let _setup = setup_lock();

    let config = resolve(device.capabilities(), settings)?;
    apply(device, &config);

    info!(
        "Configured {} for {} from {} (VANC {:?}, {}, reference {:?})",
        config.channel,
        config.video_format,
        config.input_source,
        config.vanc_mode,
        config.audio_system,
        config.reference_source
    );

    Ok(config)
}

/// Pure resolution of `settings` against a capability description.
pub fn resolve(caps: &DeviceCapabilities, settings: &SourceSettings) -> Result<DeviceConfig> {
    let channel = Channel(settings.channel);
    if !caps.has_channel(channel) {
        return Err(Ntv2SrcError::unsupported(
            CapabilityField::Routing,
            format!("{} has {} channels, {} requested", caps.model, caps.num_channels, channel),
        ));
    }

    let hw_format = resolve_video_format(caps, settings.video_format)?;

    let pixel_format = PixelFormat::Ycbcr10Bit;
    if !caps.can_do_frame_buffer_format(pixel_format) {
        return Err(Ntv2SrcError::unsupported(
            CapabilityField::PixelFormat,
            format!("{} cannot capture {:?}", caps.model, pixel_format),
        ));
    }

    let (input_source, vanc_mode) = resolve_input(caps, channel, settings);
    let audio_system = resolve_audio_system(caps, channel, settings)?;

    let reference_source = match settings.reference_source {
        ReferenceSourceSetting::Auto => input_source.reference_source(),
        ReferenceSourceSetting::External => ReferenceSource::External,
        ReferenceSourceSetting::Freerun => ReferenceSource::Freerun,
        ReferenceSourceSetting::Input1 => ReferenceSource::SdiInput(1),
        ReferenceSourceSetting::Input2 => ReferenceSource::SdiInput(2),
        ReferenceSourceSetting::Input3 => ReferenceSource::SdiInput(3),
        ReferenceSourceSetting::Input4 => ReferenceSource::SdiInput(4),
        ReferenceSourceSetting::Input5 => ReferenceSource::SdiInput(5),
        ReferenceSourceSetting::Input6 => ReferenceSource::SdiInput(6),
        ReferenceSourceSetting::Input7 => ReferenceSource::SdiInput(7),
        ReferenceSourceSetting::Input8 => ReferenceSource::SdiInput(8),
    };

    let timecode_index = match settings.timecode_index {
        TimecodeIndexSetting::Vitc => input_source.timecode_index(false),
        TimecodeIndexSetting::AtcLtc => input_source.timecode_index(true),
        TimecodeIndexSetting::Ltc1 => TimecodeIndex::Ltc1,
        TimecodeIndexSetting::Ltc2 => TimecodeIndex::Ltc2,
    };

    Ok(DeviceConfig {
        channel,
        video_format: settings.video_format,
        hw_format,
        info: hw_format.info(),
        pixel_format,
        input_source,
        input_crosspoint: input_source.crosspoint(),
        frame_buffer_crosspoint: channel.frame_buffer_crosspoint(),
        vanc_mode,
        audio_system,
        audio_source: settings.audio_source.hardware(),
        audio_channels: caps.max_audio_channels,
        reference_source,
        timecode_index,
    })
}

fn resolve_video_format(caps: &DeviceCapabilities, format: VideoFormat) -> Result<HwVideoFormat> {
    let entry = format.table_entry();
    entry
        .single
        .filter(|hw| caps.can_do_video_format(*hw))
        .or_else(|| entry.quad.filter(|hw| caps.can_do_video_format(*hw)))
        .ok_or_else(|| {
            Ntv2SrcError::unsupported(
                CapabilityField::VideoFormat,
                format!("{} cannot capture {}", caps.model, format),
            )
        })
}

fn resolve_input(
    caps: &DeviceCapabilities,
    channel: Channel,
    settings: &SourceSettings,
) -> (InputSource, VancMode) {
    match settings.input_source.explicit() {
        None => {
            let vanc = if caps.custom_anc {
                VancMode::Off
            } else {
                VancMode::Tall
            };
            (channel.default_input(), vanc)
        }
        Some(input @ InputSource::Hdmi(_)) => (input, VancMode::Off),
        Some(input @ (InputSource::Sdi(_) | InputSource::Analog1)) => (input, VancMode::Tall),
    }
}

fn resolve_audio_system(
    caps: &DeviceCapabilities,
    channel: Channel,
    settings: &SourceSettings,
) -> Result<AudioSystem> {
    match settings.audio_system.explicit() {
        Some(system) if system.0 < caps.num_audio_systems => Ok(system),
        Some(system) => Err(Ntv2SrcError::unsupported(
            CapabilityField::Routing,
            format!("{} has no {}", caps.model, system),
        )),
        None => {
            let mut system = AudioSystem(0);
            if caps.num_audio_systems > 1 {
                system = channel.audio_system();
            }
            if !caps.frame_store1_display {
                system = AudioSystem(0);
            }
            if system.0 >= caps.num_audio_systems {
                debug!("{} not available on {}, using the first one", system, caps.model);
                system = AudioSystem(0);
            }
            Ok(system)
        }
    }
}

fn apply(device: &dyn CaptureDevice, config: &DeviceConfig) {
    let channel = config.channel;

    device.set_capture_mode(channel);
    device.set_video_format(channel, config.hw_format);
    device.set_frame_buffer_format(channel, config.pixel_format);
    if device.capabilities().bidirectional_sdi {
        device.set_sdi_transmit_enable(channel, false);
    }
    device.set_vanc_mode(channel, config.vanc_mode);

    device.configure_audio(
        config.audio_system,
        AudioSetup {
            source: config.audio_source,
            embedded_input: config.input_source.embedded_audio_input(),
            channels: config.audio_channels,
            sample_rate: AUDIO_SAMPLE_RATE,
        },
    );

    let mut router = device.routing();
    debug!("Previous routing:\n{}", router);
    let removed = router.connect_exclusive(config.frame_buffer_crosspoint, config.input_crosspoint);
    debug!("New routing ({} conflicting connections removed):\n{}", removed, router);
    device.apply_routing(&router);

    device.set_reference(config.reference_source);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AudioSystemSetting, InputSourceSetting};
    use crate::format::{Link, FORMAT_TABLE};

    fn test_caps() -> DeviceCapabilities {
        DeviceCapabilities {
            model: "Test Card".to_string(),
            num_channels: 4,
            video_formats: FORMAT_TABLE.iter().filter_map(|e| e.single).collect(),
            frame_buffer_formats: vec![PixelFormat::Ycbcr10Bit],
            custom_anc: true,
            num_audio_systems: 4,
            frame_store1_display: true,
            bidirectional_sdi: true,
            max_audio_channels: 16,
        }
    }

    #[test]
    fn test_default_settings_resolve() {
        let config = resolve(&test_caps(), &SourceSettings::default()).unwrap();
        assert_eq!(config.channel, Channel(0));
        assert_eq!(config.hw_format, VideoFormat::Hd1080i5000.hardware_format());
        assert_eq!(config.pixel_format, PixelFormat::Ycbcr10Bit);
        assert_eq!(config.input_source, InputSource::Sdi(1));
        assert_eq!(config.input_crosspoint, OutputCrosspoint::SdiIn(1));
        assert_eq!(config.frame_buffer_crosspoint, InputCrosspoint::FrameBuffer(1));
        assert_eq!(config.vanc_mode, VancMode::Off);
        assert_eq!(config.audio_system, AudioSystem(0));
        assert_eq!(config.reference_source, ReferenceSource::Freerun);
        assert_eq!(
            config.timecode_index,
            TimecodeIndex::Sdi { input: 1, embedded_ltc: false }
        );
        assert_eq!(config.audio_channels, 16);
        assert!(config.captures_side_channel_anc());
    }

    #[test]
    fn test_unsupported_video_format() {
        let mut caps = test_caps();
        caps.video_formats.retain(|f| *f != VideoFormat::Hd1080p6000A.hardware_format());
        let settings = SourceSettings {
            video_format: VideoFormat::Hd1080p6000A,
            ..Default::default()
        };
        match resolve(&caps, &settings) {
            Err(Ntv2SrcError::UnsupportedCapability { field, .. }) => {
                assert_eq!(field, CapabilityField::VideoFormat)
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_quad_only_format_checked_against_quad() {
        let mut caps = test_caps();
        let settings = SourceSettings {
            video_format: VideoFormat::Uhd4320p5000,
            ..Default::default()
        };
        assert!(resolve(&caps, &settings).is_err());

        let quad = VideoFormat::Uhd4320p5000.hardware_format();
        assert_eq!(quad.link, Link::Quad);
        caps.video_formats.push(quad);
        assert_eq!(resolve(&caps, &settings).unwrap().hw_format, quad);
    }

    #[test]
    fn test_unsupported_pixel_format() {
        let mut caps = test_caps();
        caps.frame_buffer_formats = vec![PixelFormat::Ycbcr8Bit];
        match resolve(&caps, &SourceSettings::default()) {
            Err(Ntv2SrcError::UnsupportedCapability { field, .. }) => {
                assert_eq!(field, CapabilityField::PixelFormat)
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_channel_out_of_range() {
        let settings = SourceSettings {
            channel: 4,
            ..Default::default()
        };
        assert!(matches!(
            resolve(&test_caps(), &settings),
            Err(Ntv2SrcError::UnsupportedCapability { field: CapabilityField::Routing, .. })
        ));
    }

    #[test]
    fn test_input_source_vanc_modes() {
        let caps = test_caps();
        let resolve_input_of = |input| {
            let settings = SourceSettings {
                input_source: input,
                channel: 2,
                ..Default::default()
            };
            let config = resolve(&caps, &settings).unwrap();
            (config.input_source, config.input_crosspoint, config.vanc_mode)
        };

        assert_eq!(
            resolve_input_of(InputSourceSetting::Hdmi2),
            (InputSource::Hdmi(2), OutputCrosspoint::HdmiIn(2), VancMode::Off)
        );
        assert_eq!(
            resolve_input_of(InputSourceSetting::Sdi5),
            (InputSource::Sdi(5), OutputCrosspoint::SdiIn(5), VancMode::Tall)
        );
        assert_eq!(
            resolve_input_of(InputSourceSetting::Analog1),
            (InputSource::Analog1, OutputCrosspoint::AnalogIn, VancMode::Tall)
        );
        assert_eq!(
            resolve_input_of(InputSourceSetting::Auto),
            (InputSource::Sdi(3), OutputCrosspoint::SdiIn(3), VancMode::Off)
        );

        let mut no_anc = test_caps();
        no_anc.custom_anc = false;
        let config = resolve(&no_anc, &SourceSettings::default()).unwrap();
        assert_eq!(config.vanc_mode, VancMode::Tall);
        assert!(!config.captures_side_channel_anc());
    }

    #[test]
    fn test_automatic_audio_system() {
        let settings = SourceSettings {
            channel: 2,
            ..Default::default()
        };

        let caps = test_caps();
        assert_eq!(resolve(&caps, &settings).unwrap().audio_system, AudioSystem(2));

        let mut single = test_caps();
        single.num_audio_systems = 1;
        assert_eq!(resolve(&single, &settings).unwrap().audio_system, AudioSystem(0));

        let mut no_fs1 = test_caps();
        no_fs1.frame_store1_display = false;
        assert_eq!(resolve(&no_fs1, &settings).unwrap().audio_system, AudioSystem(0));
    }

    #[test]
    fn test_explicit_audio_system() {
        let caps = test_caps();
        let settings = SourceSettings {
            audio_system: AudioSystemSetting::Audio4,
            ..Default::default()
        };
        assert_eq!(resolve(&caps, &settings).unwrap().audio_system, AudioSystem(3));

        let settings = SourceSettings {
            audio_system: AudioSystemSetting::Audio8,
            ..Default::default()
        };
        assert!(matches!(
            resolve(&caps, &settings),
            Err(Ntv2SrcError::UnsupportedCapability { field: CapabilityField::Routing, .. })
        ));
    }

    #[test]
    fn test_reference_and_timecode_from_input() {
        let settings = SourceSettings {
            input_source: InputSourceSetting::Sdi2,
            reference_source: ReferenceSourceSetting::Auto,
            timecode_index: TimecodeIndexSetting::AtcLtc,
            ..Default::default()
        };
        let config = resolve(&test_caps(), &settings).unwrap();
        assert_eq!(config.reference_source, ReferenceSource::SdiInput(2));
        assert_eq!(
            config.timecode_index,
            TimecodeIndex::Sdi { input: 2, embedded_ltc: true }
        );

        let settings = SourceSettings {
            input_source: InputSourceSetting::Hdmi1,
            reference_source: ReferenceSourceSetting::Auto,
            timecode_index: TimecodeIndexSetting::Ltc2,
            ..Default::default()
        };
        let config = resolve(&test_caps(), &settings).unwrap();
        assert_eq!(config.reference_source, ReferenceSource::HdmiInput(1));
        assert_eq!(config.timecode_index, TimecodeIndex::Ltc2);
    }

    #[cfg(feature = "simulator")]
    #[test]
    fn test_apply_programs_device_and_routes_exclusively() {
        use crate::device::sim::SimulatedDevice;

        let device = SimulatedDevice::with_default_capabilities();
        let mut stale = device.routing();
        stale.add_connection(InputCrosspoint::FrameBuffer(1), OutputCrosspoint::HdmiIn(1));
        stale.add_connection(InputCrosspoint::FrameBuffer(2), OutputCrosspoint::SdiIn(1));
        stale.add_connection(InputCrosspoint::FrameBuffer(3), OutputCrosspoint::SdiIn(3));
        device.apply_routing(&stale);

        let config = resolve_and_apply(&device, &SourceSettings::default()).unwrap();

        let state = device.channel_state(Channel(0));
        assert!(state.capture_mode);
        assert_eq!(state.video_format, Some(config.hw_format));
        assert_eq!(state.pixel_format, Some(PixelFormat::Ycbcr10Bit));
        assert_eq!(state.sdi_transmit, Some(false));
        assert_eq!(state.vanc_mode, Some(VancMode::Off));
        assert_eq!(device.reference(), Some(ReferenceSource::Freerun));

        let audio = device.audio_setup(AudioSystem(0)).unwrap();
        assert_eq!(audio.sample_rate, 48_000);
        assert_eq!(audio.channels, 16);

        let routing = device.routing();
        assert_eq!(routing.len(), 2);
        assert!(routing.has_connection(InputCrosspoint::FrameBuffer(1), OutputCrosspoint::SdiIn(1)));
        assert!(routing.has_connection(InputCrosspoint::FrameBuffer(3), OutputCrosspoint::SdiIn(3)));

        // Applying twice leaves the same table
        resolve_and_apply(&device, &SourceSettings::default()).unwrap();
        assert_eq!(device.routing(), routing);
    }

    #[cfg(feature = "simulator")]
    #[test]
    fn test_failed_resolution_leaves_device_untouched() {
        use crate::device::sim::SimulatedDevice;

        let device = SimulatedDevice::with_default_capabilities();
        let settings = SourceSettings {
            video_format: VideoFormat::Uhd4320p6000,
            ..Default::default()
        };
        assert!(resolve_and_apply(&device, &settings).is_err());
        assert_eq!(device.channel_state(Channel(0)).video_format, None);
        assert!(device.routing().is_empty());
    }
}
