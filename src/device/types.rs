use serde::{Deserialize, Serialize};
use std::fmt;

use crate::format::HwVideoFormat;

/// Number of channels the hardware abstraction can address.
pub const MAX_CHANNELS: u8 = 8;

/// Zero-based capture channel index (channel 1 on the hardware is `Channel(0)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Channel(pub u8);

impl Channel {
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// SDI input physically paired with this channel.
    pub fn default_input(&self) -> InputSource {
        InputSource::Sdi(self.0 + 1)
    }

    /// Frame buffer (frame store) input crosspoint tied to this channel.
    pub fn frame_buffer_crosspoint(&self) -> InputCrosspoint {
        InputCrosspoint::FrameBuffer(self.0 + 1)
    }

    /// Audio engine tied 1:1 to this channel.
    pub fn audio_system(&self) -> AudioSystem {
        AudioSystem(self.0)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel {}", self.0 + 1)
    }
}

/// Physical input connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputSource {
    Analog1,
    Hdmi(u8),
    Sdi(u8),
}

impl InputSource {
    /// Output crosspoint carrying the signal of this connector into the router.
    pub fn crosspoint(&self) -> OutputCrosspoint {
        match self {
            InputSource::Analog1 => OutputCrosspoint::AnalogIn,
            InputSource::Hdmi(n) => OutputCrosspoint::HdmiIn(*n),
            InputSource::Sdi(n) => OutputCrosspoint::SdiIn(*n),
        }
    }

    /// Reference source that locks to this connector.
    pub fn reference_source(&self) -> ReferenceSource {
        match self {
            InputSource::Analog1 => ReferenceSource::AnalogInput,
            InputSource::Hdmi(n) => ReferenceSource::HdmiInput(*n),
            InputSource::Sdi(n) => ReferenceSource::SdiInput(*n),
        }
    }

    /// Timecode index carried by this connector (VITC or embedded ATC-LTC).
    pub fn timecode_index(&self, embedded_ltc: bool) -> TimecodeIndex {
        match self {
            InputSource::Sdi(n) => TimecodeIndex::Sdi {
                input: *n,
                embedded_ltc,
            },
            InputSource::Hdmi(_) | InputSource::Analog1 => TimecodeIndex::Default,
        }
    }

    /// Embedded audio extractor fed by this connector.
    pub fn embedded_audio_input(&self) -> EmbeddedAudioInput {
        match self {
            InputSource::Analog1 => EmbeddedAudioInput(1),
            InputSource::Hdmi(n) | InputSource::Sdi(n) => EmbeddedAudioInput(*n),
        }
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Analog1 => write!(f, "analog-1"),
            InputSource::Hdmi(n) => write!(f, "hdmi-{}", n),
            InputSource::Sdi(n) => write!(f, "sdi-{}", n),
        }
    }
}

/// Router input endpoint (a consumer of a signal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InputCrosspoint {
    FrameBuffer(u8),
}

/// Router output endpoint (a producer of a signal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OutputCrosspoint {
    AnalogIn,
    HdmiIn(u8),
    SdiIn(u8),
}

/// Zero-based audio engine index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioSystem(pub u8);

impl fmt::Display for AudioSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "audio system {}", self.0 + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddedAudioInput(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HwAudioSource {
    Embedded,
    Aes,
    Analog,
    Hdmi,
    Mic,
}

/// Timing signal the device locks its output clock to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceSource {
    External,
    Freerun,
    SdiInput(u8),
    HdmiInput(u8),
    AnalogInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimecodeIndex {
    Default,
    Sdi { input: u8, embedded_ltc: bool },
    Ltc1,
    Ltc2,
}

/// Frame buffer pixel layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 10-bit 4:2:2 YCbCr, v210 packing
    Ycbcr10Bit,
    /// 8-bit 4:2:2 YCbCr, UYVY packing
    Ycbcr8Bit,
    Argb8,
}

/// Where the device puts vertical ancillary data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VancMode {
    /// Ancillary packets are captured through a separate side channel
    Off,
    /// The frame buffer is extended upwards to hold the VANC lines
    Tall,
}

/// Static capability description of a device model.
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    pub model: String,
    pub num_channels: u8,
    pub video_formats: Vec<HwVideoFormat>,
    pub frame_buffer_formats: Vec<PixelFormat>,
    pub custom_anc: bool,
    pub num_audio_systems: u8,
    pub frame_store1_display: bool,
    pub bidirectional_sdi: bool,
    pub max_audio_channels: u16,
}

impl DeviceCapabilities {
    pub fn can_do_video_format(&self, format: HwVideoFormat) -> bool {
        self.video_formats.contains(&format)
    }

    pub fn can_do_frame_buffer_format(&self, format: PixelFormat) -> bool {
        self.frame_buffer_formats.contains(&format)
    }

    pub fn has_channel(&self, channel: Channel) -> bool {
        channel.0 < self.num_channels
    }
}

/// Parameters for arming the transfer engine of an input channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CirculateInit {
    /// Number of frames the engine cycles through on the device side
    pub frame_count: u32,
    pub audio_system: AudioSystem,
    pub with_rp188: bool,
    pub with_anc: bool,
}

/// Snapshot of the transfer engine of one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CirculateStatus {
    pub running: bool,
    pub start_frame: u32,
    pub end_frame: u32,
    pub active_frame: u32,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    /// Frames captured by the device and not yet transferred to the host
    pub buffer_level: u32,
}

/// Audio engine configuration written by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSetup {
    pub source: HwAudioSource,
    pub embedded_input: EmbeddedAudioInput,
    pub channels: u16,
    pub sample_rate: u32,
}
