use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::device::{AudioSystem, HwAudioSource, InputSource, MAX_CHANNELS};
use crate::format::VideoFormat;

/// Upper bound of the CPU affinity mask.
pub const MAX_CPU_CORES: usize = 1024;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Ntv2SrcConfig {
    #[serde(default)]
    pub source: SourceSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub system: SystemConfig,
}

/// User-facing settings of a capture source.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SourceSettings {
    /// Device index or serial number
    #[serde(default = "default_device_identifier")]
    pub device_identifier: String,

    /// Zero-based capture channel
    #[serde(default)]
    pub channel: u8,

    #[serde(default)]
    pub video_format: VideoFormat,

    /// Frames buffered between the capture thread and the consumer
    #[serde(default = "default_queue_size")]
    pub queue_size: u32,

    #[serde(default)]
    pub audio_system: AudioSystemSetting,

    #[serde(default)]
    pub input_source: InputSourceSetting,

    #[serde(default)]
    pub audio_source: AudioSourceSetting,

    #[serde(default)]
    pub timecode_index: TimecodeIndexSetting,

    #[serde(default)]
    pub reference_source: ReferenceSourceSetting,

    /// Pin the capture thread to this CPU core
    #[serde(default)]
    pub capture_cpu_core: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LoggingConfig {
    /// Also write logs to this file
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Capacity of the notification broadcast channel
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AudioSystemSetting {
    #[default]
    Auto,
    Audio1,
    Audio2,
    Audio3,
    Audio4,
    Audio5,
    Audio6,
    Audio7,
    Audio8,
}

impl AudioSystemSetting {
    /// The selected engine, `None` for automatic selection.
    pub fn explicit(&self) -> Option<AudioSystem> {
        let index = match self {
            AudioSystemSetting::Auto => return None,
            AudioSystemSetting::Audio1 => 0,
            AudioSystemSetting::Audio2 => 1,
            AudioSystemSetting::Audio3 => 2,
            AudioSystemSetting::Audio4 => 3,
            AudioSystemSetting::Audio5 => 4,
            AudioSystemSetting::Audio6 => 5,
            AudioSystemSetting::Audio7 => 6,
            AudioSystemSetting::Audio8 => 7,
        };
        Some(AudioSystem(index))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum InputSourceSetting {
    #[default]
    Auto,
    Analog1,
    Hdmi1,
    Hdmi2,
    Hdmi3,
    Hdmi4,
    Sdi1,
    Sdi2,
    Sdi3,
    Sdi4,
    Sdi5,
    Sdi6,
    Sdi7,
    Sdi8,
}

impl InputSourceSetting {
    /// The selected connector, `None` for automatic selection.
    pub fn explicit(&self) -> Option<InputSource> {
        Some(match self {
            InputSourceSetting::Auto => return None,
            InputSourceSetting::Analog1 => InputSource::Analog1,
            InputSourceSetting::Hdmi1 => InputSource::Hdmi(1),
            InputSourceSetting::Hdmi2 => InputSource::Hdmi(2),
            InputSourceSetting::Hdmi3 => InputSource::Hdmi(3),
            InputSourceSetting::Hdmi4 => InputSource::Hdmi(4),
            InputSourceSetting::Sdi1 => InputSource::Sdi(1),
            InputSourceSetting::Sdi2 => InputSource::Sdi(2),
            InputSourceSetting::Sdi3 => InputSource::Sdi(3),
            InputSourceSetting::Sdi4 => InputSource::Sdi(4),
            InputSourceSetting::Sdi5 => InputSource::Sdi(5),
            InputSourceSetting::Sdi6 => InputSource::Sdi(6),
            InputSourceSetting::Sdi7 => InputSource::Sdi(7),
            InputSourceSetting::Sdi8 => InputSource::Sdi(8),
        })
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AudioSourceSetting {
    #[default]
    Embedded,
    Aes,
    Analog,
    Hdmi,
    Mic,
}

impl AudioSourceSetting {
    pub fn hardware(&self) -> HwAudioSource {
        match self {
            AudioSourceSetting::Embedded => HwAudioSource::Embedded,
            AudioSourceSetting::Aes => HwAudioSource::Aes,
            AudioSourceSetting::Analog => HwAudioSource::Analog,
            AudioSourceSetting::Hdmi => HwAudioSource::Hdmi,
            AudioSourceSetting::Mic => HwAudioSource::Mic,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TimecodeIndexSetting {
    /// Vertical interval timecode of the input
    #[default]
    Vitc,
    /// Embedded ATC-LTC of the input
    AtcLtc,
    Ltc1,
    Ltc2,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceSourceSetting {
    /// Lock to the selected input
    Auto,
    External,
    #[default]
    Freerun,
    Input1,
    Input2,
    Input3,
    Input4,
    Input5,
    Input6,
    Input7,
    Input8,
}

impl Ntv2SrcConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("ntv2src.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default("source.device_identifier", default_device_identifier())?
            .set_default("source.channel", 0)?
            .set_default("source.video_format", VideoFormat::default().nick())?
            .set_default("source.queue_size", default_queue_size())?
            .set_default("system.event_bus_capacity", default_event_bus_capacity() as i64)?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables, e.g. NTV2SRC_SOURCE__QUEUE_SIZE
            .add_source(
                Environment::with_prefix("NTV2SRC")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Ntv2SrcConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.source.validate()?;

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl SourceSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_identifier.trim().is_empty() {
            return Err(ConfigError::Message(
                "Device identifier must not be empty".to_string(),
            ));
        }

        if self.channel >= MAX_CHANNELS {
            return Err(ConfigError::Message(format!(
                "Channel must be below {}, got {}",
                MAX_CHANNELS, self.channel
            )));
        }

        if self.queue_size == 0 {
            return Err(ConfigError::Message(
                "Queue size must be greater than 0".to_string(),
            ));
        }

        if let Some(core) = self.capture_cpu_core {
            if core >= MAX_CPU_CORES {
                return Err(ConfigError::Message(format!(
                    "Capture CPU core {} out of range",
                    core
                )));
            }
        }

        Ok(())
    }
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            device_identifier: default_device_identifier(),
            channel: 0,
            video_format: VideoFormat::default(),
            queue_size: default_queue_size(),
            audio_system: AudioSystemSetting::default(),
            input_source: InputSourceSetting::default(),
            audio_source: AudioSourceSetting::default(),
            timecode_index: TimecodeIndexSetting::default(),
            reference_source: ReferenceSourceSetting::default(),
            capture_cpu_core: None,
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

// Default value functions
fn default_device_identifier() -> String {
    "0".to_string()
}
fn default_queue_size() -> u32 {
    16
}
fn default_event_bus_capacity() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Ntv2SrcConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.source.device_identifier, "0");
        assert_eq!(config.source.channel, 0);
        assert_eq!(config.source.video_format, VideoFormat::Hd1080i5000);
        assert_eq!(config.source.queue_size, 16);
        assert_eq!(config.source.audio_system, AudioSystemSetting::Auto);
        assert_eq!(config.source.input_source, InputSourceSetting::Auto);
        assert_eq!(config.source.audio_source, AudioSourceSetting::Embedded);
        assert_eq!(config.source.timecode_index, TimecodeIndexSetting::Vitc);
        assert_eq!(config.source.reference_source, ReferenceSourceSetting::Freerun);
        assert_eq!(config.source.capture_cpu_core, None);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[source]
channel = 2
video_format = "720p5994"
queue_size = 8
input_source = "hdmi1"
timecode_index = "atc-ltc"
reference_source = "input3"
capture_cpu_core = 3

[logging]
file = "/tmp/ntv2src.log"
"#
        )
        .unwrap();

        let config = Ntv2SrcConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.source.channel, 2);
        assert_eq!(config.source.video_format, VideoFormat::Hd720p5994);
        assert_eq!(config.source.queue_size, 8);
        assert_eq!(config.source.input_source, InputSourceSetting::Hdmi1);
        assert_eq!(config.source.timecode_index, TimecodeIndexSetting::AtcLtc);
        assert_eq!(config.source.reference_source, ReferenceSourceSetting::Input3);
        assert_eq!(config.source.capture_cpu_core, Some(3));
        assert_eq!(config.source.audio_source, AudioSourceSetting::Embedded);
        assert_eq!(config.logging.file.as_deref(), Some("/tmp/ntv2src.log"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Ntv2SrcConfig::load_from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.source.video_format, VideoFormat::Hd1080i5000);
        assert_eq!(config.system.event_bus_capacity, 256);
    }

    #[test]
    fn test_environment_variable_override() {
        env::set_var("NTV2SRC_SOURCE__DEVICE_IDENTIFIER", "serial-env-test");

        let dir = tempfile::tempdir().unwrap();
        let config = Ntv2SrcConfig::load_from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.source.device_identifier, "serial-env-test");

        env::remove_var("NTV2SRC_SOURCE__DEVICE_IDENTIFIER");
    }

    #[test]
    fn test_unknown_video_format_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[source]\nvideo_format = \"1080i49\"").unwrap();
        assert!(Ntv2SrcConfig::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Ntv2SrcConfig::default();

        config.source.queue_size = 0;
        assert!(config.validate().is_err());
        config.source.queue_size = 1;
        assert!(config.validate().is_ok());

        config.source.channel = 8;
        assert!(config.validate().is_err());
        config.source.channel = 7;
        assert!(config.validate().is_ok());

        config.source.device_identifier = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_setting_selectors() {
        assert_eq!(AudioSystemSetting::Auto.explicit(), None);
        assert_eq!(AudioSystemSetting::Audio3.explicit(), Some(AudioSystem(2)));
        assert_eq!(InputSourceSetting::Sdi4.explicit(), Some(InputSource::Sdi(4)));
        assert_eq!(InputSourceSetting::Auto.explicit(), None);
        assert_eq!(AudioSourceSetting::Mic.hardware(), HwAudioSource::Mic);
    }

    #[test]
    fn test_print_default_config_as_toml() {
        let text = toml::to_string_pretty(&Ntv2SrcConfig::default()).unwrap();
        assert!(text.contains("video_format = \"1080i50\""));
        assert!(text.contains("reference_source = \"freerun\""));
    }
}
