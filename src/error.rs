use std::fmt;
use thiserror::Error;

use crate::buffer::PoolError;
use crate::device::DeviceError;

/// Configuration field a device could not satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityField {
    VideoFormat,
    PixelFormat,
    Routing,
}

impl fmt::Display for CapabilityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityField::VideoFormat => write!(f, "video format"),
            CapabilityField::PixelFormat => write!(f, "pixel format"),
            CapabilityField::Routing => write!(f, "routing"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Ntv2SrcError {
    #[error("Unsupported {field}: {message}")]
    UnsupportedCapability {
        field: CapabilityField,
        message: String,
    },

    #[error("Invalid setting {name}: {message}")]
    InvalidSetting { name: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Failed to engage {stage}: {message}")]
    Engagement { stage: String, message: String },

    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] PoolError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Source is not configured")]
    NotConfigured,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Ntv2SrcError {
    pub fn unsupported<S: Into<String>>(field: CapabilityField, message: S) -> Self {
        Self::UnsupportedCapability {
            field,
            message: message.into(),
        }
    }

    pub fn invalid_setting<N: Into<String>, S: Into<String>>(name: N, message: S) -> Self {
        Self::InvalidSetting {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn engagement<N: Into<String>, S: Into<String>>(stage: N, message: S) -> Self {
        Self::Engagement {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn device<S: Into<String>>(message: S) -> Self {
        Self::Device(DeviceError::new(message))
    }

    /// Errors that end a capture session instead of being logged and skipped.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::UnsupportedCapability { .. }
            | Self::InvalidSetting { .. }
            | Self::Config(_)
            | Self::Engagement { .. }
            | Self::BufferPool(_) => true,
            Self::Device(_)
            | Self::InvalidState { .. }
            | Self::NotConfigured
            | Self::Io(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Ntv2SrcError>;
