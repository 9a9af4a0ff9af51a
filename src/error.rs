use crate::capture::CaptureState;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StillcamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Camera resource busy: gate not acquired within {timeout:?}")]
    ResourceBusy { timeout: Duration },

    #[error("No camera device matches selection policy '{policy}'")]
    DeviceUnavailable { policy: String },

    #[error("Camera device is not open")]
    DeviceNotReady,

    #[error("Capture session is not configured")]
    SessionNotReady,

    #[error("Session configuration failed: {reason}")]
    ConfigurationFailed { reason: String },

    #[error("Capture already in progress (state: {state})")]
    CaptureInProgress { state: CaptureState },

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("System error: {message}")]
    System { message: String },
}

/// Failures reported synchronously by the device platform.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformError {
    #[error("access to the camera was denied")]
    AccessDenied,

    #[error("camera object is in an illegal state (closed or mid-teardown)")]
    IllegalState,

    #[error("camera device is disconnected")]
    Disconnected,

    #[error("operation not supported by the camera device")]
    Unsupported,
}

impl StillcamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn configuration_failed<S: Into<String>>(reason: S) -> Self {
        Self::ConfigurationFailed {
            reason: reason.into(),
        }
    }

    /// Whether the caller can retry after this error. Only a missing device and
    /// invalid configuration are fatal for the controller.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::DeviceUnavailable { .. } | Self::Config(_) | Self::Serialization(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StillcamError>;

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;
