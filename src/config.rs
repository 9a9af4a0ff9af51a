use crate::platform::{AeMode, ImageFormat};
use crate::selector::FacingPolicy;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StillcamConfig {
    pub camera: CameraConfig,
    pub timing: TimingConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraConfig {
    /// Which device to pick among those the platform reports
    #[serde(default = "default_camera_facing")]
    pub facing: FacingPolicy,

    /// Auto-exposure mode requested when the device supports it
    #[serde(default = "default_camera_ae_mode")]
    pub ae_mode: AeMode,

    /// Output format of the still-image reader
    #[serde(default = "default_camera_still_format")]
    pub still_format: ImageFormat,

    /// Number of still buffers the reader may hold at once
    #[serde(default = "default_camera_max_images")]
    pub max_images: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TimingConfig {
    /// Bound on waiting for the resource gate in `open`
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,

    /// Bound on waiting for the resource gate in `close`
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,

    /// Bound on waiting for the resource gate when arming preview
    #[serde(default = "default_preview_timeout_ms")]
    pub preview_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SystemConfig {
    /// Background thread name prefix; the camera id is appended
    #[serde(default = "default_worker_name")]
    pub worker_name: String,
}

impl TimingConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn preview_timeout(&self) -> Duration {
        Duration::from_millis(self.preview_timeout_ms)
    }
}

impl StillcamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("stillcam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.facing", default_camera_facing().as_str())?
            .set_default("camera.ae_mode", default_camera_ae_mode().as_str())?
            .set_default("camera.still_format", default_camera_still_format().as_str())?
            .set_default("camera.max_images", default_camera_max_images() as i64)?
            .set_default("timing.open_timeout_ms", default_open_timeout_ms())?
            .set_default("timing.close_timeout_ms", default_close_timeout_ms())?
            .set_default("timing.preview_timeout_ms", default_preview_timeout_ms())?
            .set_default("system.worker_name", default_worker_name())?
            .add_source(File::with_name(&path_str).required(false))
            // STILLCAM_CAMERA__MAX_IMAGES=2 overrides camera.max_images
            .add_source(
                Environment::with_prefix("STILLCAM")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: StillcamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.max_images == 0 {
            return Err(ConfigError::Message(
                "Camera max_images must be greater than 0".to_string(),
            ));
        }

        if self.timing.open_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Timing open_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.timing.close_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Timing close_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.timing.preview_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Timing preview_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.system.worker_name.trim().is_empty() {
            return Err(ConfigError::Message(
                "System worker_name must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for StillcamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                facing: default_camera_facing(),
                ae_mode: default_camera_ae_mode(),
                still_format: default_camera_still_format(),
                max_images: default_camera_max_images(),
            },
            timing: TimingConfig {
                open_timeout_ms: default_open_timeout_ms(),
                close_timeout_ms: default_close_timeout_ms(),
                preview_timeout_ms: default_preview_timeout_ms(),
            },
            system: SystemConfig {
                worker_name: default_worker_name(),
            },
        }
    }
}

// Default value functions
fn default_camera_facing() -> FacingPolicy {
    FacingPolicy::NotBack
}
fn default_camera_ae_mode() -> AeMode {
    AeMode::On
}
fn default_camera_still_format() -> ImageFormat {
    ImageFormat::Jpeg
}
fn default_camera_max_images() -> usize {
    1
}

fn default_open_timeout_ms() -> u64 {
    3000
}
fn default_close_timeout_ms() -> u64 {
    3000
}
fn default_preview_timeout_ms() -> u64 {
    1000
}

fn default_worker_name() -> String {
    "camera".to_string()
}
