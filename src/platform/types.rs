use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Direction a camera lens faces relative to the device screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LensFacing {
    Front,
    Back,
    External,
}

/// Pixel format of a capture output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    Jpeg,
    Yuv420,
    Raw,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Yuv420 => "yuv420",
            ImageFormat::Raw => "raw",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Opaque handle to something a capture request can draw into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Surface(u64);

impl Surface {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    Off,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AfMode {
    Off,
    Auto,
    Macro,
    ContinuousVideo,
    ContinuousPicture,
    Edof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AeMode {
    Off,
    On,
    OnAutoFlash,
    OnAlwaysFlash,
    OnAutoFlashRedeye,
}

impl AeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AeMode::Off => "off",
            AeMode::On => "on",
            AeMode::OnAutoFlash => "on_auto_flash",
            AeMode::OnAlwaysFlash => "on_always_flash",
            AeMode::OnAutoFlashRedeye => "on_auto_flash_redeye",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AwbMode {
    Off,
    Auto,
    Incandescent,
    Fluorescent,
    Daylight,
    Cloudy,
}

/// Auto-focus state reported in per-frame metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AfState {
    Inactive,
    PassiveScan,
    PassiveFocused,
    ActiveScan,
    FocusedLocked,
    NotFocusedLocked,
    PassiveUnfocused,
}

/// Auto-exposure state reported in per-frame metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AeState {
    Inactive,
    Searching,
    Converged,
    Locked,
    FlashRequired,
    Precapture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfTrigger {
    Start,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecaptureTrigger {
    Start,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTemplate {
    Preview,
    StillCapture,
}

/// Error codes delivered with a device error notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorCode {
    InUse,
    MaxCamerasInUse,
    Disabled,
    Device,
    Service,
}

/// Metadata for one captured frame. Either state may be missing on devices
/// that do not report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameMetadata {
    pub frame_number: u64,
    pub af_state: Option<AfState>,
    pub ae_state: Option<AeState>,
}

impl FrameMetadata {
    pub fn new(af_state: Option<AfState>, ae_state: Option<AeState>) -> Self {
        Self {
            frame_number: 0,
            af_state,
            ae_state,
        }
    }

    pub fn with_frame_number(mut self, frame_number: u64) -> Self {
        self.frame_number = frame_number;
        self
    }
}

/// A single request submitted to a capture session.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub template: RequestTemplate,
    pub targets: Vec<Surface>,
    pub control_mode: Option<ControlMode>,
    pub af_mode: Option<AfMode>,
    pub ae_mode: Option<AeMode>,
    pub awb_mode: Option<AwbMode>,
    pub af_trigger: Option<AfTrigger>,
    pub precapture_trigger: Option<PrecaptureTrigger>,
}

impl CaptureRequest {
    pub fn new(template: RequestTemplate) -> Self {
        Self {
            template,
            targets: Vec::new(),
            control_mode: None,
            af_mode: None,
            ae_mode: None,
            awb_mode: None,
            af_trigger: None,
            precapture_trigger: None,
        }
    }

    pub fn add_target(&mut self, surface: Surface) {
        if !self.targets.contains(&surface) {
            self.targets.push(surface);
        }
    }

    pub fn has_target(&self, surface: Surface) -> bool {
        self.targets.contains(&surface)
    }
}

/// Static description of a camera device
#[derive(Debug, Clone, Default)]
pub struct CameraCharacteristics {
    pub lens_facing: Option<LensFacing>,
    pub output_sizes: HashMap<ImageFormat, Vec<Size>>,
    pub af_modes: Vec<AfMode>,
    pub ae_modes: Vec<AeMode>,
    pub awb_modes: Vec<AwbMode>,
}

impl CameraCharacteristics {
    pub fn new(lens_facing: Option<LensFacing>) -> Self {
        Self {
            lens_facing,
            ..Default::default()
        }
    }

    pub fn with_output_sizes(mut self, format: ImageFormat, sizes: Vec<Size>) -> Self {
        self.output_sizes.insert(format, sizes);
        self
    }

    pub fn with_af_modes(mut self, modes: Vec<AfMode>) -> Self {
        self.af_modes = modes;
        self
    }

    pub fn with_ae_modes(mut self, modes: Vec<AeMode>) -> Self {
        self.ae_modes = modes;
        self
    }

    pub fn with_awb_modes(mut self, modes: Vec<AwbMode>) -> Self {
        self.awb_modes = modes;
        self
    }

    pub fn is_continuous_auto_focus_supported(&self) -> bool {
        self.af_modes.contains(&AfMode::ContinuousPicture)
    }

    pub fn is_auto_exposure_supported(&self, mode: AeMode) -> bool {
        self.ae_modes.contains(&mode)
    }

    pub fn is_auto_white_balance_supported(&self) -> bool {
        self.awb_modes.contains(&AwbMode::Auto)
    }

    /// Largest supported output size for `format`, compared by area.
    pub fn largest_output_size(&self, format: ImageFormat) -> Option<Size> {
        self.output_sizes
            .get(&format)?
            .iter()
            .copied()
            .max_by_key(Size::area)
    }
}
