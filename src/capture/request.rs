use crate::platform::{
    AeMode, AfMode, AfTrigger, AwbMode, CameraCharacteristics, CaptureRequest, ControlMode,
    PrecaptureTrigger, RequestTemplate, Surface,
};

/// Default 3A modes reapplied to every request so preview and still capture
/// never drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPolicy {
    continuous_af: bool,
    ae_mode: AeMode,
    awb_auto: bool,
}

impl RequestPolicy {
    pub fn new(characteristics: &CameraCharacteristics, preferred_ae: AeMode) -> Self {
        let ae_mode = if characteristics.is_auto_exposure_supported(preferred_ae) {
            preferred_ae
        } else {
            AeMode::On
        };

        Self {
            continuous_af: characteristics.is_continuous_auto_focus_supported(),
            ae_mode,
            awb_auto: characteristics.is_auto_white_balance_supported(),
        }
    }

    pub fn continuous_af(&self) -> bool {
        self.continuous_af
    }

    pub fn ae_mode(&self) -> AeMode {
        self.ae_mode
    }

    pub fn apply_defaults(&self, request: &mut CaptureRequest) {
        request.control_mode = Some(ControlMode::Auto);
        request.af_mode = Some(if self.continuous_af {
            AfMode::ContinuousPicture
        } else {
            AfMode::Auto
        });
        request.ae_mode = Some(self.ae_mode);
        if self.awb_auto {
            request.awb_mode = Some(AwbMode::Auto);
        }
    }

    /// Repeating preview request.
    pub fn preview(&self, preview: Surface) -> CaptureRequest {
        let mut request = CaptureRequest::new(RequestTemplate::Preview);
        request.add_target(preview);
        self.apply_defaults(&mut request);
        request
    }

    /// One-shot request starting focus lock. Continuous AF is already running
    /// from the preview request, so the trigger is only sent without it.
    pub fn focus_lock(&self, preview: Surface) -> CaptureRequest {
        let mut request = self.preview(preview);
        if !self.continuous_af {
            request.af_trigger = Some(AfTrigger::Start);
        }
        request
    }

    /// One-shot request starting AE pre-capture metering.
    pub fn precapture(&self, preview: Surface) -> CaptureRequest {
        let mut request = self.preview(preview);
        request.precapture_trigger = Some(PrecaptureTrigger::Start);
        request
    }

    /// Still capture into the reader, keeping the preview surface fed.
    pub fn still(&self, still: Surface, preview: Surface) -> CaptureRequest {
        let mut request = CaptureRequest::new(RequestTemplate::StillCapture);
        self.apply_defaults(&mut request);
        request.add_target(still);
        request.add_target(preview);
        request
    }
}
