use super::ControllerInner;
use crate::platform::{CaptureListener, CaptureSession, FrameMetadata, SessionStateListener};
use crate::stats::CaptureStats;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Configuration outcome for one session generation.
pub(super) struct SessionListener {
    inner: Weak<ControllerInner>,
    generation: u64,
}

impl SessionListener {
    pub(super) fn new(inner: Weak<ControllerInner>, generation: u64) -> Self {
        Self { inner, generation }
    }
}

impl SessionStateListener for SessionListener {
    fn on_configured(&self, session: Arc<dyn CaptureSession>) {
        match self.inner.upgrade() {
            Some(inner) => inner.on_session_configured(self.generation, session),
            None => session.close(),
        }
    }

    fn on_configure_failed(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_session_configure_failed(self.generation);
        }
    }
}

/// Per-frame metadata for preview, focus-lock and pre-capture requests.
/// Partial and complete results both drive the state machine.
pub(super) struct FrameListener {
    inner: Weak<ControllerInner>,
    generation: u64,
}

impl FrameListener {
    pub(super) fn new(inner: Weak<ControllerInner>, generation: u64) -> Self {
        Self { inner, generation }
    }

    fn process(&self, frame: &FrameMetadata) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_frame(self.generation, frame);
        }
    }
}

impl CaptureListener for FrameListener {
    fn on_capture_progressed(&self, partial: &FrameMetadata) {
        self.process(partial);
    }

    fn on_capture_completed(&self, result: &FrameMetadata) {
        self.process(result);
    }
}

/// Completion of the still request. The image itself arrives through the
/// reader.
pub(super) struct StillCaptureListener {
    inner: Weak<ControllerInner>,
    generation: u64,
}

impl StillCaptureListener {
    pub(super) fn new(inner: Weak<ControllerInner>, generation: u64) -> Self {
        Self { inner, generation }
    }
}

impl CaptureListener for StillCaptureListener {
    fn on_capture_completed(&self, result: &FrameMetadata) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if !inner.lifecycle.is_live() {
            trace!("Still completion after close ignored");
            CaptureStats::incr(&inner.stats.stale_callbacks);
            return;
        }
        debug!(
            "Still capture completed (generation {}, frame {})",
            self.generation, result.frame_number
        );
    }
}
