//! Composition root tying device lifecycle, session and capture sequencing
//! together.
//!
//! A [`CameraController`] is built once per selected device and shared by
//! cloning. Caller threads drive it through the public methods; platform
//! callbacks arrive on the background context through the listeners in
//! [`listeners`], each holding a `Weak` reference back to the controller.

mod listeners;
#[cfg(test)]
mod tests;

use crate::capture::{CaptureCommand, CaptureState, CaptureStateMachine, RequestPolicy};
use crate::config::StillcamConfig;
use crate::delivery::{ImageDeliveryChannel, ImageHandler};
use crate::device::DeviceLifecycleManager;
use crate::error::{Result, StillcamError};
use crate::gate::ResourceGate;
use crate::platform::{
    AfState, CameraCharacteristics, CameraProvider, CaptureSession, FrameMetadata, RenderTarget,
    Size,
};
use crate::selector::{DeviceSelector, SelectedDevice};
use crate::session::{SessionCoordinator, SessionStatus};
use crate::stats::{CaptureStats, CaptureStatsSnapshot};
use listeners::{FrameListener, SessionListener, StillCaptureListener};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Notified with each distinct AF state seen while previewing.
pub trait FocusListener: Send + Sync {
    fn on_focus_changed(&self, state: AfState);
}

impl<F> FocusListener for F
where
    F: Fn(AfState) + Send + Sync,
{
    fn on_focus_changed(&self, state: AfState) {
        self(state)
    }
}

/// Still-camera controller for one selected device.
#[derive(Clone)]
pub struct CameraController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: StillcamConfig,
    selected: SelectedDevice,
    policy: RequestPolicy,
    lifecycle: Arc<DeviceLifecycleManager>,
    session: SessionCoordinator,
    machine: Mutex<CaptureStateMachine>,
    delivery: ImageDeliveryChannel,
    handler: Arc<dyn ImageHandler>,
    focus_listener: Mutex<Option<Arc<dyn FocusListener>>>,
    stats: Arc<CaptureStats>,
}

impl CameraController {
    /// Validate `config` and select a device. Fails with
    /// [`StillcamError::DeviceUnavailable`] when no device matches the
    /// facing policy.
    pub fn new(
        provider: Arc<dyn CameraProvider>,
        config: StillcamConfig,
        handler: Arc<dyn ImageHandler>,
    ) -> Result<Self> {
        config.validate()?;

        let selected = DeviceSelector::new(config.camera.facing).select(provider.as_ref())?;
        let policy = RequestPolicy::new(&selected.characteristics, config.camera.ae_mode);
        if policy.ae_mode() != config.camera.ae_mode {
            warn!(
                "AE mode {} unsupported by camera {}, using {}",
                config.camera.ae_mode.as_str(),
                selected.id,
                policy.ae_mode().as_str()
            );
        }

        let lifecycle = Arc::new(DeviceLifecycleManager::new(
            Arc::clone(&provider),
            selected.id.clone(),
            Arc::new(ResourceGate::new()),
            config.timing.clone(),
            &config.system.worker_name,
        ));
        let liveness = lifecycle.liveness();
        let session = SessionCoordinator::new(
            provider,
            selected.characteristics.clone(),
            config.camera.still_format,
            config.camera.max_images,
            liveness.clone(),
        );
        let stats = Arc::new(CaptureStats::new());
        let delivery = ImageDeliveryChannel::new(liveness, Arc::clone(&stats));

        info!(
            "Camera controller ready for camera {} (continuous AF: {}, AE: {})",
            selected.id,
            policy.continuous_af(),
            policy.ae_mode().as_str()
        );

        let inner = Arc::new(ControllerInner {
            config,
            selected,
            policy,
            lifecycle,
            session,
            machine: Mutex::new(CaptureStateMachine::new()),
            delivery,
            handler,
            focus_listener: Mutex::new(None),
            stats,
        });

        let weak = Arc::downgrade(&inner);
        inner.lifecycle.set_on_device_lost(move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_device_lost();
            }
        });

        Ok(Self { inner })
    }

    /// Start opening the device. Completion is asynchronous; see
    /// [`is_open`](Self::is_open).
    pub fn open(&self) -> Result<()> {
        self.inner.lifecycle.open()
    }

    /// Configure a capture session writing to `preview` and the still
    /// reader. Preview starts once the platform reports the session
    /// configured.
    pub fn start(&self, preview: Arc<dyn RenderTarget>) -> Result<()> {
        let inner = &self.inner;
        let device = inner.lifecycle.device().ok_or(StillcamError::DeviceNotReady)?;
        if !inner.lifecycle.is_live() {
            return Err(StillcamError::DeviceNotReady);
        }
        let executor = inner.lifecycle.executor().ok_or(StillcamError::DeviceNotReady)?;

        let weak = Arc::downgrade(inner);
        inner.session.start(&device, preview, executor, move |generation| {
            Arc::new(SessionListener::new(weak, generation))
        })?;
        Ok(())
    }

    /// Begin a still capture: arm image delivery and lock focus. The rest of
    /// the sequence is driven by frame metadata.
    pub fn take_picture(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.lifecycle.is_open() {
            return Err(StillcamError::DeviceNotReady);
        }
        if !inner.lifecycle.is_live() {
            debug!("take_picture ignored: camera not live");
            return Ok(());
        }
        if inner.session.status() != SessionStatus::Active {
            return Err(StillcamError::SessionNotReady);
        }

        let mut machine = inner.machine.lock();
        if machine.state() != CaptureState::Previewing {
            return Err(StillcamError::CaptureInProgress {
                state: machine.state(),
            });
        }

        let reader = inner.session.reader().ok_or(StillcamError::SessionNotReady)?;
        let executor = inner.lifecycle.executor().ok_or(StillcamError::DeviceNotReady)?;

        let shot = inner
            .delivery
            .arm(&reader, Arc::clone(&inner.handler), executor.clone());
        machine
            .lock_focus()
            .map_err(|state| StillcamError::CaptureInProgress { state })?;
        CaptureStats::incr(&inner.stats.shots_requested);

        let result = inner.session.submit(|session, targets| {
            let request = inner.policy.focus_lock(targets.preview);
            let listener = Arc::new(FrameListener::new(Arc::downgrade(inner), targets.generation));
            session.capture(request, listener, executor)
        });
        match result {
            Ok(()) => info!("Shot {} started: locking focus", shot),
            Err(e) => inner.record_submission_failure("focus lock", &e),
        }
        Ok(())
    }

    /// Re-arm the repeating preview request after a shot and return the
    /// state machine to [`CaptureState::Previewing`].
    pub fn resume_preview(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.lifecycle.is_open() {
            return Err(StillcamError::DeviceNotReady);
        }
        let executor = inner.lifecycle.executor().ok_or(StillcamError::DeviceNotReady)?;

        let mut machine = inner.machine.lock();
        inner.session.submit(|session, targets| {
            let listener = Arc::new(FrameListener::new(Arc::downgrade(inner), targets.generation));
            session.set_repeating_request(inner.policy.preview(targets.preview), listener, executor)
        })?;
        machine.reset();
        debug!("Preview resumed");
        Ok(())
    }

    /// Close session, device and background context. Idempotent; callbacks
    /// delivered afterwards have no effect.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Still size used for the reader: the largest the device supports for
    /// the configured format.
    pub fn capture_size(&self) -> Result<Size> {
        self.inner.session.still_size()
    }

    pub fn capture_state(&self) -> CaptureState {
        self.inner.machine.lock().state()
    }

    pub fn session_status(&self) -> SessionStatus {
        self.inner.session.status()
    }

    pub fn is_open(&self) -> bool {
        self.inner.lifecycle.is_open()
    }

    pub fn is_live(&self) -> bool {
        self.inner.lifecycle.is_live()
    }

    pub fn camera_id(&self) -> &str {
        &self.inner.selected.id
    }

    pub fn characteristics(&self) -> &CameraCharacteristics {
        &self.inner.selected.characteristics
    }

    pub fn config(&self) -> &StillcamConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> CaptureStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn set_focus_listener(&self, listener: Option<Arc<dyn FocusListener>>) {
        *self.inner.focus_listener.lock() = listener;
    }

    /// Wait for queued callbacks, and the work they schedule, to finish.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.inner.lifecycle.wait_idle(timeout)
    }
}

impl ControllerInner {
    fn close(&self) {
        self.lifecycle.close(|| self.session.close());
        debug!("Controller for camera {} closed", self.selected.id);
    }

    /// The device went away underneath an open session. Whatever was built on
    /// it is unusable; `start` must run again after the next open.
    fn on_device_lost(&self) {
        self.machine.lock().reset();
        self.session.close();
        warn!("Camera {} lost, capture session dropped", self.selected.id);
    }

    fn record_submission_failure(&self, what: &str, error: &StillcamError) {
        CaptureStats::incr(&self.stats.submission_failures);
        match error {
            StillcamError::Platform(e) => error!("{} request failed: {}", what, e),
            other => warn!("{} request not submitted: {}", what, other),
        }
    }

    fn on_session_configured(self: &Arc<Self>, generation: u64, session: Arc<dyn CaptureSession>) {
        if !self.session.accept(generation, session) {
            CaptureStats::incr(&self.stats.stale_callbacks);
            return;
        }
        self.arm_preview(generation);
    }

    fn on_session_configure_failed(&self, generation: u64) {
        self.session.configure_failed(generation);
    }

    /// Start the repeating preview request for a freshly configured session.
    fn arm_preview(self: &Arc<Self>, generation: u64) {
        let timeout = self.config.timing.preview_timeout();
        let Some(_permit) = self.lifecycle.gate().try_permit(timeout) else {
            warn!("Camera busy, preview not started (waited {:?})", timeout);
            return;
        };
        let Some(executor) = self.lifecycle.executor() else {
            return;
        };

        let mut machine = self.machine.lock();
        let listener = Arc::new(FrameListener::new(Arc::downgrade(self), generation));
        let result = self.session.submit_for(generation, |session, targets| {
            session.set_repeating_request(self.policy.preview(targets.preview), listener, executor)
        });

        match result {
            Ok(()) => {
                machine.reset();
                info!("Preview started (generation {})", generation);
            }
            Err(e) => self.record_submission_failure("preview", &e),
        }
    }

    fn on_frame(self: &Arc<Self>, generation: u64, frame: &FrameMetadata) {
        if !self.lifecycle.is_live() || !self.session.is_current(generation) {
            trace!("Dropping frame {} from stale session", frame.frame_number);
            CaptureStats::incr(&self.stats.stale_callbacks);
            return;
        }

        let command = {
            let mut machine = self.machine.lock();
            let command = machine.on_frame(frame);
            match command {
                Some(CaptureCommand::TriggerPrecapture) => self.run_precapture(generation),
                Some(CaptureCommand::CaptureStill) => self.capture_still_picture(generation),
                _ => {}
            }
            command
        };

        if let Some(CaptureCommand::NotifyFocus(state)) = command {
            CaptureStats::incr(&self.stats.focus_notifications);
            let listener = self.focus_listener.lock().clone();
            if let Some(listener) = listener {
                listener.on_focus_changed(state);
            }
        }
    }

    fn run_precapture(self: &Arc<Self>, generation: u64) {
        let Some(executor) = self.lifecycle.executor() else {
            return;
        };
        let listener = Arc::new(FrameListener::new(Arc::downgrade(self), generation));
        let result = self.session.submit_for(generation, |session, targets| {
            session.capture(self.policy.precapture(targets.preview), listener, executor)
        });

        match result {
            Ok(()) => debug!("Pre-capture metering triggered"),
            Err(e) => self.record_submission_failure("pre-capture", &e),
        }
    }

    fn capture_still_picture(self: &Arc<Self>, generation: u64) {
        let Some(executor) = self.lifecycle.executor() else {
            return;
        };
        let listener = Arc::new(StillCaptureListener::new(Arc::downgrade(self), generation));
        let result = self.session.submit_for(generation, |session, targets| {
            session.stop_repeating()?;
            session.capture(
                self.policy.still(targets.still, targets.preview),
                listener,
                executor,
            )
        });

        match result {
            Ok(()) => {
                CaptureStats::incr(&self.stats.stills_captured);
                info!("Still capture requested");
            }
            Err(e) => self.record_submission_failure("still capture", &e),
        }
    }
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        if self.lifecycle.is_open() || self.lifecycle.executor().is_some() {
            debug!("Controller dropped while camera {} open", self.selected.id);
            self.close();
        }
    }
}
