use super::listeners::FrameListener;
use super::*;
use crate::config::TimingConfig;
use crate::delivery::ImageJob;
use crate::error::PlatformError;
use crate::platform::sim::{OpenBehavior, SimCamera, SimDeviceSpec, SimRenderTarget};
use crate::platform::{
    AeMode, AeState, AfMode, AfTrigger, CaptureListener, DeviceErrorCode, ImageFormat, ImageReader,
    LensFacing, PendingImage, PrecaptureTrigger, RequestTemplate,
};
use crossbeam::channel;

const SETTLE: Duration = Duration::from_secs(2);

fn test_config() -> StillcamConfig {
    let mut config = StillcamConfig::default();
    config.timing = TimingConfig {
        open_timeout_ms: 200,
        close_timeout_ms: 200,
        preview_timeout_ms: 200,
    };
    config.system.worker_name = "test-camera".to_string();
    config
}

struct Harness {
    sim: SimCamera,
    controller: CameraController,
    delivered: Arc<Mutex<Vec<usize>>>,
}

impl Harness {
    fn new() -> Self {
        Self::with_sim(SimCamera::default_rig())
    }

    fn with_sim(sim: SimCamera) -> Self {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&delivered);
        let handler = move |image: PendingImage| -> ImageJob {
            let seen = Arc::clone(&seen);
            Box::new(move || {
                seen.lock().push(image.data().len());
                Ok(())
            })
        };

        let controller =
            CameraController::new(Arc::new(sim.clone()), test_config(), Arc::new(handler))
                .unwrap();
        Self {
            sim,
            controller,
            delivered,
        }
    }

    fn settle(&self) {
        assert!(self.controller.wait_idle(SETTLE));
    }

    fn open(&self) {
        self.controller.open().unwrap();
        self.settle();
        assert!(self.controller.is_open());
    }

    /// Open, configure a session and wait for preview to run.
    fn previewing(&self) -> Arc<SimRenderTarget> {
        self.open();
        let preview = self.sim.new_render_target();
        self.controller.start(preview.clone()).unwrap();
        self.settle();
        assert_eq!(self.controller.session_status(), SessionStatus::Active);
        assert_eq!(self.controller.capture_state(), CaptureState::Previewing);
        preview
    }

    fn emit(&self, af: Option<AfState>, ae: Option<AeState>) {
        assert!(self.sim.emit_frame(FrameMetadata::new(af, ae)));
        self.settle();
    }
}

#[test]
fn test_new_selects_first_non_back_camera() {
    let harness = Harness::new();
    assert_eq!(harness.controller.camera_id(), "1");
    assert_eq!(
        harness.controller.characteristics().lens_facing,
        Some(LensFacing::Front)
    );
    assert!(!harness.controller.is_open());
}

#[test]
fn test_new_without_matching_device_fails() {
    let sim = SimCamera::new(vec![SimDeviceSpec::new("0", Some(LensFacing::Back))]);
    let handler = |_image: PendingImage| -> ImageJob { Box::new(|| Ok(())) };

    let err = CameraController::new(Arc::new(sim), test_config(), Arc::new(handler))
        .err()
        .unwrap();
    assert!(matches!(err, StillcamError::DeviceUnavailable { .. }));
    assert!(!err.is_recoverable());
}

#[test]
fn test_new_rejects_invalid_config() {
    let mut config = test_config();
    config.camera.max_images = 0;
    let handler = |_image: PendingImage| -> ImageJob { Box::new(|| Ok(())) };

    let err = CameraController::new(Arc::new(SimCamera::default_rig()), config, Arc::new(handler))
        .err()
        .unwrap();
    assert!(matches!(err, StillcamError::Config(_)));
}

#[test]
fn test_capture_size_is_largest_jpeg() {
    let harness = Harness::new();
    assert_eq!(harness.controller.capture_size().unwrap(), Size::new(4032, 3024));
}

#[test]
fn test_open_and_close_are_idempotent() {
    let harness = Harness::new();
    harness.open();
    harness.controller.open().unwrap();
    harness.settle();
    assert_eq!(harness.sim.counters().opens, 1);

    harness.controller.close();
    harness.controller.close();

    assert!(!harness.controller.is_open());
    assert!(!harness.controller.is_live());
    assert_eq!(harness.sim.counters().device_closes, 1);
}

#[test]
fn test_open_while_pending_reports_busy() {
    let harness = Harness::new();
    harness.sim.set_open_behavior(OpenBehavior::Hang);

    harness.controller.open().unwrap();
    let err = harness.controller.open().unwrap_err();
    assert!(matches!(err, StillcamError::ResourceBusy { .. }));

    // Close still completes and frees the camera for the next open.
    harness.controller.close();
    harness.sim.set_open_behavior(OpenBehavior::Succeed);
    harness.open();
}

#[test]
fn test_operations_require_open_device_and_session() {
    let harness = Harness::new();
    assert!(matches!(
        harness.controller.take_picture(),
        Err(StillcamError::DeviceNotReady)
    ));
    assert!(matches!(
        harness.controller.start(harness.sim.new_render_target()),
        Err(StillcamError::DeviceNotReady)
    ));

    harness.open();
    assert!(matches!(
        harness.controller.take_picture(),
        Err(StillcamError::SessionNotReady)
    ));
    assert!(matches!(
        harness.controller.resume_preview(),
        Err(StillcamError::SessionNotReady)
    ));
}

#[test]
fn test_start_arms_repeating_preview() {
    let harness = Harness::new();
    let preview = harness.previewing();

    let requests = harness.sim.requests();
    assert_eq!(requests.len(), 1);
    let preview_request = &requests[0];
    assert!(preview_request.repeating);
    assert_eq!(preview_request.request.template, RequestTemplate::Preview);
    assert_eq!(preview_request.request.targets, vec![preview.surface()]);
    assert_eq!(preview_request.request.af_mode, Some(AfMode::ContinuousPicture));
    assert_eq!(preview_request.request.ae_mode, Some(AeMode::On));
    assert!(harness.controller.config().timing.preview_timeout() > Duration::ZERO);
}

#[test]
fn test_full_capture_flow() {
    let harness = Harness::new();
    let preview = harness.previewing();

    harness.controller.take_picture().unwrap();
    harness.settle();
    assert_eq!(harness.controller.capture_state(), CaptureState::WaitingFocusLock);

    let lock_request = harness.sim.requests().last().cloned().unwrap();
    assert!(!lock_request.repeating);
    assert_eq!(lock_request.request.af_trigger, None);

    harness.emit(Some(AfState::Inactive), Some(AeState::Converged));

    assert_eq!(harness.controller.capture_state(), CaptureState::Taken);
    let stills = harness.sim.still_requests();
    assert_eq!(stills.len(), 1);
    let reader_surface = harness.sim.readers()[0].surface();
    assert_eq!(
        stills[0].request.targets,
        vec![reader_surface, preview.surface()]
    );
    assert_eq!(harness.sim.counters().stop_repeating, 1);

    assert_eq!(*harness.delivered.lock(), vec![68]);
    assert_eq!(harness.sim.images_released(), 1);

    let stats = harness.controller.stats();
    assert_eq!(stats.shots_requested, 1);
    assert_eq!(stats.stills_captured, 1);
    assert_eq!(stats.images_delivered, 1);
    assert_eq!(stats.jobs_failed, 0);
}

#[test]
fn test_taken_blocks_new_shot_until_preview_resumes() {
    let harness = Harness::new();
    harness.previewing();

    harness.controller.take_picture().unwrap();
    harness.settle();
    harness.emit(Some(AfState::FocusedLocked), None);
    assert_eq!(harness.controller.capture_state(), CaptureState::Taken);

    // More frames never leave Taken.
    harness.emit(Some(AfState::PassiveScan), Some(AeState::Precapture));
    assert_eq!(harness.controller.capture_state(), CaptureState::Taken);
    assert!(matches!(
        harness.controller.take_picture(),
        Err(StillcamError::CaptureInProgress {
            state: CaptureState::Taken
        })
    ));

    harness.controller.resume_preview().unwrap();
    assert_eq!(harness.controller.capture_state(), CaptureState::Previewing);

    harness.controller.take_picture().unwrap();
    harness.settle();
    harness.emit(Some(AfState::FocusedLocked), Some(AeState::Converged));
    assert_eq!(harness.sim.still_requests().len(), 2);
    assert_eq!(harness.delivered.lock().len(), 2);
}

#[test]
fn test_precapture_flow() {
    let harness = Harness::new();
    harness.previewing();
    harness.controller.take_picture().unwrap();
    harness.settle();

    harness.emit(Some(AfState::FocusedLocked), Some(AeState::Precapture));
    assert_eq!(harness.controller.capture_state(), CaptureState::WaitingPrecapture);
    let precapture = harness.sim.requests().last().cloned().unwrap();
    assert_eq!(
        precapture.request.precapture_trigger,
        Some(PrecaptureTrigger::Start)
    );

    harness.emit(Some(AfState::FocusedLocked), Some(AeState::Converged));
    assert_eq!(
        harness.controller.capture_state(),
        CaptureState::WaitingNonPrecapture
    );
    assert!(harness.sim.still_requests().is_empty());

    harness.emit(None, Some(AeState::Converged));
    assert_eq!(harness.controller.capture_state(), CaptureState::Taken);
    assert_eq!(harness.sim.still_requests().len(), 1);
}

#[test]
fn test_focus_listener_sees_distinct_states() {
    let harness = Harness::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    harness
        .controller
        .set_focus_listener(Some(Arc::new(move |state: AfState| sink.lock().push(state))));
    harness.previewing();

    for af in [
        AfState::PassiveScan,
        AfState::PassiveScan,
        AfState::PassiveFocused,
        AfState::PassiveFocused,
    ] {
        harness.emit(Some(af), None);
    }

    assert_eq!(
        *seen.lock(),
        vec![AfState::PassiveScan, AfState::PassiveFocused]
    );
    assert_eq!(harness.controller.stats().focus_notifications, 2);
}

#[test]
fn test_callbacks_after_close_have_no_effect() {
    let harness = Harness::new();
    harness.previewing();
    harness.controller.take_picture().unwrap();
    harness.settle();
    let submitted = harness.sim.requests().len();
    let generation = harness.controller.inner.session.generation();
    let executor = harness.controller.inner.lifecycle.executor().unwrap();

    harness.controller.close();
    harness.sim.emit_frame(FrameMetadata::new(
        Some(AfState::FocusedLocked),
        Some(AeState::Converged),
    ));
    harness.sim.disconnect();
    // Returns once the worker has drained its queue and exited.
    assert!(executor.wait_idle(SETTLE));
    assert!(executor.is_stopped());

    // A frame callback already in flight when close ran.
    let late = FrameListener::new(Arc::downgrade(&harness.controller.inner), generation);
    late.on_capture_completed(&FrameMetadata::new(
        Some(AfState::FocusedLocked),
        Some(AeState::Converged),
    ));

    assert_eq!(harness.sim.requests().len(), submitted);
    assert_eq!(harness.controller.capture_state(), CaptureState::WaitingFocusLock);
    assert_eq!(harness.controller.stats().stale_callbacks, 1);
    assert!(!harness.controller.is_open());
    assert!(harness.delivered.lock().is_empty());
    assert_eq!(harness.sim.counters().sessions_closed, 1);
    assert_eq!(harness.sim.counters().readers_closed, 1);
}

#[test]
fn test_close_releases_preview_target() {
    let harness = Harness::new();
    let preview = harness.previewing();

    harness.controller.close();
    harness.controller.close();
    assert_eq!(preview.release_count(), 1);
    assert_eq!(harness.controller.session_status(), SessionStatus::Idle);
}

#[test]
fn test_configure_failure_then_retry() {
    let harness = Harness::new();
    harness.open();
    harness.sim.set_configure_fails(true);

    harness
        .controller
        .start(harness.sim.new_render_target())
        .unwrap();
    harness.settle();
    assert_eq!(harness.controller.session_status(), SessionStatus::Failed);
    assert!(matches!(
        harness.controller.take_picture(),
        Err(StillcamError::SessionNotReady)
    ));

    harness.sim.set_configure_fails(false);
    harness
        .controller
        .start(harness.sim.new_render_target())
        .unwrap();
    harness.settle();
    assert_eq!(harness.controller.session_status(), SessionStatus::Active);
    assert!(harness.controller.take_picture().is_ok());
}

#[test]
fn test_superseded_session_is_discarded() {
    let harness = Harness::new();
    harness.open();

    // Hold the worker so both configuration results queue up behind it.
    let (release, blocked) = channel::bounded::<()>(1);
    let executor = harness.controller.inner.lifecycle.executor().unwrap();
    executor.post(move || {
        let _ = blocked.recv_timeout(SETTLE);
    });

    harness
        .controller
        .start(harness.sim.new_render_target())
        .unwrap();
    harness
        .controller
        .start(harness.sim.new_render_target())
        .unwrap();
    release.send(()).unwrap();
    harness.settle();

    let counters = harness.sim.counters();
    assert_eq!(counters.sessions_created, 2);
    assert_eq!(counters.sessions_closed, 1);
    assert_eq!(counters.readers_closed, 1);
    assert_eq!(harness.controller.session_status(), SessionStatus::Active);
    assert_eq!(harness.controller.stats().stale_callbacks, 1);
    assert_eq!(harness.sim.requests().len(), 1);
}

#[test]
fn test_rejected_focus_lock_leaves_machine_parked() {
    let harness = Harness::new();
    harness.previewing();
    harness.sim.set_capture_error(Some(PlatformError::AccessDenied));

    assert!(harness.controller.take_picture().is_ok());
    assert_eq!(harness.controller.capture_state(), CaptureState::WaitingFocusLock);
    assert_eq!(harness.controller.stats().submission_failures, 1);

    // Preview frames keep arriving; the sequence continues once the
    // platform accepts requests again.
    harness.sim.set_capture_error(None);
    harness.emit(Some(AfState::Inactive), None);
    assert_eq!(harness.controller.capture_state(), CaptureState::Taken);
    assert_eq!(harness.sim.still_requests().len(), 1);
}

#[test]
fn test_failed_still_request_parks_in_taken() {
    let harness = Harness::new();
    harness.previewing();
    harness.controller.take_picture().unwrap();
    harness.settle();

    harness.sim.set_capture_error(Some(PlatformError::IllegalState));
    harness.emit(Some(AfState::Inactive), Some(AeState::Converged));

    assert_eq!(harness.controller.capture_state(), CaptureState::Taken);
    assert!(harness.sim.still_requests().is_empty());
    assert_eq!(harness.controller.stats().submission_failures, 1);
    assert_eq!(harness.controller.stats().stills_captured, 0);
}

#[test]
fn test_failed_job_releases_image_once() {
    let sim = SimCamera::default_rig();
    let handler = |image: PendingImage| -> ImageJob {
        Box::new(move || {
            let _image = image;
            Err(StillcamError::system("storage unavailable"))
        })
    };
    let controller =
        CameraController::new(Arc::new(sim.clone()), test_config(), Arc::new(handler)).unwrap();

    controller.open().unwrap();
    assert!(controller.wait_idle(SETTLE));
    controller.start(sim.new_render_target()).unwrap();
    assert!(controller.wait_idle(SETTLE));
    controller.take_picture().unwrap();
    assert!(controller.wait_idle(SETTLE));
    assert!(sim.emit_frame(FrameMetadata::new(Some(AfState::Inactive), None)));
    assert!(controller.wait_idle(SETTLE));

    assert_eq!(sim.images_released(), 1);
    let stats = controller.stats();
    assert_eq!(stats.images_delivered, 1);
    assert_eq!(stats.jobs_failed, 1);
    assert_eq!(stats.job_success_rate(), 0.0);
}

#[test]
fn test_focus_trigger_sent_without_continuous_af() {
    let characteristics = CameraCharacteristics::new(Some(LensFacing::Front))
        .with_output_sizes(ImageFormat::Jpeg, vec![Size::new(1280, 720)])
        .with_af_modes(vec![AfMode::Auto])
        .with_ae_modes(vec![AeMode::On]);
    let sim = SimCamera::new(vec![
        SimDeviceSpec::new("0", Some(LensFacing::Back)),
        SimDeviceSpec::new("1", Some(LensFacing::Front)).with_characteristics(characteristics),
    ]);
    let harness = Harness::with_sim(sim);
    harness.previewing();

    harness.controller.take_picture().unwrap();
    harness.settle();

    let lock_request = harness.sim.requests().last().cloned().unwrap();
    assert_eq!(lock_request.request.af_trigger, Some(AfTrigger::Start));
    assert_eq!(lock_request.request.af_mode, Some(AfMode::Auto));
    assert_eq!(lock_request.request.awb_mode, None);
    assert_eq!(harness.controller.capture_size().unwrap(), Size::new(1280, 720));
}

#[test]
fn test_unsupported_ae_mode_falls_back() {
    let sim = SimCamera::default_rig();
    let mut config = test_config();
    config.camera.ae_mode = AeMode::OnAlwaysFlash;
    let handler = |_image: PendingImage| -> ImageJob { Box::new(|| Ok(())) };
    let controller =
        CameraController::new(Arc::new(sim.clone()), config, Arc::new(handler)).unwrap();

    controller.open().unwrap();
    assert!(controller.wait_idle(SETTLE));
    controller.start(sim.new_render_target()).unwrap();
    assert!(controller.wait_idle(SETTLE));

    assert_eq!(sim.requests()[0].request.ae_mode, Some(AeMode::On));
}

#[test]
fn test_disconnect_then_reopen() {
    let harness = Harness::new();
    harness.previewing();

    assert!(harness.sim.disconnect());
    harness.settle();
    assert!(!harness.controller.is_open());
    assert!(!harness.controller.is_live());
    assert!(matches!(
        harness.controller.take_picture(),
        Err(StillcamError::DeviceNotReady)
    ));

    harness.previewing();
    assert_eq!(harness.sim.counters().opens, 2);
}

#[test]
fn test_reopen_after_disconnect_needs_new_session() {
    let harness = Harness::new();
    let preview = harness.previewing();
    harness.controller.take_picture().unwrap();
    harness.settle();

    assert!(harness.sim.disconnect());
    harness.settle();
    assert_eq!(harness.controller.session_status(), SessionStatus::Idle);
    assert_eq!(harness.controller.capture_state(), CaptureState::Previewing);
    assert_eq!(preview.release_count(), 1);
    let counters = harness.sim.counters();
    assert_eq!(counters.sessions_closed, 1);
    assert_eq!(counters.readers_closed, 1);

    harness.open();
    let submitted = harness.sim.requests().len();
    assert!(matches!(
        harness.controller.take_picture(),
        Err(StillcamError::SessionNotReady)
    ));
    assert!(matches!(
        harness.controller.resume_preview(),
        Err(StillcamError::SessionNotReady)
    ));
    assert_eq!(harness.sim.requests().len(), submitted);
    assert_eq!(harness.controller.stats().shots_requested, 1);

    harness
        .controller
        .start(harness.sim.new_render_target())
        .unwrap();
    harness.settle();
    harness.controller.take_picture().unwrap();
    harness.settle();
    harness.emit(Some(AfState::Inactive), None);
    assert_eq!(harness.controller.capture_state(), CaptureState::Taken);
    assert_eq!(*harness.delivered.lock(), vec![68]);
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Open,
    Start,
    Close,
    Disconnect,
    Fail,
}

#[test]
fn test_handle_and_session_follow_lifecycle_steps() {
    use SessionStatus::{Active, Idle};

    let harness = Harness::new();
    // (step, device open afterwards, session status afterwards)
    let steps = [
        (Step::Open, true, Idle),
        (Step::Start, true, Active),
        (Step::Disconnect, false, Idle),
        (Step::Open, true, Idle),
        (Step::Start, true, Active),
        (Step::Fail, false, Idle),
        (Step::Open, true, Idle),
        (Step::Close, false, Idle),
        (Step::Close, false, Idle),
        (Step::Disconnect, false, Idle),
        (Step::Open, true, Idle),
        (Step::Start, true, Active),
        (Step::Close, false, Idle),
        (Step::Open, true, Idle),
        (Step::Fail, false, Idle),
    ];

    for (index, (step, open, status)) in steps.into_iter().enumerate() {
        let submitted = harness.sim.requests().len();
        match step {
            Step::Open => harness.controller.open().unwrap(),
            Step::Start => harness
                .controller
                .start(harness.sim.new_render_target())
                .unwrap(),
            Step::Close => harness.controller.close(),
            Step::Disconnect => {
                harness.sim.disconnect();
            }
            Step::Fail => {
                harness.sim.fail_device(DeviceErrorCode::Device);
            }
        }
        harness.settle();

        let context = format!("step {} ({:?})", index, step);
        assert_eq!(harness.controller.is_open(), open, "{}", context);
        assert_eq!(harness.controller.is_live(), open, "{}", context);
        assert_eq!(harness.controller.session_status(), status, "{}", context);

        // Only a freshly configured session submits anything: its preview.
        let expected = submitted + usize::from(matches!(step, Step::Start));
        assert_eq!(harness.sim.requests().len(), expected, "{}", context);

        if status != Active {
            assert!(harness.controller.take_picture().is_err(), "{}", context);
            assert!(harness.controller.resume_preview().is_err(), "{}", context);
            assert_eq!(harness.sim.requests().len(), expected, "{}", context);
        }
    }

    assert_eq!(harness.controller.stats().shots_requested, 0);
}

#[test]
fn test_late_image_from_previous_shot_is_released() {
    let harness = Harness::new();
    harness.previewing();
    harness.sim.set_deliver_stills(false);
    harness.controller.take_picture().unwrap();
    harness.settle();
    harness.emit(Some(AfState::FocusedLocked), Some(AeState::Converged));
    assert_eq!(harness.controller.capture_state(), CaptureState::Taken);

    // The first shot's image lands behind a busy worker while the next shot
    // is armed.
    let (release, blocked) = channel::bounded::<()>(1);
    let executor = harness.controller.inner.lifecycle.executor().unwrap();
    executor.post(move || {
        let _ = blocked.recv_timeout(SETTLE);
    });
    let reader = harness.sim.readers()[0].clone();
    assert!(reader.push_image());
    harness.controller.resume_preview().unwrap();
    harness.controller.take_picture().unwrap();
    release.send(()).unwrap();
    harness.settle();

    assert_eq!(reader.pending_images(), 0);
    assert_eq!(harness.sim.images_released(), 1);
    assert!(harness.delivered.lock().is_empty());

    harness.sim.set_deliver_stills(true);
    harness.emit(Some(AfState::FocusedLocked), Some(AeState::Converged));
    assert_eq!(harness.controller.capture_state(), CaptureState::Taken);
    assert_eq!(*harness.delivered.lock(), vec![68]);
    assert_eq!(harness.sim.images_released(), 2);
}

#[test]
fn test_device_error_on_open() {
    let harness = Harness::new();
    harness
        .sim
        .set_open_behavior(OpenBehavior::Fail(DeviceErrorCode::InUse));

    harness.controller.open().unwrap();
    harness.settle();
    assert!(!harness.controller.is_open());

    harness.sim.set_open_behavior(OpenBehavior::Succeed);
    harness.open();
}

#[test]
fn test_drop_closes_device() {
    let harness = Harness::new();
    harness.previewing();
    let Harness { sim, controller, .. } = harness;

    drop(controller);
    assert_eq!(sim.is_device_closed(), Some(true));
    assert_eq!(sim.counters().sessions_closed, 1);
}
