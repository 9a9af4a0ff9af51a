use crate::config::TimingConfig;
use crate::error::{Result, StillcamError};
use crate::executor::{BackgroundContext, Executor};
use crate::gate::ResourceGate;
use crate::platform::{
    CameraDevice, CameraProvider, DeviceEvent, DeviceEventKind, DeviceStateListener,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Shared "device is usable" flag. Every callback checks it before touching
/// controller state.
#[derive(Debug, Clone, Default)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_live(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Store `live` and return the previous value.
    pub fn set(&self, live: bool) -> bool {
        self.0.swap(live, Ordering::AcqRel)
    }
}

/// One step applied when a current-epoch device event arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEffect {
    StoreHandle,
    ReleaseGate,
    CloseHandle,
    ClearHandle,
    MarkLive,
    MarkNotLive,
    /// Tear down the session built on the lost handle.
    DropSession,
}

/// Effects for each device event, applied in order.
pub fn lifecycle_effects(kind: DeviceEventKind) -> &'static [LifecycleEffect] {
    use LifecycleEffect::*;

    match kind {
        DeviceEventKind::Opened => &[StoreHandle, ReleaseGate, MarkLive],
        DeviceEventKind::Closed => &[MarkNotLive],
        DeviceEventKind::Disconnected | DeviceEventKind::Error => {
            &[ReleaseGate, CloseHandle, ClearHandle, MarkNotLive, DropSession]
        }
    }
}

struct LifecycleState {
    device: Option<Arc<dyn CameraDevice>>,
    epoch: u64,
    background: Option<BackgroundContext>,
}

type DeviceLostHook = Arc<dyn Fn() + Send + Sync>;

/// Owner of the open device handle, the background context and the liveness
/// flag. Open and close are serialized by the [`ResourceGate`].
pub struct DeviceLifecycleManager {
    provider: Arc<dyn CameraProvider>,
    camera_id: String,
    gate: Arc<ResourceGate>,
    liveness: Liveness,
    timing: TimingConfig,
    worker_name: String,
    state: Mutex<LifecycleState>,
    on_device_lost: Mutex<Option<DeviceLostHook>>,
}

impl DeviceLifecycleManager {
    pub fn new(
        provider: Arc<dyn CameraProvider>,
        camera_id: String,
        gate: Arc<ResourceGate>,
        timing: TimingConfig,
        worker_name: &str,
    ) -> Self {
        Self {
            worker_name: format!("{}-{}", worker_name, camera_id),
            provider,
            camera_id,
            gate,
            liveness: Liveness::new(),
            timing,
            state: Mutex::new(LifecycleState {
                device: None,
                epoch: 0,
                background: None,
            }),
            on_device_lost: Mutex::new(None),
        }
    }

    /// Install the hook run when the current device disconnects or fails.
    /// It runs on the background context after the handle is cleared, with
    /// no lifecycle lock held.
    pub fn set_on_device_lost<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_device_lost.lock() = Some(Arc::new(hook));
    }

    /// Start opening the selected device. Returns once the platform has
    /// accepted the request; the handle is stored by the opened callback.
    pub fn open(self: &Arc<Self>) -> Result<()> {
        let timeout = self.timing.open_timeout();
        if !self.gate.try_acquire(timeout) {
            warn!("Camera {} busy: open timed out after {:?}", self.camera_id, timeout);
            return Err(StillcamError::ResourceBusy { timeout });
        }

        let mut state = self.state.lock();
        if state.device.is_some() {
            debug!("Camera {} already open", self.camera_id);
            self.gate.release();
            return Ok(());
        }

        if state.background.is_none() {
            match BackgroundContext::start(&self.worker_name) {
                Ok(context) => state.background = Some(context),
                Err(e) => {
                    self.gate.release();
                    return Err(e);
                }
            }
        }
        let executor = match state.background.as_ref() {
            Some(context) => context.executor(),
            None => {
                self.gate.release();
                return Err(StillcamError::system("Background context missing after start"));
            }
        };

        state.epoch += 1;
        let listener = Arc::new(LifecycleListener {
            manager: Arc::downgrade(self),
            epoch: state.epoch,
        });

        info!("Opening camera {} (epoch {})", self.camera_id, state.epoch);
        if let Err(e) = self.provider.open_camera(&self.camera_id, listener, executor) {
            error!("Platform rejected open of camera {}: {}", self.camera_id, e);
            self.gate.release();
            return Err(e.into());
        }

        Ok(())
    }

    fn handle_event(&self, epoch: u64, event: DeviceEvent) {
        let mut state = self.state.lock();
        if epoch != state.epoch {
            debug!(
                "Ignoring stale {:?} (epoch {}, current {})",
                event, epoch, state.epoch
            );
            drop(state);
            if event.kind() != DeviceEventKind::Closed {
                event.device().close();
            }
            return;
        }

        debug!("Camera event {:?} (epoch {})", event, epoch);
        let mut drop_session = false;
        for effect in lifecycle_effects(event.kind()) {
            trace!("Applying {:?}", effect);
            match effect {
                LifecycleEffect::StoreHandle => state.device = Some(Arc::clone(event.device())),
                LifecycleEffect::ReleaseGate => self.gate.release(),
                LifecycleEffect::CloseHandle => event.device().close(),
                LifecycleEffect::ClearHandle => state.device = None,
                LifecycleEffect::MarkLive => {
                    self.liveness.set(true);
                }
                LifecycleEffect::MarkNotLive => {
                    self.liveness.set(false);
                }
                LifecycleEffect::DropSession => drop_session = true,
            }
        }
        drop(state);

        match &event {
            DeviceEvent::Opened(_) => info!("Camera {} opened", self.camera_id),
            DeviceEvent::Closed(_) => debug!("Camera {} closed", self.camera_id),
            DeviceEvent::Disconnected(_) => warn!("Camera {} disconnected", self.camera_id),
            DeviceEvent::Error(_, code) => {
                error!("Camera {} reported error {:?}", self.camera_id, code)
            }
        }

        if drop_session {
            let hook = self.on_device_lost.lock().clone();
            if let Some(hook) = hook {
                hook();
            }
        }
    }

    /// Tear everything down: `close_session` runs after the device is marked
    /// not live and before the handle is closed. Safe to call repeatedly and
    /// from a callback running on the background context.
    pub fn close<F>(&self, close_session: F)
    where
        F: FnOnce(),
    {
        let timeout = self.timing.close_timeout();
        if !self.gate.try_acquire(timeout) {
            warn!(
                "Camera {} gate not acquired within {:?}, closing anyway",
                self.camera_id, timeout
            );
        }

        self.liveness.set(false);
        let (device, background) = {
            let mut state = self.state.lock();
            state.epoch += 1;
            (state.device.take(), state.background.take())
        };

        close_session();

        match device {
            Some(device) => {
                info!("Closing camera {}", device.id());
                device.close();
            }
            None => debug!("Camera {} has no open handle", self.camera_id),
        }

        if let Some(background) = background {
            background.stop();
        }

        self.gate.release();
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn device(&self) -> Option<Arc<dyn CameraDevice>> {
        self.state.lock().device.clone()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().device.is_some()
    }

    pub fn is_live(&self) -> bool {
        self.liveness.is_live()
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    pub fn gate(&self) -> &Arc<ResourceGate> {
        &self.gate
    }

    /// Executor of the running background context, if any.
    pub fn executor(&self) -> Option<Executor> {
        self.state
            .lock()
            .background
            .as_ref()
            .map(BackgroundContext::executor)
    }

    pub fn wait_idle(&self, timeout: Duration) -> bool {
        match self.executor() {
            Some(executor) => executor.wait_idle(timeout),
            None => true,
        }
    }
}

struct LifecycleListener {
    manager: Weak<DeviceLifecycleManager>,
    epoch: u64,
}

impl DeviceStateListener for LifecycleListener {
    fn on_device_event(&self, event: DeviceEvent) {
        match self.manager.upgrade() {
            Some(manager) => manager.handle_event(self.epoch, event),
            None => event.device().close(),
        }
    }
}
