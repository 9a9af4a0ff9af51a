//! In-memory camera platform.
//!
//! Implements every platform trait without hardware. Opening, session
//! configuration and still capture complete on their own (through the
//! supplied executor, like a real platform would); frame metadata and
//! lifecycle faults are injected by the caller. Every submitted request is
//! recorded so callers can assert on what reached the "device".

use super::{
    AeMode, AfMode, AwbMode, CameraCharacteristics, CameraDevice, CameraProvider, CaptureListener,
    CaptureRequest, CaptureSession, DeviceErrorCode, DeviceEvent, DeviceStateListener,
    FrameMetadata, ImageAvailableListener, ImageFormat, ImageReader, LensFacing, PendingImage,
    RenderTarget, RequestTemplate, SessionStateListener, Size, Surface,
};
use crate::error::{PlatformError, PlatformResult};
use crate::executor::Executor;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// A device the simulated platform reports.
#[derive(Debug, Clone)]
pub struct SimDeviceSpec {
    pub id: String,
    pub characteristics: CameraCharacteristics,
}

impl SimDeviceSpec {
    pub fn new<S: Into<String>>(id: S, facing: Option<LensFacing>) -> Self {
        Self {
            id: id.into(),
            characteristics: default_characteristics(facing),
        }
    }

    pub fn with_characteristics(mut self, characteristics: CameraCharacteristics) -> Self {
        self.characteristics = characteristics;
        self
    }
}

fn default_characteristics(facing: Option<LensFacing>) -> CameraCharacteristics {
    CameraCharacteristics::new(facing)
        .with_output_sizes(
            ImageFormat::Jpeg,
            vec![
                Size::new(640, 480),
                Size::new(4032, 3024),
                Size::new(1920, 1080),
            ],
        )
        .with_af_modes(vec![AfMode::Off, AfMode::Auto, AfMode::ContinuousPicture])
        .with_ae_modes(vec![AeMode::Off, AeMode::On, AeMode::OnAutoFlash])
        .with_awb_modes(vec![AwbMode::Off, AwbMode::Auto])
}

/// How the next `open_camera` call completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    Succeed,
    /// Never completes until [`SimCamera::complete_pending_open`]
    Hang,
    Fail(DeviceErrorCode),
    Disconnect,
    /// Rejected synchronously
    Reject(PlatformError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimCounters {
    pub opens: usize,
    pub device_closes: usize,
    pub sessions_created: usize,
    pub sessions_closed: usize,
    pub stop_repeating: usize,
    pub readers_created: usize,
    pub readers_closed: usize,
}

#[derive(Debug, Clone)]
pub struct SubmittedRequest {
    pub session: u64,
    pub repeating: bool,
    pub request: CaptureRequest,
}

struct PendingOpen {
    device: Arc<SimDevice>,
    listener: Arc<dyn DeviceStateListener>,
    executor: Executor,
}

struct FrameTarget {
    session: u64,
    listener: Arc<dyn CaptureListener>,
    executor: Executor,
}

struct SimState {
    open_behavior: OpenBehavior,
    configure_fails: bool,
    capture_error: Option<PlatformError>,
    deliver_stills: bool,
    counters: SimCounters,
    requests: Vec<SubmittedRequest>,
    device: Option<Arc<SimDevice>>,
    pending_open: Option<PendingOpen>,
    frame_target: Option<FrameTarget>,
    readers: Vec<Arc<SimImageReader>>,
}

struct Shared {
    specs: Vec<SimDeviceSpec>,
    state: Mutex<SimState>,
    next_id: AtomicU64,
    images_released: Arc<AtomicUsize>,
}

impl Shared {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Simulated camera provider. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SimCamera {
    shared: Arc<Shared>,
}

impl SimCamera {
    pub fn new(specs: Vec<SimDeviceSpec>) -> Self {
        Self {
            shared: Arc::new(Shared {
                specs,
                state: Mutex::new(SimState {
                    open_behavior: OpenBehavior::Succeed,
                    configure_fails: false,
                    capture_error: None,
                    deliver_stills: true,
                    counters: SimCounters::default(),
                    requests: Vec::new(),
                    device: None,
                    pending_open: None,
                    frame_target: None,
                    readers: Vec::new(),
                }),
                next_id: AtomicU64::new(0),
                images_released: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// A back camera "0" and a front camera "1".
    pub fn default_rig() -> Self {
        Self::new(vec![
            SimDeviceSpec::new("0", Some(LensFacing::Back)),
            SimDeviceSpec::new("1", Some(LensFacing::Front)),
        ])
    }

    pub fn set_open_behavior(&self, behavior: OpenBehavior) {
        self.shared.state.lock().open_behavior = behavior;
    }

    pub fn set_configure_fails(&self, fails: bool) {
        self.shared.state.lock().configure_fails = fails;
    }

    pub fn set_capture_error(&self, error: Option<PlatformError>) {
        self.shared.state.lock().capture_error = error;
    }

    /// Whether still-capture requests produce an image automatically.
    pub fn set_deliver_stills(&self, deliver: bool) {
        self.shared.state.lock().deliver_stills = deliver;
    }

    pub fn new_render_target(&self) -> Arc<SimRenderTarget> {
        Arc::new(SimRenderTarget {
            surface: Surface::new(self.shared.next_id()),
            releases: AtomicUsize::new(0),
        })
    }

    /// Deliver frame metadata to the listener of the latest preview-template
    /// request. Returns `false` when nothing is listening.
    pub fn emit_frame(&self, frame: FrameMetadata) -> bool {
        let state = self.shared.state.lock();
        match &state.frame_target {
            Some(target) => {
                let listener = Arc::clone(&target.listener);
                trace!("Emitting frame {:?} to session {}", frame, target.session);
                target
                    .executor
                    .post(move || listener.on_capture_completed(&frame))
            }
            None => false,
        }
    }

    /// Finish an open started while the behavior was [`OpenBehavior::Hang`].
    pub fn complete_pending_open(&self) -> bool {
        let pending = self.shared.state.lock().pending_open.take();
        match pending {
            Some(pending) => {
                self.shared.state.lock().device = Some(Arc::clone(&pending.device));
                let device: Arc<dyn CameraDevice> = pending.device;
                let listener = pending.listener;
                pending
                    .executor
                    .post(move || listener.on_device_event(DeviceEvent::Opened(device)))
            }
            None => false,
        }
    }

    /// Report the last opened device as disconnected.
    pub fn disconnect(&self) -> bool {
        self.notify_device(|device| DeviceEvent::Disconnected(device))
    }

    /// Report an error on the last opened device.
    pub fn fail_device(&self, code: DeviceErrorCode) -> bool {
        self.notify_device(move |device| DeviceEvent::Error(device, code))
    }

    fn notify_device<F>(&self, event: F) -> bool
    where
        F: FnOnce(Arc<dyn CameraDevice>) -> DeviceEvent + Send + 'static,
    {
        let device = self.shared.state.lock().device.clone();
        match device {
            Some(device) => {
                let listener = Arc::clone(&device.listener);
                let executor = device.executor.clone();
                let handle: Arc<dyn CameraDevice> = device;
                executor.post(move || listener.on_device_event(event(handle)))
            }
            None => false,
        }
    }

    pub fn counters(&self) -> SimCounters {
        self.shared.state.lock().counters
    }

    pub fn requests(&self) -> Vec<SubmittedRequest> {
        self.shared.state.lock().requests.clone()
    }

    pub fn still_requests(&self) -> Vec<SubmittedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.request.template == RequestTemplate::StillCapture)
            .collect()
    }

    pub fn readers(&self) -> Vec<Arc<SimImageReader>> {
        self.shared.state.lock().readers.clone()
    }

    pub fn images_released(&self) -> usize {
        self.shared.images_released.load(Ordering::SeqCst)
    }

    pub fn is_device_closed(&self) -> Option<bool> {
        self.shared
            .state
            .lock()
            .device
            .as_ref()
            .map(|device| device.closed.load(Ordering::SeqCst))
    }
}

impl CameraProvider for SimCamera {
    fn camera_ids(&self) -> PlatformResult<Vec<String>> {
        Ok(self.shared.specs.iter().map(|spec| spec.id.clone()).collect())
    }

    fn characteristics(&self, camera_id: &str) -> PlatformResult<CameraCharacteristics> {
        self.shared
            .specs
            .iter()
            .find(|spec| spec.id == camera_id)
            .map(|spec| spec.characteristics.clone())
            .ok_or(PlatformError::IllegalState)
    }

    fn open_camera(
        &self,
        camera_id: &str,
        listener: Arc<dyn DeviceStateListener>,
        executor: Executor,
    ) -> PlatformResult<()> {
        if !self.shared.specs.iter().any(|spec| spec.id == camera_id) {
            return Err(PlatformError::IllegalState);
        }

        let mut state = self.shared.state.lock();
        state.counters.opens += 1;

        let behavior = state.open_behavior;
        if let OpenBehavior::Reject(error) = behavior {
            return Err(error);
        }

        let device = Arc::new_cyclic(|this| SimDevice {
            id: camera_id.to_string(),
            shared: Arc::downgrade(&self.shared),
            this: this.clone(),
            listener: Arc::clone(&listener),
            executor: executor.clone(),
            closed: AtomicBool::new(false),
        });
        debug!("Simulated open of camera {} ({:?})", camera_id, behavior);

        let handle: Arc<dyn CameraDevice> = device.clone();
        match behavior {
            OpenBehavior::Succeed => {
                state.device = Some(device);
                executor.post(move || listener.on_device_event(DeviceEvent::Opened(handle)));
            }
            OpenBehavior::Hang => {
                state.pending_open = Some(PendingOpen {
                    device,
                    listener,
                    executor,
                });
            }
            OpenBehavior::Fail(code) => {
                state.device = Some(device);
                executor.post(move || listener.on_device_event(DeviceEvent::Error(handle, code)));
            }
            OpenBehavior::Disconnect => {
                state.device = Some(device);
                executor.post(move || listener.on_device_event(DeviceEvent::Disconnected(handle)));
            }
            OpenBehavior::Reject(_) => unreachable!("rejected above"),
        }

        Ok(())
    }

    fn new_image_reader(
        &self,
        size: Size,
        format: ImageFormat,
        max_images: usize,
    ) -> PlatformResult<Arc<dyn ImageReader>> {
        let reader = Arc::new(SimImageReader {
            surface: Surface::new(self.shared.next_id()),
            size,
            format,
            max_images,
            shared: Arc::downgrade(&self.shared),
            queue: Mutex::new(VecDeque::new()),
            listener: Mutex::new(None),
            closed: AtomicBool::new(false),
            released: Arc::clone(&self.shared.images_released),
        });

        let mut state = self.shared.state.lock();
        state.counters.readers_created += 1;
        state.readers.push(Arc::clone(&reader));

        Ok(reader)
    }
}

pub struct SimDevice {
    id: String,
    shared: Weak<Shared>,
    this: Weak<SimDevice>,
    listener: Arc<dyn DeviceStateListener>,
    executor: Executor,
    closed: AtomicBool,
}

impl CameraDevice for SimDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_capture_session(
        &self,
        outputs: Vec<Surface>,
        listener: Arc<dyn SessionStateListener>,
        executor: Executor,
    ) -> PlatformResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PlatformError::IllegalState);
        }
        let shared = self.shared.upgrade().ok_or(PlatformError::Disconnected)?;

        let session = Arc::new(SimSession {
            id: shared.next_id(),
            outputs,
            shared: Arc::downgrade(&shared),
            closed: AtomicBool::new(false),
        });

        let mut state = shared.state.lock();
        state.counters.sessions_created += 1;

        if state.configure_fails {
            executor.post(move || listener.on_configure_failed());
        } else {
            let session: Arc<dyn CaptureSession> = session;
            executor.post(move || listener.on_configured(session));
        }
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.state.lock().counters.device_closes += 1;
        }
        if let Some(this) = self.this.upgrade() {
            let listener = Arc::clone(&self.listener);
            let device: Arc<dyn CameraDevice> = this;
            self.executor
                .post(move || listener.on_device_event(DeviceEvent::Closed(device)));
        }
    }
}

pub struct SimSession {
    id: u64,
    outputs: Vec<Surface>,
    shared: Weak<Shared>,
    closed: AtomicBool,
}

impl SimSession {
    fn submit(
        &self,
        request: CaptureRequest,
        listener: Arc<dyn CaptureListener>,
        executor: Executor,
        repeating: bool,
    ) -> PlatformResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PlatformError::IllegalState);
        }
        if request.targets.iter().any(|t| !self.outputs.contains(t)) {
            return Err(PlatformError::IllegalState);
        }
        let shared = self.shared.upgrade().ok_or(PlatformError::Disconnected)?;

        let readers = {
            let mut state = shared.state.lock();
            if let Some(error) = state.capture_error {
                return Err(error);
            }

            state.requests.push(SubmittedRequest {
                session: self.id,
                repeating,
                request: request.clone(),
            });

            match request.template {
                RequestTemplate::Preview => {
                    state.frame_target = Some(FrameTarget {
                        session: self.id,
                        listener: Arc::clone(&listener),
                        executor: executor.clone(),
                    });
                    Vec::new()
                }
                RequestTemplate::StillCapture if state.deliver_stills => state
                    .readers
                    .iter()
                    .filter(|reader| request.has_target(reader.surface))
                    .cloned()
                    .collect(),
                RequestTemplate::StillCapture => Vec::new(),
            }
        };

        if request.template == RequestTemplate::StillCapture && !readers.is_empty() {
            let completed = Arc::clone(&listener);
            executor.post(move || completed.on_capture_completed(&FrameMetadata::default()));
            for reader in readers {
                reader.push_image();
            }
        }
        Ok(())
    }
}

impl CaptureSession for SimSession {
    fn capture(
        &self,
        request: CaptureRequest,
        listener: Arc<dyn CaptureListener>,
        executor: Executor,
    ) -> PlatformResult<()> {
        self.submit(request, listener, executor, false)
    }

    fn set_repeating_request(
        &self,
        request: CaptureRequest,
        listener: Arc<dyn CaptureListener>,
        executor: Executor,
    ) -> PlatformResult<()> {
        self.submit(request, listener, executor, true)
    }

    fn stop_repeating(&self) -> PlatformResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PlatformError::IllegalState);
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.state.lock().counters.stop_repeating += 1;
        }
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.state.lock().counters.sessions_closed += 1;
        }
    }
}

pub struct SimImageReader {
    surface: Surface,
    size: Size,
    format: ImageFormat,
    max_images: usize,
    shared: Weak<Shared>,
    queue: Mutex<VecDeque<Vec<u8>>>,
    listener: Mutex<Option<(Arc<dyn ImageAvailableListener>, Executor)>>,
    closed: AtomicBool,
    released: Arc<AtomicUsize>,
}

impl SimImageReader {
    /// Queue a synthetic still and notify the listener, if any.
    pub fn push_image(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }

        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.max_images {
                trace!("Simulated reader full, dropping frame");
                return false;
            }
            // SOI marker, a little payload, EOI marker
            let mut data = vec![0xFF, 0xD8];
            data.extend(std::iter::repeat(0x55).take(64));
            data.extend([0xFF, 0xD9]);
            queue.push_back(data);
        }

        if let Some((listener, executor)) = self.listener.lock().clone() {
            executor.post(move || listener.on_image_available());
        }
        true
    }

    pub fn pending_images(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ImageReader for SimImageReader {
    fn surface(&self) -> Surface {
        self.surface
    }

    fn size(&self) -> Size {
        self.size
    }

    fn set_on_image_available(
        &self,
        listener: Option<Arc<dyn ImageAvailableListener>>,
        executor: Executor,
    ) {
        *self.listener.lock() = listener.map(|listener| (listener, executor));
    }

    fn acquire_next_image(&self) -> PlatformResult<Option<PendingImage>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PlatformError::IllegalState);
        }

        let data = self.queue.lock().pop_front();
        Ok(data.map(|data| {
            let released = Arc::clone(&self.released);
            PendingImage::new(self.size, self.format, data, move || {
                released.fetch_add(1, Ordering::SeqCst);
            })
        }))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.queue.lock().clear();
        self.listener.lock().take();
        if let Some(shared) = self.shared.upgrade() {
            shared.state.lock().counters.readers_closed += 1;
        }
    }
}

pub struct SimRenderTarget {
    surface: Surface,
    releases: AtomicUsize,
}

impl SimRenderTarget {
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl RenderTarget for SimRenderTarget {
    fn surface(&self) -> Surface {
        self.surface
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
