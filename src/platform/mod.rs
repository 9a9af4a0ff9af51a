//! Contract with the camera platform.
//!
//! The controller never talks to hardware directly. A platform exposes a
//! provider that enumerates and opens devices, devices that build capture
//! sessions, sessions that accept requests, and image readers that hold still
//! buffers. Every asynchronous completion is delivered by posting a task to
//! the [`Executor`] passed with the call. Implementations must not invoke a
//! listener inline from inside one of these methods.

mod image;
pub mod sim;
mod types;

pub use image::PendingImage;
pub use types::{
    AeMode, AeState, AfMode, AfState, AfTrigger, AwbMode, CameraCharacteristics, CaptureRequest,
    ControlMode, DeviceErrorCode, FrameMetadata, ImageFormat, LensFacing, PrecaptureTrigger,
    RequestTemplate, Size, Surface,
};

use crate::error::PlatformResult;
use crate::executor::Executor;
use std::fmt;
use std::sync::Arc;

/// Enumerates and opens camera devices.
pub trait CameraProvider: Send + Sync {
    fn camera_ids(&self) -> PlatformResult<Vec<String>>;

    fn characteristics(&self, camera_id: &str) -> PlatformResult<CameraCharacteristics>;

    /// Start opening `camera_id`. The outcome arrives as a [`DeviceEvent`].
    fn open_camera(
        &self,
        camera_id: &str,
        listener: Arc<dyn DeviceStateListener>,
        executor: Executor,
    ) -> PlatformResult<()>;

    fn new_image_reader(
        &self,
        size: Size,
        format: ImageFormat,
        max_images: usize,
    ) -> PlatformResult<Arc<dyn ImageReader>>;
}

/// An open camera device.
pub trait CameraDevice: Send + Sync {
    fn id(&self) -> &str;

    /// Start configuring a session writing to `outputs`. The outcome arrives
    /// through `listener`.
    fn create_capture_session(
        &self,
        outputs: Vec<Surface>,
        listener: Arc<dyn SessionStateListener>,
        executor: Executor,
    ) -> PlatformResult<()>;

    /// Close the device. Must be idempotent.
    fn close(&self);
}

/// A configured capture pipeline.
pub trait CaptureSession: Send + Sync {
    fn capture(
        &self,
        request: CaptureRequest,
        listener: Arc<dyn CaptureListener>,
        executor: Executor,
    ) -> PlatformResult<()>;

    fn set_repeating_request(
        &self,
        request: CaptureRequest,
        listener: Arc<dyn CaptureListener>,
        executor: Executor,
    ) -> PlatformResult<()>;

    fn stop_repeating(&self) -> PlatformResult<()>;

    /// Close the session. Must be idempotent.
    fn close(&self);
}

/// A queue of still-image buffers fed by a capture output.
pub trait ImageReader: Send + Sync {
    fn surface(&self) -> Surface;

    fn size(&self) -> Size;

    /// Replace the image-available listener. `None` clears it.
    fn set_on_image_available(
        &self,
        listener: Option<Arc<dyn ImageAvailableListener>>,
        executor: Executor,
    );

    fn acquire_next_image(&self) -> PlatformResult<Option<PendingImage>>;

    fn close(&self);
}

/// A drawable preview target supplied by the UI layer.
pub trait RenderTarget: Send + Sync {
    fn surface(&self) -> Surface;

    /// Give the surface back to its owner.
    fn release(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceEventKind {
    Opened,
    Closed,
    Disconnected,
    Error,
}

/// Lifecycle notification for a device.
#[derive(Clone)]
pub enum DeviceEvent {
    Opened(Arc<dyn CameraDevice>),
    Closed(Arc<dyn CameraDevice>),
    Disconnected(Arc<dyn CameraDevice>),
    Error(Arc<dyn CameraDevice>, DeviceErrorCode),
}

impl DeviceEvent {
    pub fn kind(&self) -> DeviceEventKind {
        match self {
            DeviceEvent::Opened(_) => DeviceEventKind::Opened,
            DeviceEvent::Closed(_) => DeviceEventKind::Closed,
            DeviceEvent::Disconnected(_) => DeviceEventKind::Disconnected,
            DeviceEvent::Error(_, _) => DeviceEventKind::Error,
        }
    }

    pub fn device(&self) -> &Arc<dyn CameraDevice> {
        match self {
            DeviceEvent::Opened(device)
            | DeviceEvent::Closed(device)
            | DeviceEvent::Disconnected(device)
            | DeviceEvent::Error(device, _) => device,
        }
    }
}

impl fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceEvent::Error(device, code) => {
                write!(f, "Error({}, {:?})", device.id(), code)
            }
            other => write!(f, "{:?}({})", other.kind(), other.device().id()),
        }
    }
}

pub trait DeviceStateListener: Send + Sync {
    fn on_device_event(&self, event: DeviceEvent);
}

pub trait SessionStateListener: Send + Sync {
    fn on_configured(&self, session: Arc<dyn CaptureSession>);

    fn on_configure_failed(&self);
}

/// Per-request result callbacks.
pub trait CaptureListener: Send + Sync {
    fn on_capture_progressed(&self, partial: &FrameMetadata) {
        let _ = partial;
    }

    fn on_capture_completed(&self, result: &FrameMetadata);
}

pub trait ImageAvailableListener: Send + Sync {
    fn on_image_available(&self);
}
