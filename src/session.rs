use crate::device::Liveness;
use crate::error::{PlatformResult, Result, StillcamError};
use crate::executor::Executor;
use crate::platform::{
    CameraCharacteristics, CameraDevice, CameraProvider, CaptureSession, ImageFormat, ImageReader,
    RenderTarget, SessionStateListener, Size, Surface,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session requested since the last close
    Idle,
    /// Waiting for the platform to configure the latest request
    Configuring,
    Active,
    /// The latest configuration failed; call `start` again
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Configuring => "configuring",
            SessionStatus::Active => "active",
            SessionStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Surfaces bound to the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTargets {
    pub generation: u64,
    pub preview: Surface,
    pub still: Surface,
}

struct SessionSlot {
    generation: u64,
    status: SessionStatus,
    session: Option<Arc<dyn CaptureSession>>,
    reader: Option<Arc<dyn ImageReader>>,
    preview: Option<Arc<dyn RenderTarget>>,
}

impl SessionSlot {
    fn targets(&self) -> Option<SessionTargets> {
        match (&self.reader, &self.preview) {
            (Some(reader), Some(preview)) => Some(SessionTargets {
                generation: self.generation,
                preview: preview.surface(),
                still: reader.surface(),
            }),
            _ => None,
        }
    }
}

/// Owner of the live capture session, the still-image reader and the
/// preview target.
///
/// Each [`start`](Self::start) opens a new generation. Configuration results
/// for older generations are discarded, and every submission checks liveness
/// and the current session under the slot lock.
pub struct SessionCoordinator {
    provider: Arc<dyn CameraProvider>,
    characteristics: CameraCharacteristics,
    still_format: ImageFormat,
    max_images: usize,
    liveness: Liveness,
    slot: Mutex<SessionSlot>,
}

impl SessionCoordinator {
    pub fn new(
        provider: Arc<dyn CameraProvider>,
        characteristics: CameraCharacteristics,
        still_format: ImageFormat,
        max_images: usize,
        liveness: Liveness,
    ) -> Self {
        Self {
            provider,
            characteristics,
            still_format,
            max_images,
            liveness,
            slot: Mutex::new(SessionSlot {
                generation: 0,
                status: SessionStatus::Idle,
                session: None,
                reader: None,
                preview: None,
            }),
        }
    }

    /// Largest supported size for the still format.
    pub fn still_size(&self) -> Result<Size> {
        self.characteristics
            .largest_output_size(self.still_format)
            .ok_or_else(|| {
                StillcamError::configuration_failed(format!(
                    "device reports no {} output sizes",
                    self.still_format.as_str()
                ))
            })
    }

    /// Create the still reader and request a session bound to the preview
    /// and reader surfaces. `listener` builds the configuration listener for
    /// the new generation, which is returned.
    pub fn start<L>(
        &self,
        device: &Arc<dyn CameraDevice>,
        preview: Arc<dyn RenderTarget>,
        executor: Executor,
        listener: L,
    ) -> Result<u64>
    where
        L: FnOnce(u64) -> Arc<dyn SessionStateListener>,
    {
        let size = self.still_size()?;
        let reader = self
            .provider
            .new_image_reader(size, self.still_format, self.max_images)?;

        let mut slot = self.slot.lock();
        slot.generation += 1;
        let generation = slot.generation;

        if let Some(previous) = slot.reader.replace(Arc::clone(&reader)) {
            previous.close();
        }
        slot.preview = Some(Arc::clone(&preview));
        slot.status = SessionStatus::Configuring;

        let outputs = vec![preview.surface(), reader.surface()];
        info!(
            "Configuring capture session (generation {}, still {} {})",
            generation,
            size,
            self.still_format.as_str()
        );

        if let Err(e) = device.create_capture_session(outputs, listener(generation), executor) {
            warn!("Capture session request rejected: {}", e);
            slot.status = SessionStatus::Failed;
            return Err(e.into());
        }

        Ok(generation)
    }

    /// Store a configured session. Returns `false`, closing the session, when
    /// `generation` is superseded or the device is no longer live.
    pub fn accept(&self, generation: u64, session: Arc<dyn CaptureSession>) -> bool {
        let mut slot = self.slot.lock();
        if generation != slot.generation || !self.liveness.is_live() {
            debug!(
                "Discarding session for generation {} (current {}, live {})",
                generation,
                slot.generation,
                self.liveness.is_live()
            );
            drop(slot);
            session.close();
            return false;
        }

        if slot.session.replace(session).is_some() {
            debug!("Previous capture session superseded");
        }
        slot.status = SessionStatus::Active;
        info!("Capture session configured (generation {})", generation);
        true
    }

    pub fn configure_failed(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if generation != slot.generation {
            debug!("Ignoring configure failure for stale generation {}", generation);
            return;
        }
        warn!("Capture session configuration failed (generation {})", generation);
        slot.status = SessionStatus::Failed;
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.slot.lock().generation == generation
    }

    /// Run `submit` against the current session.
    pub fn submit<F>(&self, submit: F) -> Result<()>
    where
        F: FnOnce(&dyn CaptureSession, &SessionTargets) -> PlatformResult<()>,
    {
        self.submit_inner(None, submit)
    }

    /// Like [`submit`](Self::submit), failing with
    /// [`StillcamError::SessionNotReady`] if `generation` is superseded.
    pub fn submit_for<F>(&self, generation: u64, submit: F) -> Result<()>
    where
        F: FnOnce(&dyn CaptureSession, &SessionTargets) -> PlatformResult<()>,
    {
        self.submit_inner(Some(generation), submit)
    }

    fn submit_inner<F>(&self, generation: Option<u64>, submit: F) -> Result<()>
    where
        F: FnOnce(&dyn CaptureSession, &SessionTargets) -> PlatformResult<()>,
    {
        let slot = self.slot.lock();
        if !self.liveness.is_live() {
            return Err(StillcamError::DeviceNotReady);
        }
        if generation.is_some_and(|generation| generation != slot.generation) {
            return Err(StillcamError::SessionNotReady);
        }

        let session = match (&slot.session, slot.status) {
            (Some(session), SessionStatus::Active) => session,
            _ => return Err(StillcamError::SessionNotReady),
        };
        let targets = slot.targets().ok_or(StillcamError::SessionNotReady)?;

        submit(session.as_ref(), &targets)?;
        Ok(())
    }

    pub fn reader(&self) -> Option<Arc<dyn ImageReader>> {
        self.slot.lock().reader.clone()
    }

    /// Size of the still reader of the latest `start`.
    pub fn capture_size(&self) -> Option<Size> {
        self.slot.lock().reader.as_ref().map(|reader| reader.size())
    }

    pub fn status(&self) -> SessionStatus {
        self.slot.lock().status
    }

    pub fn generation(&self) -> u64 {
        self.slot.lock().generation
    }

    /// Close the session and reader and hand the preview target back.
    /// Idempotent.
    pub fn close(&self) {
        let (session, reader, preview) = {
            let mut slot = self.slot.lock();
            // Anything configured after this point belongs to a dead generation.
            slot.generation += 1;
            slot.status = SessionStatus::Idle;
            (slot.session.take(), slot.reader.take(), slot.preview.take())
        };

        if session.is_none() && reader.is_none() && preview.is_none() {
            return;
        }

        if let Some(session) = session {
            session.close();
        }
        if let Some(reader) = reader {
            reader.close();
        }
        if let Some(preview) = preview {
            preview.release();
        }
        debug!("Capture session closed");
    }
}
