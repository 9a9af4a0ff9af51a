use crate::device::Liveness;
use crate::error::Result;
use crate::executor::Executor;
use crate::platform::{ImageAvailableListener, ImageReader, PendingImage};
use crate::stats::CaptureStats;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, trace, warn};

/// Follow-up work for a delivered image, run on the background context.
pub type ImageJob = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Receives each still image. The handler owns the image; dropping it (in
/// the handler or the job) gives the buffer back to the reader.
pub trait ImageHandler: Send + Sync {
    fn on_image(&self, image: PendingImage) -> ImageJob;
}

impl<F> ImageHandler for F
where
    F: Fn(PendingImage) -> ImageJob + Send + Sync,
{
    fn on_image(&self, image: PendingImage) -> ImageJob {
        self(image)
    }
}

/// Per-shot binding between the still reader and the image handler.
pub struct ImageDeliveryChannel {
    shot: Arc<AtomicU64>,
    liveness: Liveness,
    stats: Arc<CaptureStats>,
}

impl ImageDeliveryChannel {
    pub fn new(liveness: Liveness, stats: Arc<CaptureStats>) -> Self {
        Self {
            shot: Arc::new(AtomicU64::new(0)),
            liveness,
            stats,
        }
    }

    /// Register a fresh image-available listener on `reader`. Listeners from
    /// earlier armings stop delivering. Returns the shot number.
    pub fn arm(
        &self,
        reader: &Arc<dyn ImageReader>,
        handler: Arc<dyn ImageHandler>,
        executor: Executor,
    ) -> u64 {
        let shot = self.shot.fetch_add(1, Ordering::AcqRel) + 1;
        let listener = Arc::new(DeliveryListener {
            shot,
            current: Arc::clone(&self.shot),
            reader: Arc::downgrade(reader),
            handler,
            executor: executor.clone(),
            liveness: self.liveness.clone(),
            stats: Arc::clone(&self.stats),
        });

        debug!("Image delivery armed for shot {}", shot);
        reader.set_on_image_available(Some(listener), executor);
        shot
    }

    pub fn current_shot(&self) -> u64 {
        self.shot.load(Ordering::Acquire)
    }
}

struct DeliveryListener {
    shot: u64,
    current: Arc<AtomicU64>,
    reader: Weak<dyn ImageReader>,
    handler: Arc<dyn ImageHandler>,
    executor: Executor,
    liveness: Liveness,
    stats: Arc<CaptureStats>,
}

impl DeliveryListener {
    /// Take the announced image off the reader and release it, so the queue
    /// has room for the next still.
    fn discard(&self) {
        CaptureStats::incr(&self.stats.stale_callbacks);
        let Some(reader) = self.reader.upgrade() else {
            return;
        };
        match reader.acquire_next_image() {
            Ok(Some(image)) => image.close(),
            Ok(None) => {}
            Err(e) => trace!("Stale image not acquired: {}", e),
        }
    }
}

impl ImageAvailableListener for DeliveryListener {
    fn on_image_available(&self) {
        if !self.liveness.is_live() {
            trace!("Image for shot {} arrived after close", self.shot);
            self.discard();
            return;
        }
        if self.current.load(Ordering::Acquire) != self.shot {
            debug!("Discarding image for superseded shot {}", self.shot);
            self.discard();
            return;
        }
        let Some(reader) = self.reader.upgrade() else {
            return;
        };

        let image = match reader.acquire_next_image() {
            Ok(Some(image)) => image,
            Ok(None) => {
                debug!("Image available but reader queue empty");
                return;
            }
            Err(e) => {
                warn!("Failed to acquire still image: {}", e);
                return;
            }
        };

        info!(
            "Still image delivered for shot {} ({} {}, {} bytes)",
            self.shot,
            image.size(),
            image.format().as_str(),
            image.data().len()
        );
        CaptureStats::incr(&self.stats.images_delivered);

        let job = self.handler.on_image(image);
        let stats = Arc::clone(&self.stats);
        let shot = self.shot;
        let posted = self.executor.post(move || {
            if let Err(e) = job() {
                error!("Image job for shot {} failed: {}", shot, e);
                CaptureStats::incr(&stats.jobs_failed);
            }
        });
        if !posted {
            warn!("Background context stopped, image job for shot {} dropped", shot);
        }
    }
}
