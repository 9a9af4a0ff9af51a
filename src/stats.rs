use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the capture pipeline, shared between the controller and the
/// callbacks running on the background context.
#[derive(Debug, Default)]
pub struct CaptureStats {
    /// `take_picture` calls that started a focus lock
    pub shots_requested: AtomicU64,
    /// Still-capture requests accepted by the session
    pub stills_captured: AtomicU64,
    /// Images handed to the image handler
    pub images_delivered: AtomicU64,
    /// Handler jobs that returned an error
    pub jobs_failed: AtomicU64,
    /// Distinct AF states reported to the focus listener
    pub focus_notifications: AtomicU64,
    /// Requests the platform rejected
    pub submission_failures: AtomicU64,
    /// Callbacks dropped because their device or session was superseded
    pub stale_callbacks: AtomicU64,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics as a snapshot
    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            shots_requested: self.shots_requested.load(Ordering::Relaxed),
            stills_captured: self.stills_captured.load(Ordering::Relaxed),
            images_delivered: self.images_delivered.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            focus_notifications: self.focus_notifications.load(Ordering::Relaxed),
            submission_failures: self.submission_failures.load(Ordering::Relaxed),
            stale_callbacks: self.stale_callbacks.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of capture statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureStatsSnapshot {
    pub shots_requested: u64,
    pub stills_captured: u64,
    pub images_delivered: u64,
    pub jobs_failed: u64,
    pub focus_notifications: u64,
    pub submission_failures: u64,
    pub stale_callbacks: u64,
}

impl CaptureStatsSnapshot {
    /// Fraction of delivered images whose job completed without error.
    pub fn job_success_rate(&self) -> f64 {
        if self.images_delivered == 0 {
            0.0
        } else {
            self.images_delivered.saturating_sub(self.jobs_failed) as f64
                / self.images_delivered as f64
        }
    }
}
