use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::trace;

/// Binary permit serializing device open, close and preview arming.
///
/// Waiting is always bounded. A release without a matching acquire leaves the
/// gate at its single permit rather than creating a second one.
pub struct ResourceGate {
    available: Mutex<bool>,
    released: Condvar,
}

impl ResourceGate {
    pub fn new() -> Self {
        Self {
            available: Mutex::new(true),
            released: Condvar::new(),
        }
    }

    /// Take the permit, waiting at most `timeout`.
    pub fn try_acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut available = self.available.lock();
        while !*available {
            if self.released.wait_until(&mut available, deadline).timed_out() && !*available {
                trace!("Resource gate not acquired within {:?}", timeout);
                return false;
            }
        }
        *available = false;
        true
    }

    /// Like [`try_acquire`](Self::try_acquire), returning a guard that
    /// releases the permit when dropped.
    pub fn try_permit(&self, timeout: Duration) -> Option<GatePermit<'_>> {
        self.try_acquire(timeout).then(|| GatePermit { gate: self })
    }

    pub fn release(&self) {
        let mut available = self.available.lock();
        if *available {
            trace!("Resource gate released without a matching acquire");
        }
        *available = true;
        drop(available);
        self.released.notify_one();
    }

    pub fn is_available(&self) -> bool {
        *self.available.lock()
    }
}

impl Default for ResourceGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped ownership of the gate's permit.
pub struct GatePermit<'a> {
    gate: &'a ResourceGate,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
