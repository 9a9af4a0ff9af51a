//! Single-threaded background execution context.
//!
//! Every platform callback (device lifecycle, session configuration, frame
//! metadata, image availability) is delivered as a task on one worker
//! thread, in submission order. Posting a task is a channel send; the worker
//! is the only consumer.

use crate::error::{Result, StillcamError};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    Quit,
}

/// Count of tasks posted but not yet finished, with a condition variable
/// signalled whenever it drops to zero.
struct IdleTracker {
    pending: Mutex<usize>,
    idle: Condvar,
    stopped: AtomicBool,
}

impl IdleTracker {
    fn new() -> Self {
        Self {
            pending: Mutex::new(0),
            idle: Condvar::new(),
            stopped: AtomicBool::new(false),
        }
    }

    fn begin(&self) {
        *self.pending.lock() += 1;
    }

    fn finish(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let mut pending = self.pending.lock();
        *pending = 0;
        self.idle.notify_all();
    }
}

/// Cloneable handle used to post work onto a [`BackgroundContext`].
#[derive(Clone)]
pub struct Executor {
    sender: Sender<Message>,
    tracker: Arc<IdleTracker>,
    worker: ThreadId,
    name: Arc<str>,
}

impl Executor {
    /// Queue `task` on the worker. Returns `false` if the context has been
    /// stopped; the task is dropped without running in that case.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tracker.stopped.load(Ordering::Acquire) {
            trace!("Background context '{}' stopped, task dropped", self.name);
            return false;
        }

        self.tracker.begin();
        if self.sender.send(Message::Run(Box::new(task))).is_err() {
            self.tracker.finish();
            trace!("Background context '{}' disconnected, task dropped", self.name);
            return false;
        }
        true
    }

    /// Whether the caller is running on this context's worker thread.
    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.worker
    }

    pub fn is_stopped(&self) -> bool {
        self.tracker.stopped.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until every posted task, including tasks posted by those tasks,
    /// has finished, or `timeout` elapses. Diagnostic helper; returns `false`
    /// when called from the worker itself.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        if self.is_worker_thread() {
            return false;
        }

        let deadline = Instant::now() + timeout;
        let mut pending = self.tracker.pending.lock();
        while *pending > 0 {
            if self.tracker.idle.wait_until(&mut pending, deadline).timed_out() {
                return *pending == 0;
            }
        }
        true
    }
}

/// Owner of the worker thread. Dropping or stopping the context lets the
/// worker finish the tasks queued so far and exit; it never joins.
pub struct BackgroundContext {
    executor: Executor,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundContext {
    pub fn start(name: &str) -> Result<Self> {
        let (sender, receiver) = channel::unbounded();
        let tracker = Arc::new(IdleTracker::new());

        let worker_tracker = Arc::clone(&tracker);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_worker(receiver, worker_tracker))
            .map_err(|e| {
                StillcamError::system(format!("Failed to spawn background thread '{}': {}", name, e))
            })?;

        info!("Background context '{}' started", name);

        Ok(Self {
            executor: Executor {
                sender,
                tracker,
                worker: handle.thread().id(),
                name: Arc::from(name),
            },
            worker: Some(handle),
        })
    }

    pub fn executor(&self) -> Executor {
        self.executor.clone()
    }

    pub fn stop(self) {
        debug!("Stopping background context '{}'", self.executor.name);
        // Drop does the work.
    }
}

impl Drop for BackgroundContext {
    fn drop(&mut self) {
        let _ = self.executor.sender.send(Message::Quit);
        // Detach: the context may be stopped from one of its own tasks.
        self.worker.take();
    }
}

fn run_worker(receiver: Receiver<Message>, tracker: Arc<IdleTracker>) {
    while let Ok(message) = receiver.recv() {
        match message {
            Message::Run(task) => {
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    error!("Background task panicked; continuing with next task");
                }
                tracker.finish();
            }
            Message::Quit => break,
        }
    }

    // Anything still queued is dropped here without running.
    drop(receiver);
    tracker.stop();
    debug!("Background worker exited");
}
