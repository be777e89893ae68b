//! Ordered, flushable worker queue.
//!
//! A `TaskQueue` owns one worker thread that runs dispatched tasks in FIFO
//! order. Handles are cheap clones of the same queue. A decoder bound to a
//! queue does all of its work there, so everything it emits is serialized.
//!
//! Tasks are tagged with the queue's flush epoch at dispatch time;
//! [`TaskQueue::flush`] bumps the epoch so that every task still waiting in
//! the mailbox is skipped instead of run.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::DecodeError;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Job {
    epoch: u64,
    task: Task,
}

struct Counters {
    epoch: AtomicU64,
    completed: AtomicU64,
    discarded: AtomicU64,
}

struct Inner {
    name: String,
    /// Dropped on shutdown; the worker exits once the mailbox is empty.
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    counters: Arc<Counters>,
}

/// Handle to a single-threaded FIFO task queue.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Inner>,
}

impl TaskQueue {
    /// Spawn the worker thread.
    pub fn spawn(name: impl Into<String>) -> Result<Self, DecodeError> {
        let name = name.into();
        let (sender, receiver) = channel::unbounded::<Job>();
        let counters = Arc::new(Counters {
            epoch: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        });

        let worker_counters = Arc::clone(&counters);
        let worker_name = name.clone();
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(&worker_name, receiver, &worker_counters))
            .map_err(|e| DecodeError::operation("spawn task queue", e.to_string()))?;

        debug!(queue = %name, "Task queue started");

        Ok(Self {
            inner: Arc::new(Inner {
                worker_id: worker.thread().id(),
                name,
                sender: Mutex::new(Some(sender)),
                worker: Mutex::new(Some(worker)),
                counters,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Enqueue `task` behind everything already dispatched.
    pub fn dispatch<F>(&self, task: F) -> Result<(), DecodeError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.inner.sender.lock();
        let sender = sender.as_ref().ok_or(DecodeError::QueueShutDown)?;
        let job = Job {
            epoch: self.inner.counters.epoch.load(Ordering::Acquire),
            task: Box::new(task),
        };
        sender.send(job).map_err(|_| DecodeError::QueueShutDown)
    }

    /// Discard every task that is queued but has not started yet.
    ///
    /// A task that is currently running is not interrupted.
    pub fn flush(&self) {
        // Taken under the sender lock so no dispatch straddles the bump.
        let _sender = self.inner.sender.lock();
        self.inner.counters.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Block until every task dispatched before this call has run or been
    /// discarded. Returns immediately when called from the worker itself.
    pub fn await_idle(&self) -> Result<(), DecodeError> {
        if self.is_current() {
            return Ok(());
        }
        let (done_tx, done_rx) = channel::bounded::<()>(1);
        self.dispatch(move || {
            let _ = done_tx.send(());
        })?;
        // A disconnect means the marker itself was discarded by a flush,
        // which equally proves the earlier work is gone.
        let _ = done_rx.recv();
        Ok(())
    }

    /// Stop accepting new tasks. Already queued tasks still run.
    pub fn begin_shutdown(&self) {
        if self.inner.sender.lock().take().is_some() {
            debug!(queue = %self.inner.name, "Task queue shutdown requested");
        }
    }

    /// Shut down and join the worker once it has run out of work.
    pub fn await_shutdown_and_idle(&self) {
        self.begin_shutdown();
        if self.is_current() {
            warn!(queue = %self.inner.name, "Cannot join task queue from its own worker");
            return;
        }
        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!(queue = %self.inner.name, "Task queue worker terminated abnormally");
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.sender.lock().is_none()
    }

    /// Whether the calling thread is this queue's worker.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.worker_id
    }

    /// Number of tasks that have run to completion (panicked ones included).
    pub fn completed_tasks(&self) -> u64 {
        self.inner.counters.completed.load(Ordering::Acquire)
    }

    /// Number of tasks skipped because of a flush.
    pub fn discarded_tasks(&self) -> u64 {
        self.inner.counters.discarded.load(Ordering::Acquire)
    }
}

fn run_worker(name: &str, receiver: Receiver<Job>, counters: &Counters) {
    for job in receiver.iter() {
        if job.epoch < counters.epoch.load(Ordering::Acquire) {
            counters.discarded.fetch_add(1, Ordering::AcqRel);
            continue;
        }
        if catch_unwind(AssertUnwindSafe(job.task)).is_err() {
            warn!(queue = %name, "Task panicked; worker continues");
        }
        counters.completed.fetch_add(1, Ordering::AcqRel);
    }
    debug!(queue = %name, "Task queue worker exiting");
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.inner.name)
            .field("shut_down", &self.is_shut_down())
            .field("completed", &self.completed_tasks())
            .field("discarded", &self.discarded_tasks())
            .finish()
    }
}
