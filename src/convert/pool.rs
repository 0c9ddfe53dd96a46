//! A bounded pool of threads running independent tasks.

use std::num::NonZeroUsize;
use std::sync::mpsc::{self, Receiver};

use exn::{Exn, ResultExt as _};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, error};

use crate::error::ErrorMessage;

/// Fixed number of worker threads fed from an unbounded queue.
///
/// The pool is owned by whoever drives a batch, and shuts down when dropped. Tasks never observe
/// each other, completion order is unspecified.
pub struct WorkerPool {
    /// The threads doing the work.
    pool: ThreadPool,
}

impl WorkerPool {
    /// Spawn `n_workers` threads.
    pub fn new(n_workers: NonZeroUsize) -> Result<Self, Exn<ErrorMessage>> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(n_workers.get())
            .thread_name(|i| format!("transcode-{i}"))
            .panic_handler(|panic| {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown cause".to_owned());
                error!("a worker task panicked: {msg}");
            })
            .build()
            .or_raise(|| ErrorMessage::new("Could not start the worker threads"))?;
        debug!("started worker pool with {n_workers} threads");
        Ok(Self { pool })
    }

    /// Number of threads in this pool.
    pub fn n_workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queue a task to run on the next free worker.
    pub fn submit<T, F>(&self, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        self.pool.spawn(move || {
            // the receiver is only gone when the handle was dropped
            let _ = tx.send(task());
        });
        TaskHandle { rx }
    }

    /// Block until every task behind `handles` has finished.
    ///
    /// The results keep the order of `handles`. A task that panicked yields `None`.
    pub fn join_all<T>(&self, handles: impl IntoIterator<Item = TaskHandle<T>>) -> Vec<Option<T>> {
        handles.into_iter().map(TaskHandle::join).collect()
    }
}

/// Access to the result of a submitted task.
#[must_use = "a dropped handle cannot be waited on"]
pub struct TaskHandle<T> {
    /// Receives the single result of the task.
    rx: Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Block until the task is done, `None` if it panicked.
    pub fn join(self) -> Option<T> {
        self.rx.recv().ok()
    }
}
