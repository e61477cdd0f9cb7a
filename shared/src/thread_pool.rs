//! Bounded worker-thread pool with per-job result handles.
//!
//! A fixed number of named worker threads pull boxed closures from a shared
//! queue. Every submission returns a [`JobHandle`] that yields the closure's
//! return value, or a [`JobError`] if the closure panicked. A panicking job
//! never takes its worker down and never hides the results of other jobs.
//!
//! Dropping the pool closes the queue and joins every worker, so a pool
//! created inside a function is torn down before the function returns.
//!
//! # Example
//! ```
//! use shared::thread_pool::ThreadPool;
//!
//! let pool = ThreadPool::new(2).unwrap();
//! let handles: Vec<_> = (0..4).map(|i| pool.submit(move || i * i)).collect();
//! let squares: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
//! assert_eq!(squares, vec![0, 1, 4, 9]);
//! ```

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, warn};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;
use thiserror::Error;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Errors raised while building a pool
#[derive(Error, Debug)]
pub enum ThreadPoolError {
    #[error("thread pool needs at least one worker")]
    ZeroWorkers,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Failure of a single submitted job
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The job panicked; the payload message is preserved when it is a string
    #[error("job panicked: {0}")]
    Panicked(String),
    /// The worker went away before delivering a result
    #[error("job result channel disconnected")]
    Disconnected,
}

/// Future-like handle to the result of one submitted job
#[derive(Debug)]
pub struct JobHandle<T> {
    receiver: Receiver<Result<T, JobError>>,
}

impl<T> JobHandle<T> {
    /// Block until the job finishes and return its tagged result
    pub fn join(self) -> Result<T, JobError> {
        self.receiver
            .recv()
            .unwrap_or(Err(JobError::Disconnected))
    }
}

struct Worker {
    id: usize,
    thread: Option<thread::JoinHandle<()>>,
}

/// Fixed-size pool of worker threads
pub struct ThreadPool {
    workers: Vec<Worker>,
    sender: Option<Sender<Job>>,
}

impl ThreadPool {
    /// Create a pool of `size` workers named `stackprep-worker-<n>`
    pub fn new(size: usize) -> Result<Self, ThreadPoolError> {
        Self::with_name(size, "stackprep")
    }

    /// Create a pool of `size` workers named `<prefix>-worker-<n>`
    pub fn with_name(size: usize, prefix: &str) -> Result<Self, ThreadPoolError> {
        if size == 0 {
            return Err(ThreadPoolError::ZeroWorkers);
        }

        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(size);

        for id in 0..size {
            let receiver = receiver.clone();
            let thread = thread::Builder::new()
                .name(format!("{prefix}-worker-{id}"))
                .spawn(move || {
                    // recv() errors once every sender is gone, which ends the worker
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                })?;
            workers.push(Worker {
                id,
                thread: Some(thread),
            });
        }

        debug!("Started thread pool '{prefix}' with {size} workers");

        Ok(Self {
            workers,
            sender: Some(sender),
        })
    }

    /// Number of worker threads
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a closure and return a handle to its result
    ///
    /// Panics inside `f` are caught on the worker and delivered as
    /// [`JobError::Panicked`] through the handle.
    pub fn submit<F, T>(&self, f: F) -> JobHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = crossbeam_channel::bounded(1);

        let job: Job = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(f))
                .map_err(|payload| JobError::Panicked(panic_message(payload.as_ref())));
            // The caller may have dropped the handle; nothing to deliver then
            let _ = result_tx.send(result);
        });

        if let Some(sender) = &self.sender {
            if sender.send(job).is_err() {
                warn!("Thread pool queue closed; job dropped");
            }
        }

        JobHandle {
            receiver: result_rx,
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        drop(self.sender.take());

        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    warn!("Worker {} exited abnormally", worker.id);
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
