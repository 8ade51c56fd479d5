//! Completion executors.
//!
//! # Responsibilities
//! - Run user completion callbacks away from engine locks
//! - Keep a panicking callback from taking a worker down
//!
//! # Design Decisions
//! - Fixed-size pool of named OS threads fed by an unbounded `flume` queue;
//!   submission never blocks
//! - Dropping the pool closes the queue and joins the workers after they
//!   drain what was already submitted

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fire-and-forget job submission.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Runs each job on the submitting thread. Useful in tests, where callbacks
/// must have fired by the time the triggering call returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) {
        run_guarded(job);
    }
}

pub struct WorkerPool {
    sender: Mutex<Option<flume::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let (sender, receiver) = flume::unbounded::<Job>();
        let mut workers = Vec::with_capacity(threads.max(1));

        for index in 0..threads.max(1) {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("rpc-worker-{}", index))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        run_guarded(job);
                    }
                })?;
            workers.push(handle);
        }

        tracing::debug!(threads = workers.len(), "Worker pool started");
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for handle in workers {
            // A callback may drop the last client handle from a worker thread.
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
    }
}

impl Executor for WorkerPool {
    fn execute(&self, job: Job) {
        let sender = self.sender.lock().clone();
        match sender {
            Some(sender) => {
                if let Err(flume::SendError(job)) = sender.send(job) {
                    run_guarded(job);
                }
            }
            // Late completions after shutdown still fire exactly once.
            None => run_guarded(job),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_guarded(job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        tracing::error!("Completion callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_pool_runs_every_job_before_shutdown_returns() {
        let pool = WorkerPool::new(3).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let count = count.clone();
            pool.execute(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new(1).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        pool.execute(Box::new(|| panic!("boom")));
        let c = count.clone();
        pool.execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        pool.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_execute_after_shutdown_runs_inline() {
        let pool = WorkerPool::new(1).unwrap();
        pool.shutdown();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        pool.execute(Box::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
