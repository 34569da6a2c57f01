//! Fixed worker-thread pool with deferred failure propagation.
//!
//! The pool spawns a fixed set of dedicated OS threads that block on a
//! shared task channel. A task is a boxed closure; whatever it returns (or
//! however it panics) never crashes the worker — the first failure since the
//! last check is captured in a shared slot and re-raised on whichever thread
//! next calls [`WorkerPool::check_failures`].
//!
//! # Design
//!
//! - **No polling**: workers block on channel `recv`; dropping the sender on
//!   shutdown unblocks and drains them naturally.
//! - **Coarse failure model**: one shared first-failure slot rather than
//!   per-task results. A worker failure is fatal to the simulation, so
//!   per-task recovery has no consumer; the invariant preserved is that a
//!   failure never silently vanishes.
//! - **Idempotent shutdown**: callable any number of times, and from `Drop`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::error::{EngineError, EngineResult};

/// A unit of work submitted to the pool.
pub type Task = Box<dyn FnOnce() -> EngineResult<()> + Send + 'static>;

/// Fixed-size pool of worker threads consuming a shared task queue.
pub struct WorkerPool {
    /// Task sender. `None` after shutdown; dropping it unblocks workers.
    task_tx: Mutex<Option<Sender<Task>>>,
    /// Worker thread handles, drained on shutdown.
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// First failure captured since the last check.
    failure: Arc<Mutex<Option<EngineError>>>,
    shutdown: AtomicBool,
    thread_count: usize,
}

impl WorkerPool {
    /// Create a pool with `requested_threads` workers, clamped to at least
    /// one thread.
    #[must_use]
    pub fn new(requested_threads: usize) -> Self {
        let thread_count = requested_threads.max(1);
        let (task_tx, task_rx) = unbounded::<Task>();
        let failure = Arc::new(Mutex::new(None));

        let workers = (0..thread_count)
            .map(|worker_id| spawn_worker(worker_id, task_rx.clone(), Arc::clone(&failure)))
            .collect();

        info!(thread_count, "worker pool initialized");

        Self {
            task_tx: Mutex::new(Some(task_tx)),
            workers: Mutex::new(workers),
            failure,
            shutdown: AtomicBool::new(false),
            thread_count,
        }
    }

    /// The fixed number of worker threads (at least 1).
    #[must_use]
    pub const fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Enqueue a task. Returns immediately; the task runs on some worker
    /// thread in FIFO order.
    ///
    /// # Errors
    ///
    /// [`EngineError::PoolShutdown`] if the pool has been shut down.
    pub fn submit(&self, task: Task) -> EngineResult<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(EngineError::PoolShutdown);
        }
        let guard = self.task_tx.lock();
        let Some(task_tx) = guard.as_ref() else {
            return Err(EngineError::PoolShutdown);
        };
        task_tx.send(task).map_err(|_| EngineError::PoolShutdown)
    }

    /// Re-raise the first failure captured on a worker since the last
    /// check, clearing the slot.
    ///
    /// This is the pool's only error-surfacing path: task errors and panics
    /// never propagate anywhere else.
    ///
    /// # Errors
    ///
    /// The captured [`EngineError`], if any worker failed.
    pub fn check_failures(&self) -> EngineResult<()> {
        match self.failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Signal all workers to drain and exit after their current task, then
    /// join them. Idempotent and panic-free; also invoked from `Drop`.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        // Dropping the sender unblocks every worker waiting on recv.
        {
            let mut task_tx = self.task_tx.lock();
            *task_tx = None;
        }

        let mut workers = self.workers.lock();
        for (worker_id, worker) in workers.drain(..).enumerate() {
            if worker.join().is_err() {
                warn!(worker_id, "worker thread terminated abnormally");
            }
        }
        info!(thread_count = self.thread_count, "worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
        // Shutdown must not throw; an unchecked failure is only logged here.
        if let Some(err) = self.failure.lock().take() {
            warn!(%err, "worker pool dropped with unchecked failure");
        }
    }
}

/// Spawn one worker thread running the task loop.
fn spawn_worker(
    worker_id: usize,
    task_rx: Receiver<Task>,
    failure: Arc<Mutex<Option<EngineError>>>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("cadence-worker-{worker_id}"))
        .spawn(move || {
            debug!(worker_id, "worker thread started");
            loop {
                // Blocks until a task arrives or the sender is dropped.
                let Ok(task) = task_rx.recv() else {
                    debug!(worker_id, "worker channel closed, exiting");
                    break;
                };

                // The task runs without any lock held, so a long task never
                // blocks enqueueing or other workers.
                let outcome = panic::catch_unwind(AssertUnwindSafe(task));
                let captured = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(err),
                    Err(payload) => Some(EngineError::WorkerPanic(panic_message(&payload))),
                };

                if let Some(err) = captured {
                    let mut slot = failure.lock();
                    if let Some(pending) = slot.as_ref() {
                        // Keep the first failure; later ones are logged.
                        warn!(worker_id, pending = %pending, dropped = %err,
                            "additional worker failure before check");
                    } else {
                        warn!(worker_id, %err, "worker task failed, deferring");
                        *slot = Some(err);
                    }
                }
            }
        })
        .expect("failed to spawn worker thread")
}

/// Best-effort extraction of a panic payload's message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn runs_submitted_tasks() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            pool.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }))
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 8);
        assert!(pool.check_failures().is_ok());
    }

    #[test]
    fn clamps_to_at_least_one_thread() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.thread_count(), 1);
    }

    #[test]
    fn captures_task_error() {
        let pool = WorkerPool::new(1);
        pool.submit(Box::new(|| {
            Err(EngineError::InvalidConfig("boom".into()))
        }))
        .unwrap();
        // Wait for the worker to pick the task up.
        let mut captured = pool.check_failures();
        for _ in 0..100 {
            if captured.is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
            captured = pool.check_failures();
        }
        assert!(matches!(captured, Err(EngineError::InvalidConfig(_))));
        // Slot is cleared once checked.
        assert!(pool.check_failures().is_ok());
    }

    #[test]
    fn captures_panic_without_killing_worker() {
        let pool = WorkerPool::new(1);
        pool.submit(Box::new(|| panic!("task exploded"))).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        pool.submit(Box::new(move || {
            ran2.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }))
        .unwrap();
        pool.shutdown();
        // The worker survived the panic and ran the second task.
        assert_eq!(ran.load(Ordering::Relaxed), 1);
        assert!(matches!(
            pool.check_failures(),
            Err(EngineError::WorkerPanic(_))
        ));
    }

    #[test]
    fn shutdown_is_idempotent_and_rejects_new_tasks() {
        let pool = WorkerPool::new(2);
        pool.shutdown();
        pool.shutdown();
        let err = pool.submit(Box::new(|| Ok(()))).unwrap_err();
        assert!(matches!(err, EngineError::PoolShutdown));
    }
}
