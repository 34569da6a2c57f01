//! The process queue: owns live processes, ticks them in priority order,
//! reaps the dead, and routes threaded processes to the worker pool.
//!
//! # Ownership
//!
//! Ordinary processes live in an arena-style table indexed by id; the
//! `active` and `staging` collections hold ids, never the processes
//! themselves, so a process has exactly one owner at any instant. The
//! double-buffered id lists avoid mutating the collection being iterated:
//! each pass drains `active`, appends survivors to `staging`, swaps, and
//! re-sorts.
//!
//! Threaded processes are owned by their worker thread's run-loop for their
//! whole lifetime; the queue only tracks a handle (shared control block plus
//! a deferred-failure slot) in a locked list, which the frame scan reads.
//!
//! # Ordering
//!
//! Within one pass, processes tick in the order `active` was sorted at the
//! end of the previous pass: ascending sorting layer, ties broken by
//! ascending id (ids are monotonic, so equal-layer processes keep their
//! attach order). Priority changes take effect on the following cycle, or
//! after an explicit [`ProcessQueue::reorder`].

use std::collections::HashMap;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::error::{EngineError, EngineResult};
use super::process::{Process, ProcessCtl, ProcessId, ScheduleMode, StateEdge};
use super::worker_pool::{panic_message, WorkerPool};
use crate::util::clock::Timer;

/// Queue-side record of a threaded process. The worker owns the process;
/// this handle is what the main thread scans.
struct ThreadedHandle {
    ctl: Arc<ProcessCtl>,
    /// Failure captured by the run-loop, re-raised by the next queue scan.
    failure: Mutex<Option<EngineError>>,
}

/// Which behavior hook a pass drives.
#[derive(Clone, Copy)]
enum Pass {
    Update,
    Fixed,
}

/// Owns and schedules processes. See the module docs for the ownership and
/// ordering rules.
pub struct ProcessQueue {
    pool: WorkerPool,
    /// Arena of ordinary processes, indexed by id.
    table: HashMap<ProcessId, Process>,
    /// Ids ticked this cycle, sorted by (layer, id).
    active: Vec<ProcessId>,
    /// Next cycle's survivors, built during the current cycle.
    staging: Vec<ProcessId>,
    /// Handles of threaded processes, scanned once per frame.
    threaded: Mutex<Vec<Arc<ThreadedHandle>>>,
}

impl ProcessQueue {
    /// Create a queue backed by a worker pool of `worker_threads` threads
    /// (clamped to at least one).
    #[must_use]
    pub fn new(worker_threads: usize) -> Self {
        Self {
            pool: WorkerPool::new(worker_threads),
            table: HashMap::new(),
            active: Vec::new(),
            staging: Vec::new(),
            threaded: Mutex::new(Vec::new()),
        }
    }

    /// Number of worker threads serving threaded processes.
    #[must_use]
    pub const fn thread_count(&self) -> usize {
        self.pool.thread_count()
    }

    /// Number of ordinary processes currently owned by the queue.
    #[must_use]
    pub fn ordinary_count(&self) -> usize {
        self.table.len()
    }

    /// Number of threaded processes currently tracked by the queue.
    #[must_use]
    pub fn threaded_count(&self) -> usize {
        self.threaded.lock().len()
    }

    /// Attach a process. Ordinary processes join the staging list and are
    /// promoted at the start of the next pass (pass `init_now` to run their
    /// init hook immediately instead of on first tick); threaded processes
    /// are handed to the worker pool, which starts their run-loop as soon
    /// as a thread is free.
    ///
    /// # Errors
    ///
    /// [`EngineError::ProcessFailed`] if eager initialization fails;
    /// [`EngineError::PoolShutdown`] if a threaded process is attached after
    /// the pool shut down.
    pub fn attach(&mut self, mut process: Process, init_now: bool) -> EngineResult<ProcessId> {
        let id = process.id();
        match process.mode() {
            ScheduleMode::Ordinary => {
                if init_now {
                    process.initialize()?;
                }
                self.staging.push(id);
                self.table.insert(id, process);
                debug!(%id, "attached process");
            }
            ScheduleMode::Threaded { pacing } => {
                let handle = Arc::new(ThreadedHandle {
                    ctl: process.ctl(),
                    failure: Mutex::new(None),
                });
                self.threaded.lock().push(Arc::clone(&handle));
                let submitted = self.pool.submit(Box::new(move || {
                    run_threaded(process, &handle, pacing);
                    Ok(())
                }));
                if let Err(err) = submitted {
                    self.threaded.lock().retain(|h| h.ctl.id() != id);
                    return Err(err);
                }
                debug!(%id, "attached threaded process");
            }
        }
        Ok(id)
    }

    /// Tick every active ordinary process with the frame delta, reap the
    /// dead, re-sort the survivors, then surface deferred worker failures.
    ///
    /// # Errors
    ///
    /// The first tick error of the pass ([`EngineError::ProcessFailed`]),
    /// or a deferred failure captured on a worker thread since the last
    /// scan.
    pub fn update(&mut self, dt_secs: f64) -> EngineResult<()> {
        self.run_pass(dt_secs, Pass::Update)?;
        self.check_failures()
    }

    /// Same structure as [`ProcessQueue::update`], driving the
    /// fixed-timestep hook instead and skipping the threaded scan (the scan
    /// runs once per frame).
    ///
    /// # Errors
    ///
    /// The first tick error of the pass.
    pub fn fixed_update(&mut self, dt_secs: f64) -> EngineResult<()> {
        self.run_pass(dt_secs, Pass::Fixed)
    }

    /// Surface the first deferred failure captured by a threaded process's
    /// run-loop (removing that process), reap finished threaded processes,
    /// then check the pool's own failure slot.
    ///
    /// # Errors
    ///
    /// The deferred [`EngineError`], re-raised on the calling thread.
    pub fn check_failures(&mut self) -> EngineResult<()> {
        {
            let mut threaded = self.threaded.lock();
            let failed = threaded.iter().position(|h| h.failure.lock().is_some());
            if let Some(idx) = failed {
                let handle = threaded.remove(idx);
                let taken = handle.failure.lock().take();
                if let Some(err) = taken {
                    warn!(id = %handle.ctl.id(), "surfacing deferred worker failure");
                    return Err(err);
                }
            }
            // A dead handle with a pending failure stays until a later scan
            // surfaces the error (one failure per scan).
            threaded
                .retain(|h| h.failure.lock().is_some() || !(h.ctl.is_dead() || h.ctl.is_removed()));
        }
        self.pool.check_failures()
    }

    /// Abort a process. No-op if the id is unknown or the process already
    /// finished. With `immediate`, an ordinary process has its abort
    /// callback run synchronously and leaves the queue before this returns;
    /// a threaded process only has its shared state set and its handle
    /// dropped — its worker observes the abort at the next loop boundary.
    ///
    /// # Errors
    ///
    /// For a threaded immediate abort, any failure the worker had already
    /// captured for that process is propagated first.
    pub fn abort(&mut self, id: ProcessId, immediate: bool) -> EngineResult<()> {
        if let Some(process) = self.table.get(&id) {
            if !abort_edge(process.ctl_ref()) {
                return Ok(());
            }
            if immediate {
                if let Some(mut process) = self.table.remove(&id) {
                    process.dispatch_abort();
                }
                self.active.retain(|pid| *pid != id);
                self.staging.retain(|pid| *pid != id);
                debug!(%id, "process aborted immediately");
            }
            return Ok(());
        }

        let mut threaded = self.threaded.lock();
        if let Some(idx) = threaded.iter().position(|h| h.ctl.id() == id) {
            let handle = Arc::clone(&threaded[idx]);
            if !abort_edge(&handle.ctl) {
                return Ok(());
            }
            if immediate {
                let pending = handle.failure.lock().take();
                threaded.remove(idx);
                debug!(%id, "threaded process aborted");
                if let Some(err) = pending {
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Abort every process in both collections. Snapshots are taken first
    /// since aborting mutates the live collections. Keeps going past
    /// individual failures and reports the first one.
    ///
    /// # Errors
    ///
    /// The first error any individual abort produced.
    pub fn abort_all(&mut self, immediate: bool) -> EngineResult<()> {
        let ordinary: Vec<ProcessId> = self.table.keys().copied().collect();
        let threaded: Vec<ProcessId> = self.threaded.lock().iter().map(|h| h.ctl.id()).collect();

        let mut first_err = None;
        for id in ordinary.into_iter().chain(threaded) {
            if let Err(err) = self.abort(id, immediate) {
                warn!(%id, %err, "abort during abort_all failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Abort everything immediately, then drop all collections.
    ///
    /// # Errors
    ///
    /// The first error surfaced while aborting.
    pub fn clear(&mut self) -> EngineResult<()> {
        let result = self.abort_all(true);
        self.active.clear();
        self.staging.clear();
        self.table.clear();
        self.threaded.lock().clear();
        result
    }

    /// Re-sort `active` and `staging` by sorting layer, so a layer change
    /// on a live process takes effect without waiting for the cycle end.
    pub fn reorder(&mut self) {
        sort_by_layer(&self.table, &mut self.active);
        sort_by_layer(&self.table, &mut self.staging);
    }

    /// Administratively detach an ordinary process without finishing it.
    /// The process is marked `Removed`, leaves the queue, and is returned
    /// to the caller; no terminal callback runs. Returns `None` for
    /// unknown, dead, or threaded processes.
    pub fn detach(&mut self, id: ProcessId) -> Option<Process> {
        let process = self.table.get(&id)?;
        if process.ctl_ref().is_dead() {
            return None;
        }
        process.ctl_ref().remove();
        self.active.retain(|pid| *pid != id);
        self.staging.retain(|pid| *pid != id);
        debug!(%id, "process detached");
        self.table.remove(&id)
    }

    /// One tick pass over the active list. Staged attachments are promoted
    /// and sorted in first, survivors move to staging, the buffers swap,
    /// and the new active list is re-sorted.
    fn run_pass(&mut self, dt_secs: f64, pass: Pass) -> EngineResult<()> {
        if !self.staging.is_empty() {
            self.active.append(&mut self.staging);
            sort_by_layer(&self.table, &mut self.active);
        }
        let ids = mem::take(&mut self.active);
        let mut failure = None;

        for (idx, id) in ids.iter().enumerate() {
            // A process can leave the table mid-cycle (immediate abort,
            // detach); its id is then stale.
            let Some(process) = self.table.get_mut(id) else {
                continue;
            };
            if process.ctl_ref().is_removed() {
                trace!(%id, "dropping removed process");
                self.table.remove(id);
                continue;
            }

            let dead = match pass {
                Pass::Update => process.tick(dt_secs),
                Pass::Fixed => process.fixed_tick(dt_secs),
            };
            match dead {
                Ok(true) => {
                    // Terminal callback already ran inside the tick.
                    self.table.remove(id);
                }
                Ok(false) => self.staging.push(*id),
                Err(err) => {
                    self.table.remove(id);
                    // Keep the unprocessed remainder alive for next cycle.
                    self.staging.extend_from_slice(&ids[idx + 1..]);
                    failure = Some(err);
                    break;
                }
            }
        }

        mem::swap(&mut self.active, &mut self.staging);
        self.staging.clear();
        sort_by_layer(&self.table, &mut self.active);

        failure.map_or(Ok(()), Err)
    }
}

impl Drop for ProcessQueue {
    fn drop(&mut self) {
        // The pool's shutdown joins the workers; a still-live threaded
        // process must be told to exit or that join would never return.
        if let Err(err) = self.abort_all(false) {
            warn!(%err, "abort while dropping the queue failed");
        }
    }
}

/// Take the abort edge on a control block shared with a worker thread.
/// Abort is legal from every live state, so a refusal can only mean the
/// process concurrently reached a terminal or removed state; per the abort
/// contract that is a no-op, reported as `false`.
fn abort_edge(ctl: &ProcessCtl) -> bool {
    ctl.try_edge(StateEdge::Abort).is_ok()
}

/// Sort ids by ascending sorting layer, ties broken by ascending id.
fn sort_by_layer(table: &HashMap<ProcessId, Process>, ids: &mut [ProcessId]) {
    ids.sort_by_key(|id| {
        let layer = table.get(id).map_or(i32::MAX, |p| p.ctl_ref().sorting_layer());
        (layer, *id)
    });
}

/// Run-loop of one threaded process, executed entirely on one worker
/// thread. The process self-ticks with its own measured delta time until it
/// reaches a terminal state; a tick error is parked in the handle's failure
/// slot for the queue's next scan, and a panicking tick fails the process
/// and is parked the same way.
fn run_threaded(mut process: Process, handle: &ThreadedHandle, pacing: Option<Duration>) {
    let id = process.id();
    debug!(%id, "threaded run-loop started");

    let timer = Timer::started();
    let mut previous = 0.0_f64;

    loop {
        if handle.ctl.is_removed() {
            debug!(%id, "threaded process removed, run-loop exiting");
            break;
        }

        let now = timer.elapsed_secs();
        if !handle.ctl.is_paused() {
            // A panic must not escape into the pool's own guard: the handle
            // would outlive its worker with an empty failure slot and never
            // be reaped.
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| process.tick(now - previous)));
            match outcome {
                Ok(Ok(true)) => {
                    debug!(%id, "threaded process finished");
                    break;
                }
                Ok(Ok(false)) => {}
                Ok(Err(err)) => {
                    *handle.failure.lock() = Some(err);
                    break;
                }
                Err(payload) => {
                    // The behavior is unusable after a panic; the process is
                    // failed without its terminal hook.
                    let _ = handle.ctl.try_edge(StateEdge::Fail);
                    *handle.failure.lock() =
                        Some(EngineError::WorkerPanic(panic_message(&payload)));
                    break;
                }
            }
        }
        previous = now;

        if let Some(interval) = pacing {
            thread::sleep(interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::process::{Behavior, ProcessState};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Idle;
    impl Behavior for Idle {
        fn on_update(&mut self, _ctl: &ProcessCtl, _dt: f64) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn staged_attachments_tick_on_the_next_pass() {
        let counter = Arc::new(AtomicU32::new(0));

        struct Tally(Arc<AtomicU32>);
        impl Behavior for Tally {
            fn on_update(&mut self, _ctl: &ProcessCtl, _dt: f64) -> anyhow::Result<()> {
                self.0.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }

        let mut queue = ProcessQueue::new(1);
        queue.attach(Process::new(Tally(Arc::clone(&counter)), 0), false).unwrap();
        queue.update(0.1).unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        queue.update(0.1).unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn detach_returns_process_without_callbacks() {
        let mut queue = ProcessQueue::new(1);
        let id = queue.attach(Process::new(Idle, 0), false).unwrap();
        queue.update(0.1).unwrap();
        let detached = queue.detach(id).expect("process should be detachable");
        assert_eq!(detached.ctl().state(), ProcessState::Removed);
        assert_eq!(queue.ordinary_count(), 0);
        queue.update(0.1).unwrap();
    }

    #[test]
    fn reorder_applies_layer_changes_mid_cycle() {
        let mut queue = ProcessQueue::new(1);
        let a = queue.attach(Process::new(Idle, 1), false).unwrap();
        let b = queue.attach(Process::new(Idle, 2), false).unwrap();
        queue.update(0.1).unwrap();
        assert_eq!(queue.active, vec![a, b]);

        queue.table.get(&a).unwrap().ctl().set_sorting_layer(5);
        queue.reorder();
        assert_eq!(queue.active, vec![b, a]);
    }
}
