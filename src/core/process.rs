//! Process units and their lifecycle state machine.
//!
//! A process is a unit of cooperative work. Domain logic implements
//! [`Behavior`]; the engine owns when and where the hooks run. Every state
//! mutation flows through one transition function so that the legal edges
//! live in a single place and callback dispatch is never split across call
//! sites.
//!
//! # State machine
//!
//! ```text
//! Uninitialized --Start--> Running <--Pause/Resume--> Paused
//! Running|Paused --Succeed--> Succeeded
//! Running|Paused --Fail-----> Failed
//! Uninitialized|Running|Paused --Abort--> Aborted
//! any non-terminal --Remove--> Removed   (administrative detach)
//! ```
//!
//! `Succeeded`, `Failed`, and `Aborted` are terminal. `Removed` is not
//! terminal: a removed process has been detached without having finished.

use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::error::{EngineError, EngineResult};

/// Process-unique identifier, monotonically assigned and never reused
/// within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Global id counter shared by every process in the program.
static NEXT_PROCESS_ID: AtomicU64 = AtomicU64::new(0);

fn next_process_id() -> ProcessId {
    ProcessId(NEXT_PROCESS_ID.fetch_add(1, Ordering::Relaxed))
}

/// Lifecycle state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessState {
    /// Created, attached or not, but never ticked.
    Uninitialized = 0,
    /// Detached from the queue without having finished.
    Removed = 1,
    /// Initialized and receiving ticks.
    Running = 2,
    /// Initialized but not receiving update ticks.
    Paused = 3,
    /// Terminal: completed successfully.
    Succeeded = 4,
    /// Terminal: completed unsuccessfully.
    Failed = 5,
    /// Terminal: cancelled, possibly before it ever started.
    Aborted = 6,
}

impl ProcessState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Removed,
            2 => Self::Running,
            3 => Self::Paused,
            4 => Self::Succeeded,
            5 => Self::Failed,
            6 => Self::Aborted,
            _ => Self::Uninitialized,
        }
    }

    /// Whether this is one of the terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }
}

/// A requested edge of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEdge {
    /// `Uninitialized -> Running`, taken on first tick.
    Start,
    /// `Running -> Paused`.
    Pause,
    /// `Paused -> Running`.
    Resume,
    /// `Running | Paused -> Succeeded`.
    Succeed,
    /// `Running | Paused -> Failed`.
    Fail,
    /// `Uninitialized | Running | Paused -> Aborted`. The only edge
    /// reachable from every non-terminal state, for emergency shutdown.
    Abort,
    /// Any non-terminal state `-> Removed` (administrative detach).
    Remove,
}

/// The single transition function for the state machine.
///
/// Returns the new state, or [`EngineError::IllegalTransition`] when the
/// edge is not legal from `from`. All state mutation goes through here.
///
/// # Errors
///
/// [`EngineError::IllegalTransition`] when the edge is not defined for the
/// source state.
pub fn transition(from: ProcessState, edge: StateEdge) -> EngineResult<ProcessState> {
    use ProcessState::{Aborted, Failed, Paused, Removed, Running, Succeeded, Uninitialized};

    let next = match (from, edge) {
        (Uninitialized, StateEdge::Start) => Running,
        (Running, StateEdge::Pause) => Paused,
        (Paused, StateEdge::Resume) => Running,
        (Running | Paused, StateEdge::Succeed) => Succeeded,
        (Running | Paused, StateEdge::Fail) => Failed,
        (Uninitialized | Running | Paused, StateEdge::Abort) => Aborted,
        (Uninitialized | Running | Paused | Removed, StateEdge::Remove) => Removed,
        (from, edge) => return Err(EngineError::IllegalTransition { from, edge }),
    };
    Ok(next)
}

/// Shared control block of a process: identity, priority, and state.
///
/// The control block is the part of a process that is safe to observe (and
/// to request transitions on) from any thread, without the owning thread's
/// cooperation. The state field is atomic so the queue can inspect a
/// threaded process's liveness without stalling its worker. Consistency of
/// the behavior's own fields remains the responsibility of whichever thread
/// currently owns the tick.
#[derive(Debug)]
pub struct ProcessCtl {
    id: ProcessId,
    /// Lower values tick earlier within a cycle.
    sorting_layer: AtomicI32,
    state: AtomicU8,
}

impl ProcessCtl {
    fn new(sorting_layer: i32) -> Self {
        Self {
            id: next_process_id(),
            sorting_layer: AtomicI32::new(sorting_layer),
            state: AtomicU8::new(ProcessState::Uninitialized as u8),
        }
    }

    /// The unique id of the process.
    #[must_use]
    pub const fn id(&self) -> ProcessId {
        self.id
    }

    /// Current sorting layer (priority; lower ticks earlier).
    #[must_use]
    pub fn sorting_layer(&self) -> i32 {
        self.sorting_layer.load(Ordering::Relaxed)
    }

    /// Change the sorting layer. Takes effect at the next re-sort
    /// (`ProcessQueue::reorder` or the end of the current cycle).
    pub fn set_sorting_layer(&self, layer: i32) {
        self.sorting_layer.store(layer, Ordering::Relaxed);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        ProcessState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the process is running or paused.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        matches!(self.state(), ProcessState::Running | ProcessState::Paused)
    }

    /// Whether the process reached a terminal state.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.state().is_terminal()
    }

    /// Whether the process was administratively detached.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.state() == ProcessState::Removed
    }

    /// Whether the process is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state() == ProcessState::Paused
    }

    /// Request an edge, failing if it is illegal from the current state.
    ///
    /// Retries on concurrent state changes, so the transition that is
    /// applied is always legal from the state it was applied to.
    ///
    /// # Errors
    ///
    /// [`EngineError::IllegalTransition`] if the edge is not legal from the
    /// state observed at the attempt.
    pub fn try_edge(&self, edge: StateEdge) -> EngineResult<ProcessState> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = transition(ProcessState::from_u8(current), edge)?;
            match self.state.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(next),
                Err(observed) => current = observed,
            }
        }
    }

    /// Fire-and-forget edge request for the control methods below.
    ///
    /// An illegal edge is a programmer error: it asserts in debug builds
    /// and is a logged no-op in release builds.
    fn request(&self, edge: StateEdge) {
        if let Err(err) = self.try_edge(edge) {
            debug_assert!(false, "{err}");
            warn!(id = %self.id, %err, "ignoring illegal state transition");
        }
    }

    /// Mark the process as having completed successfully.
    pub fn succeed(&self) {
        self.request(StateEdge::Succeed);
    }

    /// Mark the process as having failed.
    pub fn fail(&self) {
        self.request(StateEdge::Fail);
    }

    /// Abort the process. Legal from any non-terminal, non-removed state.
    pub fn abort(&self) {
        self.request(StateEdge::Abort);
    }

    /// Pause the process. Legal only while running.
    pub fn pause(&self) {
        self.request(StateEdge::Pause);
    }

    /// Resume a paused process.
    pub fn resume(&self) {
        self.request(StateEdge::Resume);
    }

    /// Administratively detach the process (no terminal callback will run).
    pub fn remove(&self) {
        self.request(StateEdge::Remove);
    }
}

/// Callback contract implemented by domain code.
///
/// All hooks run on whichever thread currently owns the tick: the simulation
/// thread for ordinary processes, a dedicated worker thread for threaded
/// ones. Hooks of ordinary processes must return promptly since they share
/// the simulation thread.
///
/// Hooks drive the lifecycle through the [`ProcessCtl`] they are handed,
/// e.g. calling [`ProcessCtl::succeed`] once their work is done. Returning
/// an error fails the whole simulation frame (ordinary) or is deferred to
/// the next queue scan (threaded) — it is not a per-task recoverable result.
pub trait Behavior: Send {
    /// One-time setup, invoked on the first tick after the process entered
    /// `Running`.
    ///
    /// # Errors
    ///
    /// Any error aborts the tick and is surfaced as
    /// [`EngineError::ProcessFailed`].
    fn init(&mut self, ctl: &ProcessCtl) -> anyhow::Result<()> {
        let _ = ctl;
        Ok(())
    }

    /// Per-frame update tick with the frame's delta time in seconds.
    ///
    /// # Errors
    ///
    /// Any error is surfaced as [`EngineError::ProcessFailed`].
    fn on_update(&mut self, ctl: &ProcessCtl, dt_secs: f64) -> anyhow::Result<()>;

    /// Fixed-timestep tick, for work that needs a deterministic step.
    ///
    /// # Errors
    ///
    /// Any error is surfaced as [`EngineError::ProcessFailed`].
    fn on_fixed_update(&mut self, ctl: &ProcessCtl, dt_secs: f64) -> anyhow::Result<()> {
        let _ = (ctl, dt_secs);
        Ok(())
    }

    /// Invoked exactly once when the process reaches `Succeeded`.
    fn on_success(&mut self) {}

    /// Invoked exactly once when the process reaches `Failed`.
    fn on_fail(&mut self) {}

    /// Invoked exactly once when the process reaches `Aborted`.
    fn on_abort(&mut self) {}
}

/// How a process is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// Ticked synchronously by the simulation thread each cycle.
    Ordinary,
    /// Self-ticked by a worker thread in its own loop until it finishes.
    Threaded {
        /// Optional minimum interval between loop iterations. `None` lets
        /// the loop spin at full thread speed, as fast as its ticks allow.
        pacing: Option<Duration>,
    },
}

/// A schedulable unit: control block, behavior, and scheduling mode.
///
/// A process is owned by exactly one place at any instant — the queue's
/// table for ordinary processes, or the worker thread's run-loop for
/// threaded ones — so it can never be ticked twice concurrently.
pub struct Process {
    ctl: Arc<ProcessCtl>,
    behavior: Box<dyn Behavior>,
    mode: ScheduleMode,
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.ctl.id())
            .field("state", &self.ctl.state())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl Process {
    /// Create an ordinary process with the given behavior and sorting layer.
    #[must_use]
    pub fn new(behavior: impl Behavior + 'static, sorting_layer: i32) -> Self {
        Self {
            ctl: Arc::new(ProcessCtl::new(sorting_layer)),
            behavior: Box::new(behavior),
            mode: ScheduleMode::Ordinary,
        }
    }

    /// Create a threaded process. It will occupy one worker slot for its
    /// full lifetime once attached.
    #[must_use]
    pub fn threaded(behavior: impl Behavior + 'static, sorting_layer: i32) -> Self {
        Self {
            ctl: Arc::new(ProcessCtl::new(sorting_layer)),
            behavior: Box::new(behavior),
            mode: ScheduleMode::Threaded { pacing: None },
        }
    }

    /// Set a minimum interval between run-loop iterations of a threaded
    /// process. No effect on ordinary processes.
    #[must_use]
    pub fn with_pacing(mut self, interval: Duration) -> Self {
        if let ScheduleMode::Threaded { pacing } = &mut self.mode {
            *pacing = Some(interval);
        }
        self
    }

    /// The unique id of the process.
    #[must_use]
    pub fn id(&self) -> ProcessId {
        self.ctl.id()
    }

    /// Shared handle to the control block.
    #[must_use]
    pub fn ctl(&self) -> Arc<ProcessCtl> {
        Arc::clone(&self.ctl)
    }

    /// Borrow the control block without cloning the handle.
    pub(crate) fn ctl_ref(&self) -> &ProcessCtl {
        &self.ctl
    }

    /// The scheduling mode of the process.
    #[must_use]
    pub const fn mode(&self) -> ScheduleMode {
        self.mode
    }

    /// Take the `Start` edge and run the init hook.
    pub(crate) fn initialize(&mut self) -> EngineResult<()> {
        self.ctl.try_edge(StateEdge::Start)?;
        self.behavior
            .init(&self.ctl)
            .map_err(|source| EngineError::ProcessFailed { id: self.id(), source })
    }

    /// Run one update tick: lazy init, `on_update` if running, then the
    /// terminal check. Returns whether the process is now dead.
    ///
    /// # Errors
    ///
    /// [`EngineError::ProcessFailed`] when the init or update hook errors.
    pub fn tick(&mut self, dt_secs: f64) -> EngineResult<bool> {
        if self.ctl.state() == ProcessState::Uninitialized {
            self.initialize()?;
        }
        if self.ctl.state() == ProcessState::Running {
            self.behavior
                .on_update(&self.ctl, dt_secs)
                .map_err(|source| EngineError::ProcessFailed { id: self.id(), source })?;
        }
        Ok(self.check_finished())
    }

    /// Run one fixed-timestep tick. Same contract as [`Process::tick`],
    /// driving `on_fixed_update`.
    ///
    /// # Errors
    ///
    /// [`EngineError::ProcessFailed`] when the init or fixed-update hook
    /// errors.
    pub fn fixed_tick(&mut self, dt_secs: f64) -> EngineResult<bool> {
        if self.ctl.state() == ProcessState::Uninitialized {
            self.initialize()?;
        }
        if self.ctl.state() == ProcessState::Running {
            self.behavior
                .on_fixed_update(&self.ctl, dt_secs)
                .map_err(|source| EngineError::ProcessFailed { id: self.id(), source })?;
        }
        Ok(self.check_finished())
    }

    /// If the process is terminal, dispatch the matching terminal callback
    /// and return `true`.
    ///
    /// The engine calls this exactly once per terminal transition (a dead
    /// process leaves its collection the same pass), so the callback fires
    /// exactly once.
    pub(crate) fn check_finished(&mut self) -> bool {
        match self.ctl.state() {
            ProcessState::Succeeded => {
                debug!(id = %self.id(), "process succeeded");
                self.behavior.on_success();
                true
            }
            ProcessState::Failed => {
                debug!(id = %self.id(), "process failed");
                self.behavior.on_fail();
                true
            }
            ProcessState::Aborted => {
                debug!(id = %self.id(), "process aborted");
                self.behavior.on_abort();
                true
            }
            _ => false,
        }
    }

    /// Dispatch the abort callback directly (immediate aborts, where the
    /// process is pulled from its collection before the reaping pass).
    pub(crate) fn dispatch_abort(&mut self) {
        self.behavior.on_abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl Behavior for Noop {
        fn on_update(&mut self, _ctl: &ProcessCtl, _dt: f64) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct SucceedAfter {
        ticks: u32,
    }
    impl Behavior for SucceedAfter {
        fn on_update(&mut self, ctl: &ProcessCtl, _dt: f64) -> anyhow::Result<()> {
            self.ticks -= 1;
            if self.ticks == 0 {
                ctl.succeed();
            }
            Ok(())
        }
    }

    #[test]
    fn ids_are_unique_and_monotonic() {
        let a = Process::new(Noop, 0);
        let b = Process::new(Noop, 0);
        assert!(b.id() > a.id());
    }

    #[test]
    fn legal_edges() {
        use ProcessState::{Aborted, Paused, Running, Succeeded, Uninitialized};
        assert_eq!(transition(Uninitialized, StateEdge::Start).unwrap(), Running);
        assert_eq!(transition(Running, StateEdge::Pause).unwrap(), Paused);
        assert_eq!(transition(Paused, StateEdge::Resume).unwrap(), Running);
        assert_eq!(transition(Paused, StateEdge::Succeed).unwrap(), Succeeded);
        assert_eq!(transition(Uninitialized, StateEdge::Abort).unwrap(), Aborted);
    }

    #[test]
    fn illegal_edges_are_rejected() {
        use ProcessState::{Aborted, Succeeded, Uninitialized};
        assert!(transition(Uninitialized, StateEdge::Succeed).is_err());
        assert!(transition(Uninitialized, StateEdge::Pause).is_err());
        assert!(transition(Succeeded, StateEdge::Start).is_err());
        assert!(transition(Aborted, StateEdge::Resume).is_err());
        assert!(transition(Succeeded, StateEdge::Remove).is_err());
    }

    #[test]
    fn tick_initializes_then_updates() {
        let mut p = Process::new(SucceedAfter { ticks: 2 }, 0);
        assert_eq!(p.ctl.state(), ProcessState::Uninitialized);
        assert!(!p.tick(0.1).unwrap());
        assert_eq!(p.ctl.state(), ProcessState::Running);
        assert!(p.tick(0.1).unwrap());
        assert!(p.ctl.is_dead());
    }

    #[test]
    fn paused_process_is_not_updated() {
        use std::sync::atomic::AtomicU32;

        struct Counting {
            ticks: Arc<AtomicU32>,
        }
        impl Behavior for Counting {
            fn on_update(&mut self, _ctl: &ProcessCtl, _dt: f64) -> anyhow::Result<()> {
                self.ticks.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }

        let ticks = Arc::new(AtomicU32::new(0));
        let mut p = Process::new(Counting { ticks: Arc::clone(&ticks) }, 0);
        p.tick(0.1).unwrap();
        p.ctl.pause();
        p.tick(0.1).unwrap();
        p.ctl.resume();
        p.tick(0.1).unwrap();
        assert_eq!(ticks.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn fixed_tick_uses_fixed_hook() {
        struct FixedOnly {
            fixed: u32,
        }
        impl Behavior for FixedOnly {
            fn on_update(&mut self, _ctl: &ProcessCtl, _dt: f64) -> anyhow::Result<()> {
                anyhow::bail!("frame tick should not run in this test")
            }
            fn on_fixed_update(&mut self, ctl: &ProcessCtl, _dt: f64) -> anyhow::Result<()> {
                self.fixed += 1;
                if self.fixed == 3 {
                    ctl.succeed();
                }
                Ok(())
            }
        }
        let mut p = Process::new(FixedOnly { fixed: 0 }, 0);
        assert!(!p.fixed_tick(0.01).unwrap());
        assert!(!p.fixed_tick(0.01).unwrap());
        assert!(p.fixed_tick(0.01).unwrap());
    }

    #[test]
    fn abort_edge_reachable_from_every_live_state() {
        let p = Process::new(Noop, 0);
        p.ctl.abort();
        assert_eq!(p.ctl.state(), ProcessState::Aborted);

        let q = Process::new(Noop, 0);
        q.ctl.try_edge(StateEdge::Start).unwrap();
        q.ctl.pause();
        q.ctl.abort();
        assert_eq!(q.ctl.state(), ProcessState::Aborted);
    }
}
