//! Core scheduling abstractions: the process state machine, the process
//! queue, the worker pool, and the fixed-timestep simulator.

pub mod error;
pub mod process;
pub mod queue;
pub mod simulator;
pub mod worker_pool;

pub use error::{EngineError, EngineResult};
pub use process::{
    transition, Behavior, Process, ProcessCtl, ProcessId, ProcessState, ScheduleMode, StateEdge,
};
pub use queue::ProcessQueue;
pub use simulator::{Simulator, DEFAULT_MAX_FRAME_SLICE_SECS};
pub use worker_pool::{Task, WorkerPool};
