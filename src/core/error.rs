//! Error types for engine operations.

use thiserror::Error;

use super::process::{ProcessId, ProcessState, StateEdge};

/// Errors produced by the scheduling engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A state transition was requested from a state that does not permit it.
    #[error("illegal transition {edge:?} from state {from:?}")]
    IllegalTransition {
        /// State the process was in when the edge was requested.
        from: ProcessState,
        /// The requested edge.
        edge: StateEdge,
    },
    /// A process tick (init, update, or fixed update) returned an error.
    ///
    /// For threaded processes this is the deferred failure captured on the
    /// worker thread and re-raised by the queue's scan.
    #[error("process {id} failed")]
    ProcessFailed {
        /// Id of the failing process.
        id: ProcessId,
        /// The error returned by the behavior hook.
        #[source]
        source: anyhow::Error,
    },
    /// A worker thread panicked while running a task.
    #[error("worker task panicked: {0}")]
    WorkerPanic(String),
    /// The worker pool has been shut down; no more tasks can be accepted.
    #[error("worker pool has been shut down")]
    PoolShutdown,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;
