//! Builders to construct engine components from configuration.

use crate::config::EngineConfig;
use crate::core::{EngineError, EngineResult, Simulator};

/// Build a [`Simulator`] from validated configuration.
///
/// A `worker_threads` of zero selects the default thread count (half the
/// logical CPUs, at least one).
///
/// # Errors
///
/// [`EngineError::InvalidConfig`] when validation fails.
pub fn build_simulator(cfg: &EngineConfig) -> EngineResult<Simulator> {
    cfg.validate().map_err(EngineError::InvalidConfig)?;

    let worker_threads = if cfg.worker_threads == 0 {
        num_cpus::get() / 2
    } else {
        cfg.worker_threads
    };

    Ok(Simulator::new(worker_threads).with_max_frame_slice(cfg.max_frame_slice_secs))
}
