//! Fixed-timestep simulation driver.
//!
//! The simulator decouples simulated time from wall-clock jitter with the
//! classic accumulator loop: real elapsed time is accumulated each frame
//! (clamped to a maximum slice so a stall cannot trigger an unbounded
//! catch-up burst), then drained in fixed-size steps. Each fixed step drives
//! the queue's `fixed_update`; the per-frame `update` runs once per outer
//! iteration with the measured frame delta.

use tracing::trace;

use super::error::{EngineError, EngineResult};
use super::queue::ProcessQueue;
use crate::util::clock::Timer;

/// Default cap on the simulated seconds one frame may contribute to the
/// accumulator. Bounds worst-case catch-up work after a stall.
pub const DEFAULT_MAX_FRAME_SLICE_SECS: f64 = 0.25;

/// Drives a [`ProcessQueue`] with a real-time fixed-timestep loop.
pub struct Simulator {
    queue: ProcessQueue,
    max_frame_slice_secs: f64,
}

impl Simulator {
    /// Create a simulator whose queue is backed by `worker_threads` worker
    /// threads (clamped to at least one).
    #[must_use]
    pub fn new(worker_threads: usize) -> Self {
        Self {
            queue: ProcessQueue::new(worker_threads),
            max_frame_slice_secs: DEFAULT_MAX_FRAME_SLICE_SECS,
        }
    }

    /// Override the maximum frame slice.
    #[must_use]
    pub const fn with_max_frame_slice(mut self, secs: f64) -> Self {
        self.max_frame_slice_secs = secs;
        self
    }

    /// The queue driven by this simulator.
    #[must_use]
    pub const fn queue(&self) -> &ProcessQueue {
        &self.queue
    }

    /// Mutable access to the queue, for attaching and aborting processes.
    pub fn queue_mut(&mut self) -> &mut ProcessQueue {
        &mut self.queue
    }

    /// Run the simulation loop until `pred` returns `false`.
    ///
    /// `pred` receives the total elapsed wall-clock seconds since the loop
    /// started. Each iteration measures the frame delta (clamped to the
    /// maximum frame slice), runs the queue's per-frame `update`, then
    /// drains the accumulator in steps of `fixed_step_secs`, each driving
    /// `fixed_update`. The leftover accumulator fraction is traced as the
    /// interpolation alpha; nothing in the core consumes it further.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidConfig`] for a non-positive or non-finite
    /// step; otherwise the first error surfaced by the queue.
    pub fn simulate<F>(&mut self, mut pred: F, fixed_step_secs: f64) -> EngineResult<()>
    where
        F: FnMut(f64) -> bool,
    {
        if !(fixed_step_secs.is_finite() && fixed_step_secs > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "fixed step must be a positive number of seconds, got {fixed_step_secs}"
            )));
        }

        let mut simulation_time = 0.0_f64;
        let mut total_elapsed = 0.0_f64;
        let mut previous = 0.0_f64;
        let mut accumulator = 0.0_f64;

        let timer = Timer::started();

        while pred(total_elapsed) {
            let frame = (total_elapsed - previous).min(self.max_frame_slice_secs);
            accumulator += frame;

            self.queue.update(frame)?;

            while accumulator >= fixed_step_secs {
                self.queue.fixed_update(fixed_step_secs)?;
                accumulator -= fixed_step_secs;
                simulation_time += fixed_step_secs;
            }

            let alpha = accumulator / fixed_step_secs;
            trace!(simulation_time, alpha, "frame complete");

            previous = total_elapsed;
            total_elapsed = timer.elapsed_secs();
        }

        Ok(())
    }
}
