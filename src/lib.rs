//! # Cadence
//!
//! A cooperative process-scheduling and fixed-timestep simulation engine.
//!
//! Cadence manages stateful "process" units: ordinary processes are ticked
//! deterministically on the simulation thread by a [`core::ProcessQueue`],
//! while threaded processes are handed to a fixed [`core::WorkerPool`] and
//! self-tick on a dedicated worker thread until they finish. A
//! [`core::Simulator`] drives the queue with a real-time accumulator loop so
//! simulated time advances in fixed steps regardless of wall-clock jitter.
//!
//! ## Core Pieces
//!
//! - **Process** — a unit of work with an explicit lifecycle state machine
//!   (`Uninitialized -> Running <-> Paused -> Succeeded | Failed | Aborted`).
//!   Domain logic implements the [`core::Behavior`] trait.
//! - **ProcessQueue** — owns the live processes, ticks them in sorting-layer
//!   order, reaps the dead, and surfaces failures captured on worker threads.
//! - **WorkerPool** — a fixed set of OS threads consuming a shared task
//!   queue; a task failure or panic never kills a worker, it is deferred and
//!   re-raised on the thread that next checks for failures.
//! - **Simulator** — the fixed-timestep driver (`update` once per frame,
//!   `fixed_update` per accumulated step).
//!
//! ## Example
//!
//! ```rust,ignore
//! use cadence::core::{Behavior, Process, ProcessCtl, Simulator};
//!
//! struct Countdown { remaining: u32 }
//!
//! impl Behavior for Countdown {
//!     fn on_update(&mut self, ctl: &ProcessCtl, _dt: f64) -> anyhow::Result<()> {
//!         self.remaining -= 1;
//!         if self.remaining == 0 {
//!             ctl.succeed();
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let mut sim = Simulator::new(2);
//! sim.queue_mut().attach(Process::new(Countdown { remaining: 3 }, 0), false)?;
//! sim.simulate(|elapsed| elapsed < 1.0, 0.01)?;
//! ```
//!
//! Failure propagation is deliberately coarse: a worker failure is fatal to
//! the simulation rather than recoverable per task, so the simulation thread
//! stays the single point of failure reporting.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling engine: processes, queue, worker pool, simulator.
pub mod core;
/// Configuration model for the engine.
pub mod config;
/// Builders to construct engine components from configuration.
pub mod builders;
/// Shared utilities (monotonic timer, telemetry).
pub mod util;
