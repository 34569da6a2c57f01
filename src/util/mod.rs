//! Shared utilities.

pub mod clock;
pub mod telemetry;

pub use clock::Timer;
pub use telemetry::init_tracing;
