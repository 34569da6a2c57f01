//! Monotonic stopwatch used for all engine timing.

use std::time::{Duration, Instant};

/// A stop/start stopwatch over the monotonic clock.
///
/// The timer banks elapsed time across stop/start cycles, so `elapsed`
/// reports total running time, not time since the last start.
#[derive(Debug, Clone, Default)]
pub struct Timer {
    start: Option<Instant>,
    banked: Duration,
}

impl Timer {
    /// Create a stopped timer with no elapsed time.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            start: None,
            banked: Duration::ZERO,
        }
    }

    /// Create a timer that is already running.
    #[must_use]
    pub fn started() -> Self {
        let mut timer = Self::new();
        timer.start();
        timer
    }

    /// Whether the timer is currently counting.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.start.is_some()
    }

    /// Start counting. No-op if already running.
    pub fn start(&mut self) {
        if self.start.is_none() {
            self.start = Some(Instant::now());
        }
    }

    /// Stop counting, banking the elapsed time. No-op if stopped.
    pub fn stop(&mut self) {
        if let Some(start) = self.start.take() {
            self.banked += start.elapsed();
        }
    }

    /// Clear all elapsed time and stop.
    pub fn reset(&mut self) {
        self.start = None;
        self.banked = Duration::ZERO;
    }

    /// Reset and start again, returning the time elapsed until now.
    pub fn restart(&mut self) -> Duration {
        self.stop();
        let elapsed = self.banked;
        self.reset();
        self.start();
        elapsed
    }

    /// Total elapsed running time.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        let mut total = self.banked;
        if let Some(start) = self.start {
            total += start.elapsed();
        }
        total
    }

    /// Total elapsed running time in seconds.
    #[must_use]
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }
}
