//! Monotonic clock abstraction.
//!
//! All timing in the harness (acquisition latency, onset, frame timestamps,
//! sampling deadlines) is read through a [`Clock`] so sessions, samplers and
//! simulated devices share one time base.
//!
//! [`MonotonicClock`] is backed by `tokio::time::Instant`, which means tests
//! running under a paused runtime (`#[tokio::test(start_paused = true)]`) get
//! fully deterministic timestamps.

use tokio::time::Instant;

/// Millisecond time source shared by every timing component.
pub trait Clock: Send + Sync {
    /// Milliseconds elapsed since the clock's origin.
    fn now_ms(&self) -> f64;
}

/// Clock measuring milliseconds since its creation.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        // Integer nanoseconds keep whole-millisecond instants exact
        self.origin.elapsed().as_nanos() as f64 / 1_000_000.0
    }
}
