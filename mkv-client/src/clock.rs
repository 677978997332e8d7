//! Monotonic time source used to measure command latency.

use std::time::Instant;

/// Nanosecond monotonic clock.
///
/// Readings are only meaningful relative to each other from the same clock.
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> u64;
}

/// `Instant`-backed clock counting from its own creation.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
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
    fn now_ns(&self) -> u64 {
        // u64 nanoseconds cover ~584 years of uptime.
        self.origin.elapsed().as_nanos() as u64
    }
}
