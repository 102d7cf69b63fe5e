//! Monotonic time source for the acquisition loop
//!
//! All settle delays and tick waits go through [`Clock`], so the whole pipeline
//! can be driven by [`ManualClock`] in tests without real-time waits.

use std::time::{Duration, Instant};

/// Monotonic clock with a blocking sleep
pub trait Clock {
    /// Time elapsed since the clock's origin
    fn now(&self) -> Duration;

    /// Block for `duration`
    fn sleep(&mut self, duration: Duration);

    /// Elapsed time in whole milliseconds
    fn now_ms(&self) -> u64 {
        self.now().as_millis() as u64
    }
}

/// Wall-clock implementation backed by [`Instant`]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    /// Create a new clock whose origin is now
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Simulated clock that only advances when slept on or stepped explicitly
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    now: Duration,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward without going through `sleep`, e.g. to model a slow
    /// bus transaction.
    pub fn advance(&mut self, duration: Duration) {
        self.now += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now
    }

    fn sleep(&mut self, duration: Duration) {
        self.now += duration;
    }
}
