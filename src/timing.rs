// src/timing.rs

use rand::Rng;
use serde::Deserialize;
use std::time::{Duration, Instant};

// --- Jitter ---

/// Inclusive millisecond range a pause is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "[u32; 2]")]
pub struct JitterRange {
    pub lo_ms: u32,
    pub hi_ms: u32,
}

impl From<[u32; 2]> for JitterRange {
    fn from(pair: [u32; 2]) -> Self {
        JitterRange {
            lo_ms: pair[0],
            hi_ms: pair[1],
        }
    }
}

impl JitterRange {
    /// Uniform draw in `[lo_ms, hi_ms]`. Callers guarantee `lo_ms <= hi_ms`
    /// (validated at config load).
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        if self.lo_ms >= self.hi_ms {
            return self.lo_ms;
        }
        rng.gen_range(self.lo_ms..=self.hi_ms)
    }
}

// --- Clocks ---

/// Monotonic time source used by frontends to stamp keys and to sleep.
pub trait Clock {
    /// Time elapsed since the clock was created.
    fn now(&self) -> Duration;
    fn sleep(&mut self, duration: Duration);
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            origin: Instant::now(),
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
        self.origin.elapsed()
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock: `sleep` advances time instantly. Drives simulated runs.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Duration,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            now: Duration::ZERO,
        }
    }

    pub fn advance(&mut self, duration: Duration) {
        self.now += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now
    }

    fn sleep(&mut self, duration: Duration) {
        self.advance(duration);
    }
}

pub fn as_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
