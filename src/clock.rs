//! Monotonic clock for `TIME_STAMP` and the profiling timers.
//!
//! `clock_gettime(MONOTONIC)` / Mach absolute time / `QueryPerformanceCounter`
//! are the platform primitives; `std::time::Instant` is backed by exactly
//! those on every target Rust supports, so there is no reason to reach past
//! it for a platform timer crate the reference corpus doesn't use either.

use std::time::Instant;

/// Process-wide reference point all timestamps are measured from.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    /// Start a clock whose epoch is "now".
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Seconds elapsed since the epoch, for the `TIME_STAMP` IR op (`F64`).
    pub fn now_seconds(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Nanoseconds elapsed since the epoch, for callers that want an `I64`.
    pub fn now_nanos(&self) -> i64 {
        self.epoch.elapsed().as_nanos() as i64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::start()
    }
}
