//! Monotonic time source for expiring caches
//!
//! Caches never read wall-clock time directly. Tests drive expiration with
//! [`ManualClock`], including negative readings that a monotonic source is
//! free to return.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic nanosecond clock
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current reading in nanoseconds. Only differences are meaningful.
    fn now_nanos(&self) -> i64;
}

/// Clock backed by [`Instant`]
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Clock reading zero now
    pub fn new() -> Self {
        Self {
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
    fn now_nanos(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicI64,
}

impl ManualClock {
    /// Clock reading `nanos`
    pub fn new(nanos: i64) -> Self {
        Self {
            nanos: AtomicI64::new(nanos),
        }
    }

    /// Jump to `nanos`
    pub fn set(&self, nanos: i64) {
        self.nanos.store(nanos, Ordering::Release);
    }

    /// Move forward by `nanos`
    pub fn advance_nanos(&self, nanos: i64) {
        self.nanos.fetch_add(nanos, Ordering::AcqRel);
    }

    /// Move forward by a duration
    pub fn advance(&self, by: Duration) {
        self.advance_nanos(duration_nanos(by));
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> i64 {
        self.nanos.load(Ordering::Acquire)
    }
}

/// Duration in nanoseconds, saturating at `i64::MAX`
pub fn duration_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}
