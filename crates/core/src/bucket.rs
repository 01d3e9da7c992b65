//! Time bucketing for index partitions
//!
//! Index partitions are keyed by a coarse bucket so that one service's rows
//! spread over many partitions as calendar time advances.

use crate::error::{Error, Result};

/// One day, the default bucket width
pub const DEFAULT_BUCKET_WINDOW_SECS: u64 = 24 * 60 * 60;

/// Maps timestamps onto fixed-width bucket ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBucketer {
    window_secs: u64,
}

impl TimeBucketer {
    /// Create a bucketer with the given window in seconds (minimum one second)
    pub fn new(window_secs: u64) -> Self {
        Self {
            window_secs: window_secs.max(1),
        }
    }

    /// Window width in seconds
    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    /// Bucket containing an epoch-microsecond timestamp
    #[inline]
    pub fn bucket(&self, ts_micros: u64) -> i64 {
        ((ts_micros / self.window_secs) / 1_000_000) as i64
    }

    /// Bucket containing an epoch-millisecond timestamp
    #[inline]
    pub fn bucket_millis(&self, ts_millis: u64) -> i64 {
        self.bucket(ts_millis.saturating_mul(1000))
    }

    /// Buckets covering `[start_millis, end_millis]`, newest first.
    ///
    /// Fails when the range is inverted.
    pub fn buckets_descending(&self, start_millis: u64, end_millis: u64) -> Result<Vec<i64>> {
        let start = self.bucket_millis(start_millis);
        let end = self.bucket_millis(end_millis);
        if start > end {
            return Err(Error::InvertedBuckets { start, end });
        }
        Ok((start..=end).rev().collect())
    }
}

impl Default for TimeBucketer {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_WINDOW_SECS)
    }
}

/// Round an epoch-microsecond timestamp down to millisecond precision.
///
/// Index rows carry millisecond precision, so two spans a few microseconds
/// apart land on the same index row.
#[inline]
pub fn truncate_to_millis(ts_micros: u64) -> u64 {
    1000 * (ts_micros / 1000)
}
