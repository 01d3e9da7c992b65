//! Write-path caches for span indexing
//!
//! Two caches keep the index tables from being rewritten needlessly:
//! - [`IndexWriteSuppressor`]: drops trace-id index rows that would not
//!   widen the timestamp interval already indexed for a trace
//! - [`DurationWatermark`]: lets duration-bearing rows through when they
//!   carry a longer duration than any written for their key
//! - [`DelayLimiter`]: mutes repeated writes of identical name-table rows
//!
//! Both are built on [`ExpiringCache`] and read time through [`Clock`] so
//! that expiration can be tested deterministically.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod delay_limiter;
pub mod error;
pub mod expiring;
pub mod suppressor;
pub mod watermark;

pub use clock::{Clock, ManualClock, SystemClock};
pub use delay_limiter::{DelayLimiter, DelayLimiterBuilder, DEFAULT_EXPIRE_AFTER, DEFAULT_MAXIMUM_SIZE};
pub use error::{Error, Result};
pub use expiring::ExpiringCache;
pub use suppressor::{IndexInput, IndexWriteSuppressor, SuppressorBatch, TimestampRange};
pub use watermark::DurationWatermark;
