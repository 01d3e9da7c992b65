//! Rate limiting of idempotent writes
//!
//! Name table rows (span names and remote service names per service) are
//! written over and over with identical content. [`DelayLimiter`] lets the
//! first write of a key through and mutes the same key for a delay period.

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::expiring::ExpiringCache;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// Default delay before a key may be written again
pub const DEFAULT_EXPIRE_AFTER: Duration = Duration::from_secs(3600);

/// Default bound on remembered keys
pub const DEFAULT_MAXIMUM_SIZE: usize = 20_000;

/// Mutes repeated invocations for the same key during a delay period
pub struct DelayLimiter<K> {
    cache: ExpiringCache<K, ()>,
    maximum_size: usize,
}

impl<K> DelayLimiter<K>
where
    K: Eq + Hash + Clone,
{
    /// Returns true if the caller should perform the action for `key`.
    ///
    /// The first call for a key returns true and starts its delay period;
    /// later calls return false until the period ends.
    pub fn should_invoke(&self, key: K) -> bool {
        self.cache.purge_expired();
        if !self.cache.insert_if_vacant(key, ()) {
            return false;
        }
        self.cache.evict_to(self.maximum_size);
        true
    }

    /// Forget a key, for example after the muted action failed
    pub fn invalidate(&self, key: &K) {
        self.cache.remove(key);
    }

    /// Forget every key
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Number of muted keys
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// True if no key is muted
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl<K> std::fmt::Debug for DelayLimiter<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayLimiter")
            .field("maximum_size", &self.maximum_size)
            .field("cache", &self.cache)
            .finish()
    }
}

/// Builder for [`DelayLimiter`]
#[derive(Debug, Clone)]
pub struct DelayLimiterBuilder {
    expire_after: Duration,
    maximum_size: usize,
    clock: Option<Arc<dyn Clock>>,
}

impl Default for DelayLimiterBuilder {
    fn default() -> Self {
        Self {
            expire_after: DEFAULT_EXPIRE_AFTER,
            maximum_size: DEFAULT_MAXIMUM_SIZE,
            clock: None,
        }
    }
}

impl DelayLimiterBuilder {
    /// Builder with [`DEFAULT_EXPIRE_AFTER`] and [`DEFAULT_MAXIMUM_SIZE`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay period after a key was let through
    pub fn expire_after(mut self, expire_after: Duration) -> Self {
        self.expire_after = expire_after;
        self
    }

    /// Bound on remembered keys; the eldest are forgotten first
    pub fn maximum_size(mut self, maximum_size: usize) -> Self {
        self.maximum_size = maximum_size;
        self
    }

    /// Time source, [`SystemClock`] by default
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate and build
    pub fn build<K>(self) -> Result<DelayLimiter<K>>
    where
        K: Eq + Hash + Clone,
    {
        if self.expire_after.is_zero() {
            return Err(Error::NonPositiveExpiration(self.expire_after));
        }
        if self.maximum_size == 0 {
            return Err(Error::ZeroBound {
                name: "maximum_size",
            });
        }
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>);
        Ok(DelayLimiter {
            cache: ExpiringCache::new(self.expire_after, clock),
            maximum_size: self.maximum_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SECOND: i64 = 1_000_000_000;

    fn limiter(clock: &Arc<ManualClock>) -> DelayLimiter<u64> {
        DelayLimiterBuilder::new()
            .expire_after(Duration::from_secs(3))
            .clock(clock.clone() as Arc<dyn Clock>)
            .build()
            .unwrap()
    }

    #[test]
    fn test_mutes_during_delay_period() {
        let clock = Arc::new(ManualClock::new(SECOND));
        let limiter = limiter(&clock);

        assert!(limiter.should_invoke(0));
        clock.set(SECOND * 2);
        assert!(!limiter.should_invoke(0));
        clock.set(SECOND * 4);
        assert!(limiter.should_invoke(0));
    }

    #[test]
    fn test_contexts_are_independent() {
        let clock = Arc::new(ManualClock::new(SECOND));
        let limiter = limiter(&clock);

        assert!(limiter.should_invoke(0));
        clock.set(SECOND * 2);
        assert!(!limiter.should_invoke(0));
        assert!(limiter.should_invoke(1));
        clock.set(SECOND * 4);
        assert!(limiter.should_invoke(0));
        assert!(!limiter.should_invoke(1));
    }

    #[test]
    fn test_works_on_rollover() {
        let clock = Arc::new(ManualClock::new(-SECOND));
        let limiter = limiter(&clock);

        assert!(limiter.should_invoke(0));
        clock.set(0);
        assert!(!limiter.should_invoke(0));
        clock.set(SECOND * 2);
        assert!(limiter.should_invoke(0));
    }

    #[test]
    fn test_works_on_same_nanos() {
        let clock = Arc::new(ManualClock::new(SECOND));
        let limiter = limiter(&clock);

        assert!(limiter.should_invoke(0));
        clock.set(SECOND * 4);
        assert!(limiter.should_invoke(0));
        assert!(!limiter.should_invoke(0));
    }

    #[test]
    fn test_invalidate() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter(&clock);

        assert!(limiter.should_invoke(5));
        limiter.invalidate(&5);
        assert!(limiter.should_invoke(5));
        limiter.clear();
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_maximum_size() {
        let limiter: DelayLimiter<u64> = DelayLimiterBuilder::new()
            .expire_after(Duration::from_secs(15))
            .maximum_size(1000)
            .build()
            .unwrap();

        for key in 0..10_000u64 {
            assert!(limiter.should_invoke(key));
        }
        assert!(limiter.should_invoke(0), "evicted");
        assert!(!limiter.should_invoke(9_999), "not evicted");
        assert_eq!(limiter.len(), 1000);
    }

    #[test]
    fn test_maximum_size_parallel() {
        let limiter: DelayLimiter<u64> = DelayLimiterBuilder::new()
            .expire_after(Duration::from_secs(15))
            .maximum_size(1000)
            .build()
            .unwrap();
        let invoked = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for t in 0..4u64 {
                let limiter = &limiter;
                let invoked = &invoked;
                scope.spawn(move || {
                    for key in (0..1500u64).filter(|k| k % 4 == t) {
                        if limiter.should_invoke(key) {
                            invoked.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        assert_eq!(invoked.load(Ordering::Relaxed), 1500);
        assert_eq!(limiter.len(), 1000);
    }

    #[test]
    fn test_rejects_invalid_bounds() {
        assert_eq!(
            DelayLimiterBuilder::new()
                .expire_after(Duration::ZERO)
                .build::<u64>()
                .unwrap_err(),
            Error::NonPositiveExpiration(Duration::ZERO)
        );
        assert!(DelayLimiterBuilder::new()
            .maximum_size(0)
            .build::<u64>()
            .is_err());
    }
}
