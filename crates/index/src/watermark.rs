//! Longest indexed duration per index key
//!
//! Duration-bearing index rows answer `min_duration`/`max_duration`
//! searches, so a row that does not widen the timestamp interval still
//! matters when it carries a longer duration than anything written for its
//! `(partition, trace id)` key. [`DurationWatermark`] remembers that
//! longest duration with the same expiry rules as [`IndexWriteSuppressor`].
//!
//! [`IndexWriteSuppressor`]: crate::suppressor::IndexWriteSuppressor

use crate::clock::Clock;
use crate::expiring::ExpiringCache;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tracestore_core::TraceId;

/// Shared duration high-water marks for one index table
pub struct DurationWatermark<P> {
    cardinality: usize,
    cache: ExpiringCache<(P, TraceId), u64>,
}

impl<P> DurationWatermark<P>
where
    P: Eq + Hash + Clone,
{
    /// Create a watermark remembering at most about `cardinality` keys for
    /// `ttl` after their last update
    pub fn new(ttl: Duration, cardinality: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            cardinality,
            cache: ExpiringCache::new(ttl, clock),
        }
    }

    /// Record `duration` for a key. Returns true if it is longer than any
    /// duration remembered for the key, or the key was not remembered.
    pub fn raise(&self, partition: &P, trace_id: TraceId, duration: u64) -> bool {
        let mut raised = false;
        self.cache
            .upsert_with((partition.clone(), trace_id), |old| match old {
                Some(&max) if max >= duration => max,
                _ => {
                    raised = true;
                    duration
                }
            });
        raised
    }

    /// Longest duration remembered for a key
    pub fn get(&self, partition: &P, trace_id: TraceId) -> Option<u64> {
        self.cache.get(&(partition.clone(), trace_id))
    }

    /// Drop expired keys, then evict the eldest until within cardinality
    pub fn trim(&self) {
        self.cache.trim(self.cardinality);
    }

    /// Number of remembered keys
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// True if nothing is remembered
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Forget everything
    pub fn clear(&self) {
        self.cache.clear();
    }
}

impl<P> std::fmt::Debug for DurationWatermark<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurationWatermark")
            .field("cardinality", &self.cardinality)
            .field("cache", &self.cache)
            .finish()
    }
}
