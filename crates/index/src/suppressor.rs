//! Redundant index write suppression
//!
//! A trace-id index row only matters to a query if it widens the
//! `[first, last]` timestamp interval already indexed for its
//! `(partition, trace id)` key. [`IndexWriteSuppressor`] remembers those
//! intervals for a while and lets a batch of candidate rows through only
//! when they move an interval boundary.
//!
//! The suppressor is shared by every write batch of one index table.
//! Its cardinality is a soft limit: it is enforced when a batch starts, so
//! a large batch can leave the cache above the bound until the next one.

use crate::clock::Clock;
use crate::expiring::ExpiringCache;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tracestore_core::TraceId;
use tracing::debug;

/// One candidate index row
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexInput<P> {
    /// Partition key of the index row, bucket included
    pub partition: P,
    /// Millisecond-precision timestamp in microseconds
    pub ts: u64,
    /// Trace the row points at
    pub trace_id: TraceId,
}

impl<P> IndexInput<P> {
    /// Create a candidate row
    pub fn new(partition: P, ts: u64, trace_id: TraceId) -> Self {
        Self {
            partition,
            ts,
            trace_id,
        }
    }
}

/// Inclusive timestamp interval already indexed for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampRange {
    /// Earliest indexed timestamp
    pub first: u64,
    /// Latest indexed timestamp
    pub last: u64,
}

impl TimestampRange {
    fn single(ts: u64) -> Self {
        Self { first: ts, last: ts }
    }

    fn widen(&self, ts: u64) -> Self {
        Self {
            first: self.first.min(ts),
            last: self.last.max(ts),
        }
    }
}

type Key<P> = (P, TraceId);

/// Shared interval cache for one index table
pub struct IndexWriteSuppressor<P> {
    table: String,
    cardinality: usize,
    cache: ExpiringCache<Key<P>, TimestampRange>,
}

impl<P> IndexWriteSuppressor<P>
where
    P: Eq + Hash + Clone,
{
    /// Create a suppressor for `table` remembering at most about
    /// `cardinality` keys for `ttl` after their last write
    pub fn new(
        table: impl Into<String>,
        ttl: Duration,
        cardinality: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            table: table.into(),
            cardinality,
            cache: ExpiringCache::new(ttl, clock),
        }
    }

    /// Table name used in log output
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Soft bound on remembered keys
    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    /// Start a batch of candidate rows. Trims the cache first.
    pub fn batch(&self) -> SuppressorBatch<'_, P> {
        self.trim();
        SuppressorBatch {
            suppressor: self,
            inputs: Vec::new(),
            seen: FxHashSet::default(),
        }
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

    /// Check whether a key is remembered
    pub fn contains(&self, partition: &P, trace_id: TraceId) -> bool {
        self.cache.contains_key(&(partition.clone(), trace_id))
    }

    /// Interval remembered for a key
    pub fn range(&self, partition: &P, trace_id: TraceId) -> Option<TimestampRange> {
        self.cache.get(&(partition.clone(), trace_id))
    }

    /// Forget everything
    pub fn clear(&self) {
        self.cache.clear();
    }
}

impl<P> std::fmt::Debug for IndexWriteSuppressor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexWriteSuppressor")
            .field("table", &self.table)
            .field("cardinality", &self.cardinality)
            .field("cache", &self.cache)
            .finish()
    }
}

/// Candidate rows collected for one write batch
pub struct SuppressorBatch<'a, P> {
    suppressor: &'a IndexWriteSuppressor<P>,
    inputs: Vec<IndexInput<P>>,
    seen: FxHashSet<IndexInput<P>>,
}

impl<'a, P> SuppressorBatch<'a, P>
where
    P: Eq + Hash + Clone,
{
    /// Add a candidate row. Duplicates are ignored.
    pub fn add(&mut self, input: IndexInput<P>) {
        if self.seen.insert(input.clone()) {
            self.inputs.push(input);
        }
    }

    /// Number of distinct candidates
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// True if no candidates were added
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Apply the batch to the shared cache and return the rows to write.
    ///
    /// Inputs are applied in order. Each one renews its key's expiration;
    /// keys whose interval changed emit the candidates that now sit on an
    /// interval boundary. If a changed key was evicted by a concurrent
    /// batch meanwhile, the interval computed here is used instead.
    pub fn retain(self) -> Vec<IndexInput<P>> {
        let total = self.inputs.len();
        if total == 0 {
            return Vec::new();
        }

        let cache = &self.suppressor.cache;
        let mut changed_order: Vec<Key<P>> = Vec::new();
        let mut changed: FxHashMap<Key<P>, TimestampRange> = FxHashMap::default();
        let mut timestamps: FxHashMap<Key<P>, SmallVec<[u64; 4]>> = FxHashMap::default();

        for input in &self.inputs {
            let key = (input.partition.clone(), input.trace_id);
            let ts = input.ts;
            let seen = timestamps.entry(key.clone()).or_default();
            if !seen.contains(&ts) {
                seen.push(ts);
            }

            let mut widened = None;
            cache.upsert_with(key.clone(), |old| match old {
                Some(range) => {
                    let next = range.widen(ts);
                    if next != *range {
                        widened = Some(next);
                    }
                    next
                }
                None => {
                    let next = TimestampRange::single(ts);
                    widened = Some(next);
                    next
                }
            });
            if let Some(range) = widened {
                if changed.insert(key.clone(), range).is_none() {
                    changed_order.push(key);
                }
            }
        }

        let mut result = Vec::new();
        for key in changed_order {
            let Some(range) = cache.get(&key).or_else(|| changed.get(&key).copied()) else {
                continue;
            };
            let Some(seen) = timestamps.get(&key) else {
                continue;
            };
            let (partition, trace_id) = key;
            if seen.contains(&range.first) {
                result.push(IndexInput::new(partition.clone(), range.first, trace_id));
            }
            if range.last != range.first && seen.contains(&range.last) {
                result.push(IndexInput::new(partition, range.last, trace_id));
            }
        }

        if result.len() < total {
            debug!(
                table = %self.suppressor.table,
                "optimized out {}/{} inserts",
                total - result.len(),
                total
            );
        }
        result
    }
}
