//! Combining and ranking candidate trace ids
//!
//! Each index read yields a trace id to timestamp map. Bucketed reads of
//! one predicate are unioned, predicates are intersected, and the survivors
//! are ranked newest first and cut to the caller's limit.

use rustc_hash::FxHashMap;
use tracestore_core::TraceId;

/// Candidate trace ids with their newest index timestamp
pub type TraceIdTimestamps = FxHashMap<TraceId, u64>;

/// Key used to compare candidates across predicates.
///
/// In non-strict mode an index row written with a truncated 64-bit id
/// must meet the same trace written with 128 bits, so only the low bits
/// take part.
#[inline]
pub fn candidate_key(trace_id: TraceId, strict: bool) -> TraceId {
    if strict {
        trace_id
    } else {
        trace_id.to_low_64()
    }
}

/// AND across predicates, OR across the buckets of one predicate
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceIdSetIntersector;

impl TraceIdSetIntersector {
    /// Merge maps of the same predicate, keeping the newest timestamp
    pub fn union<I>(maps: I) -> TraceIdTimestamps
    where
        I: IntoIterator<Item = TraceIdTimestamps>,
    {
        let mut result = TraceIdTimestamps::default();
        for map in maps {
            if result.is_empty() {
                result = map;
                continue;
            }
            for (trace_id, ts) in map {
                result
                    .entry(trace_id)
                    .and_modify(|current| *current = (*current).max(ts))
                    .or_insert(ts);
            }
        }
        result
    }

    /// Trace ids present in every map, with the first map's timestamps.
    ///
    /// A single map passes through unchanged; an empty list or any empty
    /// map yields nothing.
    pub fn intersect(mut maps: Vec<TraceIdTimestamps>) -> TraceIdTimestamps {
        if maps.iter().any(|m| m.is_empty()) {
            return TraceIdTimestamps::default();
        }
        if maps.len() <= 1 {
            return maps.pop().unwrap_or_default();
        }
        let mut rest = maps.split_off(1);
        let mut result = maps.pop().unwrap_or_default();
        // probe the smaller maps first so misses are found early
        rest.sort_by_key(|m| m.len());
        result.retain(|trace_id, _| rest.iter().all(|m| m.contains_key(trace_id)));
        result
    }
}

/// Compensates for duplicate index rows by reading more than needed
#[derive(Debug, Clone, Copy)]
pub struct CandidateOverFetcher {
    multiplier: usize,
}

impl CandidateOverFetcher {
    /// Over-fetch by `multiplier`, at least one
    pub fn new(multiplier: usize) -> Self {
        Self {
            multiplier: multiplier.max(1),
        }
    }

    /// Configured multiplier
    pub fn multiplier(&self) -> usize {
        self.multiplier
    }

    /// Rows to request from each index read
    pub fn fetch_limit(&self, limit: usize) -> usize {
        limit.saturating_mul(self.multiplier)
    }

    /// Newest first, ties by trace id descending, at most `limit`
    pub fn select(&self, candidates: TraceIdTimestamps, limit: usize) -> Vec<(TraceId, u64)> {
        let mut ranked: Vec<(TraceId, u64)> = candidates.into_iter().collect();
        ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        ranked.truncate(limit);
        ranked
    }
}

impl Default for CandidateOverFetcher {
    fn default() -> Self {
        Self::new(3)
    }
}
