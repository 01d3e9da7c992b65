//! Loading and assembling traces from the span table
//!
//! Span rows are partitioned by the low 64 bits of the trace id, so one
//! partition read returns every span of a trace plus any 128-bit traces
//! sharing its low bits. Strict mode separates those again; non-strict mode
//! keeps them together so truncating clients join the full trace.

use crate::error::Result;
use futures::future::try_join_all;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio_util::sync::CancellationToken;
use tracestore_core::{trace, Span, TraceId};
use tracestore_storage::{for_each_row, ReadStatement, StoreClient};
use tracing::debug;

/// Fetches, groups and post-processes traces
#[derive(Debug, Clone, Copy)]
pub struct TraceHydrator {
    strict_trace_id: bool,
    max_trace_cols: usize,
}

impl TraceHydrator {
    /// Create a hydrator reading at most `max_trace_cols` rows per trace
    pub fn new(strict_trace_id: bool, max_trace_cols: usize) -> Self {
        Self {
            strict_trace_id,
            max_trace_cols,
        }
    }

    async fn read_partition(
        &self,
        client: &dyn StoreClient,
        trace_id_low: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<Span>> {
        let statement = ReadStatement::SelectFromSpan {
            trace_id_low,
            limit: self.max_trace_cols,
        };
        let mut spans = Vec::new();
        for_each_row(client, &statement, cancel, |row| {
            spans.push(row.into_span()?);
            Ok(())
        })
        .await?;
        Ok(spans)
    }

    /// Load the traces for `candidates`, in candidate order.
    ///
    /// Candidates with no spans are omitted. Any failed partition read
    /// fails the whole call.
    pub async fn hydrate(
        &self,
        client: &dyn StoreClient,
        candidates: &[TraceId],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<Span>>> {
        let mut seen = FxHashSet::default();
        let lows: Vec<u64> = candidates
            .iter()
            .map(TraceId::low)
            .filter(|low| seen.insert(*low))
            .collect();

        let partitions = try_join_all(
            lows.iter()
                .map(|low| self.read_partition(client, *low, cancel)),
        )
        .await?;

        let strict = self.strict_trace_id;
        let mut grouped: FxHashMap<TraceId, Vec<Span>> = FxHashMap::default();
        for span in partitions.into_iter().flatten() {
            let key = if strict {
                span.trace_id()
            } else {
                span.trace_id().to_low_64()
            };
            grouped.entry(key).or_default().push(span);
        }

        let mut traces = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let key = if strict {
                *candidate
            } else {
                candidate.to_low_64()
            };
            if let Some(spans) = grouped.remove(&key) {
                traces.push(assemble(spans));
            }
        }
        debug!(
            candidates = candidates.len(),
            traces = traces.len(),
            "hydrated traces"
        );
        Ok(traces)
    }

    /// Load one trace. Strict mode returns exact id matches only;
    /// otherwise every span sharing the low 64 bits.
    pub async fn hydrate_one(
        &self,
        client: &dyn StoreClient,
        trace_id: TraceId,
        cancel: &CancellationToken,
    ) -> Result<Vec<Span>> {
        let mut spans = self.read_partition(client, trace_id.low(), cancel).await?;
        if self.strict_trace_id {
            spans.retain(|span| span.trace_id() == trace_id);
        }
        if spans.is_empty() {
            return Ok(spans);
        }
        Ok(assemble(spans))
    }
}

/// Merge fragments and correct clock skew
fn assemble(spans: Vec<Span>) -> Vec<Span> {
    trace::correct_clock_skew(trace::merge(spans))
}
