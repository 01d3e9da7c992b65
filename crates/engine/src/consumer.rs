//! Write path: span rows plus their denormalized index rows
//!
//! For each accepted span the executor always writes the span row. When
//! search is enabled and the span has a local service and a timestamp, it
//! derives candidate rows for every index table, passes them through that
//! table's [`IndexWriteSuppressor`], and writes name-table rows through a
//! [`DelayLimiter`]. Service-span rows carry a duration, so a row the
//! suppressor drops is still written when it raises the key's
//! [`DurationWatermark`]. All mutations run concurrently and fail
//! independently.

use crate::config::StorageConfig;
use crate::error::Result;
use futures::future::join_all;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracestore_core::{truncate_to_millis, Span, TimeBucketer, TraceId};
use tracestore_index::{
    Clock, DelayLimiter, DelayLimiterBuilder, DurationWatermark, IndexInput,
    IndexWriteSuppressor, SuppressorBatch,
};
use tracestore_storage::{Mutation, StoreClient, Table};
use tracing::{debug, warn};

/// Longest annotation value or tag term that is indexed
pub const MAX_TERM_LENGTH: usize = 256;

/// (service, span name / remote service / term, bucket)
pub type IndexPartition = (String, String, i64);

/// Outcome of one accept call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptSummary {
    /// Span rows attempted
    pub spans: usize,
    /// Index and name rows attempted after suppression
    pub index_rows_written: usize,
    /// Candidate index rows dropped as redundant
    pub index_rows_suppressed: usize,
    /// Mutations that failed; logged and otherwise ignored
    pub failed: usize,
}

/// Timestamp used to index a span: its own, else its first annotation's
pub fn guess_timestamp(span: &Span) -> Option<u64> {
    span.timestamp()
        .or_else(|| span.annotations().first().map(|a| a.timestamp))
        .filter(|ts| *ts != 0)
}

/// Terms a span can be found by: annotation values, tag keys and
/// `key=value` pairs, skipping any longer than [`MAX_TERM_LENGTH`]
pub fn annotation_terms(span: &Span) -> Vec<String> {
    let mut terms: Vec<String> = span
        .annotations()
        .iter()
        .map(|a| a.value.clone())
        .chain(span.tags().iter().flat_map(|(key, value)| {
            [key.clone(), format!("{}={}", key, value)]
        }))
        .filter(|term| !term.is_empty() && term.len() <= MAX_TERM_LENGTH)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

/// Per-table suppression; disabled when the cache bound is zero
struct Suppressors {
    service_span: IndexWriteSuppressor<IndexPartition>,
    service_span_durations: DurationWatermark<IndexPartition>,
    service_remote_service: IndexWriteSuppressor<IndexPartition>,
    annotation: IndexWriteSuppressor<IndexPartition>,
}

/// Candidate rows for one accept call, before suppression
#[derive(Default)]
struct Candidates {
    service_span: Vec<IndexInput<IndexPartition>>,
    service_remote_service: Vec<IndexInput<IndexPartition>>,
    annotation: Vec<IndexInput<IndexPartition>>,
    /// Longest duration seen per service-span row, in milliseconds
    durations: FxHashMap<(IndexPartition, u64, TraceId), u64>,
}

/// Issues span and index writes
pub struct IndexWriteExecutor {
    client: Arc<dyn StoreClient>,
    bucketer: TimeBucketer,
    search_enabled: bool,
    suppressors: Option<Suppressors>,
    span_names: DelayLimiter<(String, String)>,
    remote_service_names: DelayLimiter<(String, String)>,
}

impl IndexWriteExecutor {
    /// Create an executor from validated configuration
    pub fn new(
        client: Arc<dyn StoreClient>,
        config: &StorageConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let suppressors = (config.index_cache_max > 0).then(|| {
            let ttl = config.index_cache_ttl_duration();
            let max = config.index_cache_max;
            Suppressors {
                service_span: IndexWriteSuppressor::new(
                    Table::TraceByServiceSpan.name(),
                    ttl,
                    max,
                    Arc::clone(&clock),
                ),
                service_span_durations: DurationWatermark::new(ttl, max, Arc::clone(&clock)),
                service_remote_service: IndexWriteSuppressor::new(
                    Table::TraceByServiceRemoteService.name(),
                    ttl,
                    max,
                    Arc::clone(&clock),
                ),
                annotation: IndexWriteSuppressor::new(
                    Table::TraceByAnnotation.name(),
                    ttl,
                    max,
                    Arc::clone(&clock),
                ),
            }
        });
        let limiter = || {
            DelayLimiterBuilder::new()
                .expire_after(config.autocomplete_ttl_duration())
                .maximum_size(config.autocomplete_cardinality)
                .clock(Arc::clone(&clock))
        };
        Ok(Self {
            client,
            bucketer: TimeBucketer::new(config.bucket_window_secs),
            search_enabled: config.search_enabled,
            suppressors,
            span_names: limiter().build()?,
            remote_service_names: limiter().build()?,
        })
    }

    /// Write spans and their index rows.
    ///
    /// Never fails: each mutation failure is logged and counted.
    pub async fn accept(&self, spans: &[Span]) -> AcceptSummary {
        let mut mutations: Vec<Mutation> =
            spans.iter().cloned().map(Mutation::InsertSpan).collect();
        let mut summary = AcceptSummary {
            spans: spans.len(),
            ..AcceptSummary::default()
        };

        if self.search_enabled {
            let candidates = self.candidates(spans, &mut mutations);
            self.suppress(candidates, &mut mutations, &mut summary);
        }
        summary.index_rows_written = mutations.len() - spans.len();

        let client = self.client.as_ref();
        let results = join_all(mutations.iter().map(|m| client.write(m))).await;
        for (mutation, result) in mutations.iter().zip(results) {
            if let Err(e) = result {
                summary.failed += 1;
                warn!(
                    table = %mutation.table(),
                    trace_id = ?mutation.trace_id().map(|id| id.to_string()),
                    error = %e,
                    "write failed"
                );
                self.release_name(mutation);
            }
        }
        summary
    }

    /// Derive index candidates and muted name rows
    fn candidates(&self, spans: &[Span], mutations: &mut Vec<Mutation>) -> Candidates {
        let mut candidates = Candidates::default();
        for span in spans {
            let service = match span.local_service_name() {
                Some(service) => service.to_string(),
                None => continue,
            };
            let span_name = span.name().unwrap_or("").to_string();
            let remote = span.remote_service_name().map(str::to_string);

            if self
                .span_names
                .should_invoke((service.clone(), span_name.clone()))
            {
                mutations.push(Mutation::InsertServiceSpan {
                    service: service.clone(),
                    span: span_name.clone(),
                });
            }
            if let Some(remote) = &remote {
                if self
                    .remote_service_names
                    .should_invoke((service.clone(), remote.clone()))
                {
                    mutations.push(Mutation::InsertServiceRemoteService {
                        service: service.clone(),
                        remote_service: remote.clone(),
                    });
                }
            }

            let Some(ts_micros) = guess_timestamp(span) else {
                continue;
            };
            let ts = truncate_to_millis(ts_micros);
            let bucket = self.bucketer.bucket(ts_micros);
            let trace_id = span.trace_id();
            let duration_millis = span.duration().map(|d| d / 1000);

            let mut span_partitions = vec![(service.clone(), String::new(), bucket)];
            if !span_name.is_empty() {
                span_partitions.push((service.clone(), span_name.clone(), bucket));
            }
            for partition in span_partitions {
                if let Some(millis) = duration_millis {
                    let slot = candidates
                        .durations
                        .entry((partition.clone(), ts, trace_id))
                        .or_insert(millis);
                    *slot = (*slot).max(millis);
                }
                candidates
                    .service_span
                    .push(IndexInput::new(partition, ts, trace_id));
            }
            if let Some(remote) = remote {
                candidates.service_remote_service.push(IndexInput::new(
                    (service.clone(), remote, bucket),
                    ts,
                    trace_id,
                ));
            }
            for term in annotation_terms(span) {
                candidates.annotation.push(IndexInput::new(
                    (service.clone(), term, bucket),
                    ts,
                    trace_id,
                ));
            }
        }
        candidates
    }

    /// Drop redundant candidates and turn the rest into mutations
    fn suppress(
        &self,
        candidates: Candidates,
        mutations: &mut Vec<Mutation>,
        summary: &mut AcceptSummary,
    ) {
        let Candidates {
            service_span,
            service_remote_service,
            annotation,
            durations,
        } = candidates;

        let retained = |suppressor: Option<&IndexWriteSuppressor<IndexPartition>>,
                        inputs: Vec<IndexInput<IndexPartition>>| {
            match suppressor {
                Some(suppressor) => {
                    let mut batch: SuppressorBatch<'_, IndexPartition> = suppressor.batch();
                    let offered = inputs.len();
                    for input in inputs {
                        batch.add(input);
                    }
                    let kept = batch.retain();
                    (offered.saturating_sub(kept.len()), kept)
                }
                None => (0, inputs),
            }
        };

        let s = self.suppressors.as_ref();
        let offered = if s.is_some() {
            service_span.clone()
        } else {
            Vec::new()
        };
        let offered_len = offered.len();
        let (_, mut kept) = retained(s.map(|s| &s.service_span), service_span);
        if let Some(s) = s {
            let watermark = &s.service_span_durations;
            watermark.trim();
            let duration_of = |input: &IndexInput<IndexPartition>| {
                durations
                    .get(&(input.partition.clone(), input.ts, input.trace_id))
                    .copied()
            };
            // interval endpoints set the mark first, so only longer rows follow
            for input in &kept {
                if let Some(millis) = duration_of(input) {
                    watermark.raise(&input.partition, input.trace_id, millis);
                }
            }
            let mut written: FxHashSet<IndexInput<IndexPartition>> = kept.iter().cloned().collect();
            for input in offered {
                let Some(millis) = duration_of(&input) else {
                    continue;
                };
                if !written.contains(&input)
                    && watermark.raise(&input.partition, input.trace_id, millis)
                {
                    written.insert(input.clone());
                    kept.push(input);
                }
            }
            summary.index_rows_suppressed += offered_len.saturating_sub(kept.len());
        }
        for input in kept {
            let IndexInput {
                partition,
                ts,
                trace_id,
            } = input;
            let duration_millis = durations.get(&(partition.clone(), ts, trace_id)).copied();
            let (service, span, bucket) = partition;
            mutations.push(Mutation::InsertTraceByServiceSpan {
                service,
                span,
                bucket,
                ts,
                trace_id,
                duration_millis,
            });
        }

        let (dropped, kept) = retained(
            s.map(|s| &s.service_remote_service),
            service_remote_service,
        );
        summary.index_rows_suppressed += dropped;
        for input in kept {
            let (service, remote_service, bucket) = input.partition;
            mutations.push(Mutation::InsertTraceByServiceRemoteService {
                service,
                remote_service,
                bucket,
                ts: input.ts,
                trace_id: input.trace_id,
            });
        }

        let (dropped, kept) = retained(s.map(|s| &s.annotation), annotation);
        summary.index_rows_suppressed += dropped;
        for input in kept {
            let (service, term, bucket) = input.partition;
            mutations.push(Mutation::InsertTraceByAnnotation {
                service,
                term,
                bucket,
                ts: input.ts,
                trace_id: input.trace_id,
            });
        }

        if summary.index_rows_suppressed > 0 {
            debug!(
                suppressed = summary.index_rows_suppressed,
                "suppressed redundant index rows"
            );
        }
    }

    /// Let a failed name row be written again on the next accept
    fn release_name(&self, mutation: &Mutation) {
        match mutation {
            Mutation::InsertServiceSpan { service, span } => {
                self.span_names.invalidate(&(service.clone(), span.clone()))
            }
            Mutation::InsertServiceRemoteService {
                service,
                remote_service,
            } => self
                .remote_service_names
                .invalidate(&(service.clone(), remote_service.clone())),
            _ => {}
        }
    }

    /// Forget suppression and name-table state
    pub fn clear(&self) {
        if let Some(s) = &self.suppressors {
            s.service_span.clear();
            s.service_span_durations.clear();
            s.service_remote_service.clear();
            s.annotation.clear();
        }
        self.span_names.clear();
        self.remote_service_names.clear();
    }
}

impl std::fmt::Debug for IndexWriteExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexWriteExecutor")
            .field("search_enabled", &self.search_enabled)
            .field("suppression", &self.suppressors.is_some())
            .field("bucketer", &self.bucketer)
            .finish()
    }
}
