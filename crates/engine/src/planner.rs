//! Multi-predicate query planning over single-predicate index tables
//!
//! The store can only answer "trace ids in this partition within this time
//! range". A [`QueryRequest`] therefore becomes, per service:
//!
//! 1. one predicate per annotation term, read from `trace_by_annotation`
//! 2. a remote-service predicate, read from `trace_by_service_remote_service`
//! 3. a span-name/duration predicate, read from `trace_by_service_span`,
//!    also used when nothing else narrows the service
//!
//! Every predicate is read once per bucket of the query window. Buckets of
//! one predicate are unioned, predicates are intersected, and services are
//! unioned before ranking.

use crate::error::{Error, Result};
use crate::intersect::{candidate_key, CandidateOverFetcher, TraceIdSetIntersector, TraceIdTimestamps};
use futures::future::try_join_all;
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracestore_core::{QueryRequest, TimeBucketer, TraceId};
use tracestore_storage::{
    for_each_row, read_all, DurationRange, ReadStatement, Row, StoreClient, TimeRange,
};
use tracing::debug;

/// Clamped time window of a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryWindow {
    /// Clustering range in microseconds
    pub range: TimeRange,
    /// Buckets covering the range, newest first
    pub buckets: Vec<i64>,
}

/// One predicate: the union of its bucketed reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    /// Reads whose results are unioned
    pub reads: Vec<ReadStatement>,
}

/// Predicates to intersect for one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePlan {
    /// Local service name
    pub service: String,
    /// Predicates, all of which must match
    pub predicates: Vec<Predicate>,
}

impl ServicePlan {
    /// Every read of this plan
    pub fn reads(&self) -> impl Iterator<Item = &ReadStatement> {
        self.predicates.iter().flat_map(|p| p.reads.iter())
    }
}

/// Translates query requests into bucketed index reads
#[derive(Debug, Clone)]
pub struct IndexQueryPlanner {
    bucketer: TimeBucketer,
    over_fetcher: CandidateOverFetcher,
    index_ttl_millis: Option<u64>,
    strict_trace_id: bool,
}

impl IndexQueryPlanner {
    /// Create a planner
    pub fn new(
        bucketer: TimeBucketer,
        over_fetcher: CandidateOverFetcher,
        index_ttl_millis: Option<u64>,
        strict_trace_id: bool,
    ) -> Self {
        Self {
            bucketer,
            over_fetcher,
            index_ttl_millis,
            strict_trace_id,
        }
    }

    /// Over-fetch policy
    pub fn over_fetcher(&self) -> &CandidateOverFetcher {
        &self.over_fetcher
    }

    /// Query window clamped to retained data, given the wall clock.
    ///
    /// The start is raised to the oldest retained timestamp; the end is
    /// raised with it so the window never inverts.
    pub fn window_at(&self, request: &QueryRequest, now_millis: u64) -> Result<QueryWindow> {
        let oldest = self
            .index_ttl_millis
            .map(|ttl| now_millis.saturating_sub(ttl))
            .unwrap_or(0);
        let start = request
            .end_ts()
            .saturating_sub(request.lookback())
            .max(oldest);
        let end = request.end_ts().max(oldest);
        let buckets = self.bucketer.buckets_descending(start, end)?;
        Ok(QueryWindow {
            range: TimeRange::from_millis(start, end),
            buckets,
        })
    }

    /// Query window as of now
    pub fn window(&self, request: &QueryRequest) -> Result<QueryWindow> {
        let now = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
        self.window_at(request, now)
    }

    /// Predicates for one service
    pub fn plan_service(
        &self,
        request: &QueryRequest,
        service: &str,
        window: &QueryWindow,
    ) -> ServicePlan {
        let limit = self.over_fetcher.fetch_limit(request.limit());
        let per_bucket = |read: &dyn Fn(i64) -> ReadStatement| Predicate {
            reads: window.buckets.iter().map(|b| read(*b)).collect(),
        };
        let mut predicates = Vec::new();

        for (key, value) in request.annotation_query() {
            let term = if value.is_empty() {
                key.clone()
            } else {
                format!("{}={}", key, value)
            };
            predicates.push(per_bucket(&|bucket| ReadStatement::SelectTraceIdsFromAnnotation {
                service: service.to_string(),
                term: term.clone(),
                bucket,
                range: window.range,
                limit,
            }));
        }

        if let Some(remote_service) = request.remote_service_name() {
            predicates.push(per_bucket(&|bucket| {
                ReadStatement::SelectTraceIdsFromServiceRemoteService {
                    service: service.to_string(),
                    remote_service: remote_service.to_string(),
                    bucket,
                    range: window.range,
                    limit,
                }
            }));
        }

        if request.span_name().is_some() || request.min_duration().is_some() || predicates.is_empty()
        {
            let span = request.span_name().unwrap_or("").to_string();
            let duration = request
                .min_duration()
                .map(|min| DurationRange::from_micros(min, request.max_duration()));
            predicates.push(per_bucket(&|bucket| ReadStatement::SelectTraceIdsFromServiceSpan {
                service: service.to_string(),
                span: span.clone(),
                bucket,
                range: window.range,
                duration,
                limit,
            }));
        }

        ServicePlan {
            service: service.to_string(),
            predicates,
        }
    }

    /// Services to search: the requested one, or every known service
    pub async fn resolve_services(
        &self,
        client: &dyn StoreClient,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        if let Some(service) = request.service_name() {
            return Ok(vec![service.to_string()]);
        }
        let mut services = BTreeSet::new();
        for row in read_all(client, &ReadStatement::SelectServiceNames, cancel).await? {
            services.insert(row.into_name()?);
        }
        debug!(services = services.len(), "fanning out query over all services");
        Ok(services.into_iter().collect())
    }

    /// Run the plan and return at most `limit` candidates, newest first.
    ///
    /// All reads run concurrently; the first failure fails the query.
    pub async fn candidates(
        &self,
        client: &dyn StoreClient,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<(TraceId, u64)>> {
        let window = self.window(request)?;
        self.candidates_in(client, request, &window, cancel).await
    }

    /// [`IndexQueryPlanner::candidates`] over an explicit window
    pub async fn candidates_in(
        &self,
        client: &dyn StoreClient,
        request: &QueryRequest,
        window: &QueryWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<(TraceId, u64)>> {
        let services = self.resolve_services(client, request, cancel).await?;
        let plans: Vec<ServicePlan> = services
            .iter()
            .map(|service| self.plan_service(request, service, window))
            .collect();

        let reads: Vec<&ReadStatement> = plans.iter().flat_map(ServicePlan::reads).collect();
        debug!(
            services = plans.len(),
            buckets = window.buckets.len(),
            reads = reads.len(),
            "issuing index reads"
        );
        let strict = self.strict_trace_id;
        let mut results = try_join_all(
            reads
                .into_iter()
                .map(|statement| read_trace_ids(client, statement, strict, cancel)),
        )
        .await?
        .into_iter();

        let mut per_service = Vec::with_capacity(plans.len());
        for plan in &plans {
            let mut predicate_sets = Vec::with_capacity(plan.predicates.len());
            for predicate in &plan.predicates {
                let bucket_sets: Vec<TraceIdTimestamps> =
                    results.by_ref().take(predicate.reads.len()).collect();
                predicate_sets.push(TraceIdSetIntersector::union(bucket_sets));
            }
            per_service.push(TraceIdSetIntersector::intersect(predicate_sets));
        }

        let merged = TraceIdSetIntersector::union(per_service);
        Ok(self.over_fetcher.select(merged, request.limit()))
    }
}

/// Drain one index read into a trace id map, keeping the newest timestamp
async fn read_trace_ids(
    client: &dyn StoreClient,
    statement: &ReadStatement,
    strict: bool,
    cancel: &CancellationToken,
) -> Result<TraceIdTimestamps> {
    let mut result = TraceIdTimestamps::default();
    for_each_row(client, statement, cancel, |row: Row| {
        let (trace_id, ts) = row.into_trace_id_timestamp()?;
        result
            .entry(candidate_key(trace_id, strict))
            .and_modify(|current| *current = (*current).max(ts))
            .or_insert(ts);
        Ok(())
    })
    .await
    .map_err(Error::from)?;
    Ok(result)
}
