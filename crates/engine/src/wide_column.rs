//! Span storage over a wide-column store
//!
//! The store answers one predicate per read, so searches go through the
//! [`IndexQueryPlanner`] fan-out and intersection before the
//! [`TraceHydrator`] loads whole traces. Writes go through the
//! [`IndexWriteExecutor`].

use crate::call::Call;
use crate::config::StorageConfig;
use crate::consumer::{AcceptSummary, IndexWriteExecutor};
use crate::error::Result;
use crate::hydrator::TraceHydrator;
use crate::intersect::CandidateOverFetcher;
use crate::planner::IndexQueryPlanner;
use crate::SpanStorage;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracestore_core::{QueryRequest, Span, TimeBucketer, TraceId};
use tracestore_index::{Clock, SystemClock};
use tracestore_storage::{for_each_row, ReadStatement, StoreClient};
use tracing::{debug, info};

struct Inner {
    client: Arc<dyn StoreClient>,
    config: StorageConfig,
    executor: IndexWriteExecutor,
    planner: IndexQueryPlanner,
    hydrator: TraceHydrator,
}

/// [`SpanStorage`] backed by a [`StoreClient`]
#[derive(Clone)]
pub struct WideColumnStorage {
    inner: Arc<Inner>,
}

impl WideColumnStorage {
    /// Create storage over `client`. Fails on invalid configuration.
    pub fn new(client: Arc<dyn StoreClient>, config: StorageConfig) -> Result<Self> {
        Self::with_clock(client, config, Arc::new(SystemClock::new()))
    }

    /// Create storage whose caches expire against `clock`
    pub fn with_clock(
        client: Arc<dyn StoreClient>,
        config: StorageConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let bucketer = TimeBucketer::new(config.bucket_window_secs);
        let executor = IndexWriteExecutor::new(Arc::clone(&client), &config, clock)?;
        let planner = IndexQueryPlanner::new(
            bucketer,
            CandidateOverFetcher::new(config.index_fetch_multiplier),
            config.index_ttl_millis(),
            config.strict_trace_id,
        );
        let hydrator = TraceHydrator::new(config.strict_trace_id, config.max_trace_cols);
        info!(
            strict_trace_id = config.strict_trace_id,
            search_enabled = config.search_enabled,
            index_cache_max = config.index_cache_max,
            "wide-column span storage ready"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                config,
                executor,
                planner,
                hydrator,
            }),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    /// Query planner, for inspecting plans
    pub fn planner(&self) -> &IndexQueryPlanner {
        &self.inner.planner
    }

    /// Forget write suppression and name-table state
    pub fn clear_caches(&self) {
        self.inner.executor.clear();
    }
}

impl Inner {
    async fn get_traces(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> Result<Vec<Vec<Span>>> {
        if !self.config.search_enabled {
            return Ok(Vec::new());
        }
        let client = self.client.as_ref();
        let candidates = self.planner.candidates(client, &request, &cancel).await?;
        let trace_ids: Vec<TraceId> = candidates.into_iter().map(|(id, _)| id).collect();
        let mut traces = self.hydrator.hydrate(client, &trace_ids, &cancel).await?;

        if !self.config.strict_trace_id {
            // the low-bit index can match traces that differ in high bits
            let before = traces.len();
            traces.retain(|trace| {
                let wide = trace
                    .first()
                    .map_or(false, |span| span.trace_id().is_128_bit());
                !wide || request.test(trace)
            });
            if traces.len() < before {
                debug!(dropped = before - traces.len(), "dropped high-bit mismatches");
            }
        }
        Ok(traces)
    }

    async fn names(
        &self,
        statement: ReadStatement,
        cancel: CancellationToken,
    ) -> Result<Vec<String>> {
        if !self.config.search_enabled {
            return Ok(Vec::new());
        }
        let mut names = BTreeSet::new();
        for_each_row(self.client.as_ref(), &statement, &cancel, |row| {
            let name = row.into_name()?;
            if !name.is_empty() {
                names.insert(name);
            }
            Ok(())
        })
        .await?;
        Ok(names.into_iter().collect())
    }

    fn names_call(self: &Arc<Self>, statement: ReadStatement) -> Call<Vec<String>> {
        let inner = Arc::clone(self);
        Call::new(move |cancel| async move { inner.names(statement, cancel).await })
    }
}

impl SpanStorage for WideColumnStorage {
    fn accept(&self, spans: Vec<Span>) -> Call<AcceptSummary> {
        let inner = Arc::clone(&self.inner);
        Call::committing(async move { Ok(inner.executor.accept(&spans).await) })
    }

    fn get_traces(&self, request: QueryRequest) -> Call<Vec<Vec<Span>>> {
        let inner = Arc::clone(&self.inner);
        Call::new(move |cancel| async move { inner.get_traces(request, cancel).await })
    }

    fn get_trace(&self, trace_id: TraceId) -> Call<Vec<Span>> {
        let inner = Arc::clone(&self.inner);
        Call::new(move |cancel| async move {
            inner
                .hydrator
                .hydrate_one(inner.client.as_ref(), trace_id, &cancel)
                .await
        })
    }

    fn get_service_names(&self) -> Call<Vec<String>> {
        self.inner.names_call(ReadStatement::SelectServiceNames)
    }

    fn get_span_names(&self, service: &str) -> Call<Vec<String>> {
        let service = service.to_lowercase();
        if service.is_empty() {
            return Call::ready(Vec::new());
        }
        self.inner
            .names_call(ReadStatement::SelectSpanNames { service })
    }

    fn get_remote_service_names(&self, service: &str) -> Call<Vec<String>> {
        let service = service.to_lowercase();
        if service.is_empty() {
            return Call::ready(Vec::new());
        }
        self.inner
            .names_call(ReadStatement::SelectRemoteServiceNames { service })
    }
}

impl std::fmt::Debug for WideColumnStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WideColumnStorage")
            .field("config", &self.inner.config)
            .field("executor", &self.inner.executor)
            .finish()
    }
}
