//! Main storage entry point for Tracestore.
//!
//! This module provides the `TraceStorage` struct, the only surface the
//! HTTP and codec layers are expected to call.

use crate::error::Result;
use std::path::Path;
use std::sync::Arc;
use tracestore_core::{QueryRequest, Span, TraceId};
use tracestore_engine::{
    AcceptSummary, InMemorySpanStorage, SpanStorage, StorageConfig, WideColumnStorage,
};
use tracestore_index::Clock;
use tracestore_storage::StoreClient;
use tracing::info;

/// Span storage with trace search.
///
/// Create one with [`TraceStorage::in_memory`] or [`TraceStorage::builder`].
///
/// # Example
///
/// ```ignore
/// use tracestore::prelude::*;
///
/// let storage = TraceStorage::builder()
///     .wide_column(client)
///     .config(StorageConfig::default().strict_trace_id(false))
///     .build()?;
///
/// storage.accept(spans).await?;
/// let traces = storage
///     .get_traces(QueryRequest::builder().service_name("frontend").end_ts(now).build()?)
///     .await?;
/// ```
#[derive(Clone)]
pub struct TraceStorage {
    inner: Arc<dyn SpanStorage>,
    config: StorageConfig,
}

impl TraceStorage {
    /// Scan-based storage with default settings
    pub fn in_memory() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a builder for storage configuration.
    pub fn builder() -> TraceStorageBuilder {
        TraceStorageBuilder::new()
    }

    /// Active configuration
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// The underlying variant, whose [`tracestore_engine::Call`]s can be
    /// cancelled
    pub fn calls(&self) -> &dyn SpanStorage {
        self.inner.as_ref()
    }

    /// Store spans. Index write failures are logged, not returned.
    pub async fn accept(&self, spans: Vec<Span>) -> Result<AcceptSummary> {
        Ok(self.inner.accept(spans).await?)
    }

    /// Traces matching every predicate of `request`, newest first
    pub async fn get_traces(&self, request: QueryRequest) -> Result<Vec<Vec<Span>>> {
        Ok(self.inner.get_traces(request).await?)
    }

    /// Spans of one trace; empty when unknown
    pub async fn get_trace(&self, trace_id: TraceId) -> Result<Vec<Span>> {
        Ok(self.inner.get_trace(trace_id).await?)
    }

    /// Spans of one trace by its 16 or 32 character hex id
    pub async fn get_trace_hex(&self, trace_id: &str) -> Result<Vec<Span>> {
        let trace_id = TraceId::parse(trace_id)?;
        self.get_trace(trace_id).await
    }

    /// Every service that reported a span, sorted
    pub async fn get_service_names(&self) -> Result<Vec<String>> {
        Ok(self.inner.get_service_names().await?)
    }

    /// Span names recorded by `service`, sorted
    pub async fn get_span_names(&self, service: &str) -> Result<Vec<String>> {
        Ok(self.inner.get_span_names(service).await?)
    }

    /// Remote services called by `service`, sorted
    pub async fn get_remote_service_names(&self, service: &str) -> Result<Vec<String>> {
        Ok(self.inner.get_remote_service_names(service).await?)
    }
}

impl std::fmt::Debug for TraceStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceStorage")
            .field("inner", &self.inner)
            .finish()
    }
}

enum Backend {
    InMemory,
    WideColumn(Arc<dyn StoreClient>),
}

/// Builder for [`TraceStorage`].
///
/// Defaults to the scan-based in-memory variant.
pub struct TraceStorageBuilder {
    backend: Backend,
    config: StorageConfig,
    clock: Option<Arc<dyn Clock>>,
}

impl std::fmt::Debug for TraceStorageBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self.backend {
            Backend::InMemory => "InMemory",
            Backend::WideColumn(_) => "WideColumn",
        };
        f.debug_struct("TraceStorageBuilder")
            .field("backend", &backend)
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish()
    }
}

impl TraceStorageBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            backend: Backend::InMemory,
            config: StorageConfig::default(),
            clock: None,
        }
    }

    /// Keep spans in process and scan on search.
    pub fn in_memory(mut self) -> Self {
        self.backend = Backend::InMemory;
        self
    }

    /// Store spans and indexes through a wide-column store client.
    pub fn wide_column(mut self, client: Arc<dyn StoreClient>) -> Self {
        self.backend = Backend::WideColumn(client);
        self
    }

    /// Use this configuration.
    pub fn config(mut self, config: StorageConfig) -> Self {
        self.config = config;
        self
    }

    /// Load configuration from a JSON file.
    pub fn config_path(mut self, path: impl AsRef<Path>) -> Result<Self> {
        self.config = StorageConfig::from_path(path)?;
        Ok(self)
    }

    /// Expire write-suppression and name caches against `clock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and open the storage.
    pub fn build(self) -> Result<TraceStorage> {
        let config = self.config;
        let inner: Arc<dyn SpanStorage> = match self.backend {
            Backend::InMemory => Arc::new(InMemorySpanStorage::new(config.clone())?),
            Backend::WideColumn(client) => Arc::new(match self.clock {
                Some(clock) => WideColumnStorage::with_clock(client, config.clone(), clock)?,
                None => WideColumnStorage::new(client, config.clone())?,
            }),
        };
        info!(storage = ?inner, "trace storage opened");
        Ok(TraceStorage { inner, config })
    }
}

impl Default for TraceStorageBuilder {
    fn default() -> Self {
        Self::new()
    }
}
