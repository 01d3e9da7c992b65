//! Span storage engine
//!
//! This crate turns a store that can only answer "trace ids in this
//! partition within this time range" into a span storage that answers
//! multi-predicate trace searches:
//!
//! - `consumer`: span and index writes with write suppression
//! - `planner`: bucketed fan-out of one query into index reads
//! - `intersect`: union, intersection and ranking of candidates
//! - `hydrator`: trace loading, grouping and assembly
//! - `call`: the cancelable unit every entry point returns
//!
//! Two [`SpanStorage`] variants are provided: [`WideColumnStorage`] over a
//! [`tracestore_storage::StoreClient`], and [`InMemorySpanStorage`], which
//! scans and so needs none of the index machinery.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod call;
pub mod config;
pub mod consumer;
pub mod error;
pub mod hydrator;
pub mod in_memory;
pub mod intersect;
pub mod planner;
pub mod wide_column;

pub use call::{Call, CancelHandle};
pub use config::{StorageConfig, DEFAULT_BUCKET_WINDOW_SECS, DEFAULT_INDEX_TTL_SECS};
pub use consumer::{annotation_terms, guess_timestamp, AcceptSummary, IndexWriteExecutor};
pub use error::{Error, Result};
pub use hydrator::TraceHydrator;
pub use in_memory::InMemorySpanStorage;
pub use intersect::{candidate_key, CandidateOverFetcher, TraceIdSetIntersector, TraceIdTimestamps};
pub use planner::{IndexQueryPlanner, Predicate, QueryWindow, ServicePlan};
pub use wide_column::WideColumnStorage;

use tracestore_core::{QueryRequest, Span, TraceId};

/// Capability interface shared by the storage variants.
///
/// Every operation returns a [`Call`]: nothing runs until it is awaited,
/// and it can be cancelled before or while running.
pub trait SpanStorage: Send + Sync + std::fmt::Debug {
    /// Store spans and their index rows
    fn accept(&self, spans: Vec<Span>) -> Call<AcceptSummary>;

    /// Traces matching every predicate of `request`, newest first, at most
    /// `request.limit()`
    fn get_traces(&self, request: QueryRequest) -> Call<Vec<Vec<Span>>>;

    /// Spans of one trace; empty when unknown
    fn get_trace(&self, trace_id: TraceId) -> Call<Vec<Span>>;

    /// Service names, sorted
    fn get_service_names(&self) -> Call<Vec<String>>;

    /// Span names recorded by `service`, sorted
    fn get_span_names(&self, service: &str) -> Call<Vec<String>>;

    /// Remote services called by `service`, sorted
    fn get_remote_service_names(&self, service: &str) -> Call<Vec<String>>;
}
