//! # Tracestore
//!
//! Span storage with trace search for distributed-tracing backends.
//!
//! Tracestore stores spans in a wide-column store whose reads can only
//! filter by partition key and a timestamp range, and still answers
//! multi-predicate searches ("traces of `frontend` calling `backend` with
//! `error` tagged, slower than 100ms") by maintaining denormalized index
//! tables and intersecting them at query time.
//!
//! ## Quick Start
//!
//! ```ignore
//! use tracestore::prelude::*;
//!
//! let storage = TraceStorage::builder()
//!     .wide_column(client)
//!     .build()?;
//!
//! storage.accept(spans).await?;
//!
//! let request = QueryRequest::builder()
//!     .service_name("frontend")
//!     .parse_annotation_query("error")
//!     .end_ts(now_millis)
//!     .build()?;
//! let traces = storage.get_traces(request).await?;
//! ```
//!
//! ## Variants
//!
//! - wide-column: index tables, write suppression, bucketed fan-out
//! - in-memory: scans retained traces, no index machinery
//!
//! ## Crates
//!
//! - [`tracestore_core`] - span model, trace ids, queries, trace assembly
//! - [`tracestore_storage`] - store client boundary and in-memory store
//! - [`tracestore_index`] - write suppression and name-table limiting
//! - [`tracestore_engine`] - planner, hydrator and the storage variants

#![warn(missing_docs)]

mod error;
mod storage;

pub mod prelude;

// Re-export main entry points
pub use error::{Error, Result};
pub use storage::{TraceStorage, TraceStorageBuilder};

// Re-export member crates
pub use tracestore_core as model;
pub use tracestore_engine as engine;
pub use tracestore_index as index;
pub use tracestore_storage as store;

// Re-export model types
pub use tracestore_core::{Annotation, Endpoint, Kind, QueryRequest, Span, TraceId};
pub use tracestore_engine::{AcceptSummary, StorageConfig};
