//! Core types for span storage
//!
//! This crate defines the data model shared by the write and read paths:
//! - [`TraceId`]: 64/128-bit trace identifiers
//! - [`Span`]: immutable span records and their builder
//! - [`QueryRequest`]: validated multi-predicate trace searches
//! - [`TimeBucketer`]: coarse time buckets bounding index partitions
//! - [`trace`]: grouping, merge-by-id and clock-skew correction

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bucket;
pub mod error;
pub mod query;
pub mod span;
pub mod trace;
pub mod trace_id;

pub use bucket::{truncate_to_millis, TimeBucketer, DEFAULT_BUCKET_WINDOW_SECS};
pub use error::{Error, Result};
pub use query::{QueryRequest, QueryRequestBuilder};
pub use span::{Annotation, Endpoint, Kind, Span, SpanBuilder};
pub use trace_id::{parse_span_id, TraceId};
