//! Prepared statements and rows
//!
//! Each variant of [`ReadStatement`] and [`Mutation`] corresponds to one
//! prepared statement against one physical table. The store only answers
//! equality on the partition key plus a range on the clustering timestamp;
//! anything richer is assembled above this layer.

use crate::error::{Result, StoreError};
use std::fmt;
use tracestore_core::{Span, TraceId};

/// Physical tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    /// Spans partitioned by the low 64 bits of the trace id
    Span,
    /// Trace ids by (service, span name, bucket), with duration
    TraceByServiceSpan,
    /// Trace ids by (service, remote service, bucket)
    TraceByServiceRemoteService,
    /// Trace ids by (service, annotation or tag term, bucket)
    TraceByAnnotation,
    /// Span names by service
    ServiceSpan,
    /// Remote service names by service
    ServiceRemoteService,
}

impl Table {
    /// Every table, in schema order
    pub const ALL: [Table; 6] = [
        Table::Span,
        Table::TraceByServiceSpan,
        Table::TraceByServiceRemoteService,
        Table::TraceByAnnotation,
        Table::ServiceSpan,
        Table::ServiceRemoteService,
    ];

    /// Table name as it appears in the schema
    pub fn name(&self) -> &'static str {
        match self {
            Table::Span => "span",
            Table::TraceByServiceSpan => "trace_by_service_span",
            Table::TraceByServiceRemoteService => "trace_by_service_remote_service",
            Table::TraceByAnnotation => "trace_by_annotation",
            Table::ServiceSpan => "span_by_service",
            Table::ServiceRemoteService => "remote_service_by_service",
        }
    }

    /// True for the trace-id index tables
    pub fn is_trace_index(&self) -> bool {
        matches!(
            self,
            Table::TraceByServiceSpan | Table::TraceByServiceRemoteService | Table::TraceByAnnotation
        )
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inclusive clustering range in epoch microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    /// Earliest timestamp, inclusive
    pub start_ts: u64,
    /// Latest timestamp, inclusive
    pub end_ts: u64,
}

impl TimeRange {
    /// Range covering `[start_millis, end_millis]`
    pub fn from_millis(start_millis: u64, end_millis: u64) -> Self {
        Self {
            start_ts: start_millis.saturating_mul(1000),
            end_ts: end_millis.saturating_mul(1000),
        }
    }

    /// Check whether a timestamp falls inside the range
    #[inline]
    pub fn contains(&self, ts: u64) -> bool {
        ts >= self.start_ts && ts <= self.end_ts
    }
}

/// Inclusive duration filter in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DurationRange {
    /// Minimum duration, inclusive
    pub min_millis: u64,
    /// Maximum duration, inclusive
    pub max_millis: u64,
}

impl DurationRange {
    /// Convert a microsecond query range to the millisecond precision of
    /// the index; an open maximum becomes `u64::MAX`.
    pub fn from_micros(min: u64, max: Option<u64>) -> Self {
        Self {
            min_millis: min / 1000,
            max_millis: max.map(|m| m / 1000).unwrap_or(u64::MAX),
        }
    }

    /// Check whether a duration in milliseconds matches
    #[inline]
    pub fn contains(&self, millis: u64) -> bool {
        millis >= self.min_millis && millis <= self.max_millis
    }
}

/// Read statements, one per prepared query shape
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReadStatement {
    /// All spans of one span partition
    SelectFromSpan {
        /// Low 64 bits of the trace id
        trace_id_low: u64,
        /// Row cap for pathologically wide traces
        limit: usize,
    },
    /// Trace ids by service and span name; an empty span name means any
    SelectTraceIdsFromServiceSpan {
        /// Local service name
        service: String,
        /// Span name, or empty for all spans
        span: String,
        /// Time bucket
        bucket: i64,
        /// Timestamp window
        range: TimeRange,
        /// Optional duration filter
        duration: Option<DurationRange>,
        /// Row cap
        limit: usize,
    },
    /// Trace ids by service and remote service
    SelectTraceIdsFromServiceRemoteService {
        /// Local service name
        service: String,
        /// Remote service name
        remote_service: String,
        /// Time bucket
        bucket: i64,
        /// Timestamp window
        range: TimeRange,
        /// Row cap
        limit: usize,
    },
    /// Trace ids by annotation value, tag key or `key=value` term
    SelectTraceIdsFromAnnotation {
        /// Local service name
        service: String,
        /// Annotation or tag term
        term: String,
        /// Time bucket
        bucket: i64,
        /// Timestamp window
        range: TimeRange,
        /// Row cap
        limit: usize,
    },
    /// Distinct service names
    SelectServiceNames,
    /// Span names of one service
    SelectSpanNames {
        /// Local service name
        service: String,
    },
    /// Remote service names called by one service
    SelectRemoteServiceNames {
        /// Local service name
        service: String,
    },
}

impl ReadStatement {
    /// Table this statement reads
    pub fn table(&self) -> Table {
        match self {
            ReadStatement::SelectFromSpan { .. } => Table::Span,
            ReadStatement::SelectTraceIdsFromServiceSpan { .. } => Table::TraceByServiceSpan,
            ReadStatement::SelectTraceIdsFromServiceRemoteService { .. } => {
                Table::TraceByServiceRemoteService
            }
            ReadStatement::SelectTraceIdsFromAnnotation { .. } => Table::TraceByAnnotation,
            ReadStatement::SelectServiceNames | ReadStatement::SelectSpanNames { .. } => {
                Table::ServiceSpan
            }
            ReadStatement::SelectRemoteServiceNames { .. } => Table::ServiceRemoteService,
        }
    }

    /// Row cap, if the statement has one
    pub fn limit(&self) -> Option<usize> {
        match self {
            ReadStatement::SelectFromSpan { limit, .. }
            | ReadStatement::SelectTraceIdsFromServiceSpan { limit, .. }
            | ReadStatement::SelectTraceIdsFromServiceRemoteService { limit, .. }
            | ReadStatement::SelectTraceIdsFromAnnotation { limit, .. } => Some(*limit),
            _ => None,
        }
    }

    /// Bucket, for bucketed index reads
    pub fn bucket(&self) -> Option<i64> {
        match self {
            ReadStatement::SelectTraceIdsFromServiceSpan { bucket, .. }
            | ReadStatement::SelectTraceIdsFromServiceRemoteService { bucket, .. }
            | ReadStatement::SelectTraceIdsFromAnnotation { bucket, .. } => Some(*bucket),
            _ => None,
        }
    }
}

/// Write statements, one per prepared insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Primary span row
    InsertSpan(Span),
    /// Row in `trace_by_service_span`
    InsertTraceByServiceSpan {
        /// Local service name
        service: String,
        /// Span name, or empty for the any-span row
        span: String,
        /// Time bucket
        bucket: i64,
        /// Millisecond-precision timestamp in microseconds
        ts: u64,
        /// Trace id
        trace_id: TraceId,
        /// Duration in milliseconds
        duration_millis: Option<u64>,
    },
    /// Row in `trace_by_service_remote_service`
    InsertTraceByServiceRemoteService {
        /// Local service name
        service: String,
        /// Remote service name
        remote_service: String,
        /// Time bucket
        bucket: i64,
        /// Millisecond-precision timestamp in microseconds
        ts: u64,
        /// Trace id
        trace_id: TraceId,
    },
    /// Row in `trace_by_annotation`
    InsertTraceByAnnotation {
        /// Local service name
        service: String,
        /// Annotation or tag term
        term: String,
        /// Time bucket
        bucket: i64,
        /// Millisecond-precision timestamp in microseconds
        ts: u64,
        /// Trace id
        trace_id: TraceId,
    },
    /// Row in the span name table
    InsertServiceSpan {
        /// Local service name
        service: String,
        /// Span name
        span: String,
    },
    /// Row in the remote service name table
    InsertServiceRemoteService {
        /// Local service name
        service: String,
        /// Remote service name
        remote_service: String,
    },
}

impl Mutation {
    /// Table this mutation writes
    pub fn table(&self) -> Table {
        match self {
            Mutation::InsertSpan(_) => Table::Span,
            Mutation::InsertTraceByServiceSpan { .. } => Table::TraceByServiceSpan,
            Mutation::InsertTraceByServiceRemoteService { .. } => Table::TraceByServiceRemoteService,
            Mutation::InsertTraceByAnnotation { .. } => Table::TraceByAnnotation,
            Mutation::InsertServiceSpan { .. } => Table::ServiceSpan,
            Mutation::InsertServiceRemoteService { .. } => Table::ServiceRemoteService,
        }
    }

    /// Trace id the mutation belongs to, for logging
    pub fn trace_id(&self) -> Option<TraceId> {
        match self {
            Mutation::InsertSpan(span) => Some(span.trace_id()),
            Mutation::InsertTraceByServiceSpan { trace_id, .. }
            | Mutation::InsertTraceByServiceRemoteService { trace_id, .. }
            | Mutation::InsertTraceByAnnotation { trace_id, .. } => Some(*trace_id),
            _ => None,
        }
    }
}

/// A row returned by a read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    /// Row of the span table
    Span(Span),
    /// Row of a trace-id index table
    TraceIdTimestamp {
        /// Trace id
        trace_id: TraceId,
        /// Millisecond-precision timestamp in microseconds
        ts: u64,
    },
    /// Row of a name table
    Name(String),
}

impl Row {
    fn shape(&self) -> &'static str {
        match self {
            Row::Span(_) => "span",
            Row::TraceIdTimestamp { .. } => "trace_id_timestamp",
            Row::Name(_) => "name",
        }
    }

    /// Decode a span row
    pub fn into_span(self) -> Result<Span> {
        match self {
            Row::Span(span) => Ok(span),
            other => Err(StoreError::UnexpectedRow {
                expected: "span",
                actual: other.shape(),
            }),
        }
    }

    /// Decode an index row
    pub fn into_trace_id_timestamp(self) -> Result<(TraceId, u64)> {
        match self {
            Row::TraceIdTimestamp { trace_id, ts } => Ok((trace_id, ts)),
            other => Err(StoreError::UnexpectedRow {
                expected: "trace_id_timestamp",
                actual: other.shape(),
            }),
        }
    }

    /// Decode a name row
    pub fn into_name(self) -> Result<String> {
        match self {
            Row::Name(name) => Ok(name),
            other => Err(StoreError::UnexpectedRow {
                expected: "name",
                actual: other.shape(),
            }),
        }
    }
}

/// Opaque continuation token for the next page of a read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingState(pub(crate) usize);

/// One page of rows
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Rows in store order
    pub rows: Vec<Row>,
    /// Present when more rows follow
    pub paging_state: Option<PagingState>,
}
