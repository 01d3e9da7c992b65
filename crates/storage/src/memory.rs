//! In-memory wide-column store
//!
//! Each table is a DashMap of partitions, each partition an ordered map of
//! clustering keys. This mirrors the physical model the indexing layer is
//! written against: rows are only addressable by partition equality plus a
//! clustering range.
//!
//! # Design
//!
//! - DashMap: sharded by partition key, writes only lock the target shard
//! - BTreeMap: clustering order within a partition (timestamp descending)
//! - Paging: reads are served in pages of `page_size` rows
//!
//! # Instrumentation
//!
//! Tests observe the read path through the read log (one entry per logical
//! read, page continuations excluded) and inject failures per table.

use crate::client::StoreClient;
use crate::error::{Result, StoreError};
use crate::statement::{Mutation, Page, PagingState, ReadStatement, Row, Table, TimeRange};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::hash::Hash;
use std::ops::RangeBounds;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracestore_core::{Span, TraceId};
use tracing::trace;

/// Default rows per page
pub const DEFAULT_PAGE_SIZE: usize = 5000;

/// One table: partitions keyed by `P`, rows ordered by clustering key `C`
pub struct WideTable<P, C, V> {
    partitions: DashMap<P, BTreeMap<C, V>>,
}

impl<P, C, V> WideTable<P, C, V>
where
    P: Eq + Hash + Clone,
    C: Ord + Clone,
    V: Clone,
{
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            partitions: DashMap::new(),
        }
    }

    /// Insert or overwrite a row
    ///
    /// Only locks the partition's shard.
    #[inline]
    pub fn upsert(&self, partition: P, clustering: C, value: V) {
        self.partitions
            .entry(partition)
            .or_default()
            .insert(clustering, value);
    }

    /// Rows of one partition within a clustering range, in clustering order
    pub fn slice<R>(&self, partition: &P, range: R, limit: usize) -> Vec<(C, V)>
    where
        R: RangeBounds<C>,
    {
        self.partitions
            .get(partition)
            .map(|rows| {
                rows.range(range)
                    .take(limit)
                    .map(|(c, v)| (c.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every partition key
    pub fn partition_keys(&self) -> Vec<P> {
        self.partitions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Total rows across partitions
    pub fn row_count(&self) -> usize {
        self.partitions.iter().map(|entry| entry.value().len()).sum()
    }

    /// Number of partitions
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }
}

impl<P, C, V> Default for WideTable<P, C, V>
where
    P: Eq + Hash + Clone,
    C: Ord + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// (service, qualifier, bucket)
type IndexPartition = (String, String, i64);
/// Timestamp descending, then trace id
type IndexClustering = (Reverse<u64>, TraceId);
/// (trace id high, timestamp, span id, write sequence)
type SpanClustering = (u64, u64, u64, u64);

fn index_range(range: &TimeRange) -> std::ops::RangeInclusive<IndexClustering> {
    (Reverse(range.end_ts), TraceId::new(0, 0))..=(Reverse(range.start_ts), TraceId::new(u64::MAX, u64::MAX))
}

/// In-memory [`StoreClient`]
///
/// # Example
///
/// ```ignore
/// use tracestore_storage::{MemoryStore, StoreClient, Table};
/// use std::sync::Arc;
///
/// let store = Arc::new(MemoryStore::new().with_page_size(2));
/// store.fail_reads(Table::TraceByAnnotation);
/// ```
pub struct MemoryStore {
    spans: WideTable<u64, SpanClustering, Span>,
    trace_by_service_span: WideTable<IndexPartition, IndexClustering, Option<u64>>,
    trace_by_service_remote_service: WideTable<IndexPartition, IndexClustering, ()>,
    trace_by_annotation: WideTable<IndexPartition, IndexClustering, ()>,
    span_names: WideTable<String, String, ()>,
    remote_service_names: WideTable<String, String, ()>,
    page_size: usize,
    write_sequence: AtomicU64,
    pages_served: AtomicU64,
    read_log: Mutex<Vec<ReadStatement>>,
    writes: Mutex<FxHashMap<Table, u64>>,
    failing_reads: RwLock<FxHashSet<Table>>,
    failing_writes: RwLock<FxHashSet<Table>>,
    read_delay: RwLock<Option<Duration>>,
    write_delay: RwLock<Option<Duration>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            spans: WideTable::new(),
            trace_by_service_span: WideTable::new(),
            trace_by_service_remote_service: WideTable::new(),
            trace_by_annotation: WideTable::new(),
            span_names: WideTable::new(),
            remote_service_names: WideTable::new(),
            page_size: DEFAULT_PAGE_SIZE,
            write_sequence: AtomicU64::new(0),
            pages_served: AtomicU64::new(0),
            read_log: Mutex::new(Vec::new()),
            writes: Mutex::new(FxHashMap::default()),
            failing_reads: RwLock::new(FxHashSet::default()),
            failing_writes: RwLock::new(FxHashSet::default()),
            read_delay: RwLock::new(None),
            write_delay: RwLock::new(None),
        }
    }

    /// Serve reads in pages of `page_size` rows (minimum one)
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    // ========================================================================
    // Instrumentation
    // ========================================================================

    /// Logical reads issued so far, in arrival order
    pub fn read_log(&self) -> Vec<ReadStatement> {
        self.read_log.lock().clone()
    }

    /// Logical reads issued against one table
    pub fn reads_of(&self, table: Table) -> Vec<ReadStatement> {
        self.read_log
            .lock()
            .iter()
            .filter(|s| s.table() == table)
            .cloned()
            .collect()
    }

    /// Forget the read log
    pub fn clear_read_log(&self) {
        self.read_log.lock().clear();
    }

    /// Pages served, continuations included
    pub fn pages_served(&self) -> u64 {
        self.pages_served.load(Ordering::Acquire)
    }

    /// Mutations applied to a table
    pub fn write_count(&self, table: Table) -> u64 {
        self.writes.lock().get(&table).copied().unwrap_or(0)
    }

    /// Distinct rows stored in a table
    pub fn row_count(&self, table: Table) -> usize {
        match table {
            Table::Span => self.spans.row_count(),
            Table::TraceByServiceSpan => self.trace_by_service_span.row_count(),
            Table::TraceByServiceRemoteService => self.trace_by_service_remote_service.row_count(),
            Table::TraceByAnnotation => self.trace_by_annotation.row_count(),
            Table::ServiceSpan => self.span_names.row_count(),
            Table::ServiceRemoteService => self.remote_service_names.row_count(),
        }
    }

    /// Fail every read of a table until [`MemoryStore::heal`]
    pub fn fail_reads(&self, table: Table) {
        self.failing_reads.write().insert(table);
    }

    /// Fail every write to a table until [`MemoryStore::heal`]
    pub fn fail_writes(&self, table: Table) {
        self.failing_writes.write().insert(table);
    }

    /// Stop injecting failures
    pub fn heal(&self) {
        self.failing_reads.write().clear();
        self.failing_writes.write().clear();
    }

    /// Delay every page by `delay`, or stop delaying with `None`
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.write() = delay;
    }

    /// Delay every write by `delay`, or stop delaying with `None`
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.write() = delay;
    }

    // ========================================================================
    // Statement evaluation
    // ========================================================================

    fn evaluate(&self, statement: &ReadStatement) -> Vec<Row> {
        match statement {
            ReadStatement::SelectFromSpan {
                trace_id_low,
                limit,
            } => self
                .spans
                .slice(trace_id_low, .., *limit)
                .into_iter()
                .map(|(_, span)| Row::Span(span))
                .collect(),
            ReadStatement::SelectTraceIdsFromServiceSpan {
                service,
                span,
                bucket,
                range,
                duration,
                limit,
            } => {
                let partition = (service.clone(), span.clone(), *bucket);
                // duration is filtered before the limit, as the row cap applies to matches
                self.trace_by_service_span
                    .slice(&partition, index_range(range), usize::MAX)
                    .into_iter()
                    .filter(|(_, d)| match (duration, d) {
                        (None, _) => true,
                        (Some(filter), Some(millis)) => filter.contains(*millis),
                        (Some(_), None) => false,
                    })
                    .take(*limit)
                    .map(|((Reverse(ts), trace_id), _)| Row::TraceIdTimestamp { trace_id, ts })
                    .collect()
            }
            ReadStatement::SelectTraceIdsFromServiceRemoteService {
                service,
                remote_service,
                bucket,
                range,
                limit,
            } => {
                let partition = (service.clone(), remote_service.clone(), *bucket);
                self.trace_by_service_remote_service
                    .slice(&partition, index_range(range), *limit)
                    .into_iter()
                    .map(|((Reverse(ts), trace_id), _)| Row::TraceIdTimestamp { trace_id, ts })
                    .collect()
            }
            ReadStatement::SelectTraceIdsFromAnnotation {
                service,
                term,
                bucket,
                range,
                limit,
            } => {
                let partition = (service.clone(), term.clone(), *bucket);
                self.trace_by_annotation
                    .slice(&partition, index_range(range), *limit)
                    .into_iter()
                    .map(|((Reverse(ts), trace_id), _)| Row::TraceIdTimestamp { trace_id, ts })
                    .collect()
            }
            ReadStatement::SelectServiceNames => {
                let mut names = self.span_names.partition_keys();
                names.sort();
                names.into_iter().map(Row::Name).collect()
            }
            ReadStatement::SelectSpanNames { service } => self
                .span_names
                .slice(service, .., usize::MAX)
                .into_iter()
                .filter(|(name, _)| !name.is_empty())
                .map(|(name, _)| Row::Name(name))
                .collect(),
            ReadStatement::SelectRemoteServiceNames { service } => self
                .remote_service_names
                .slice(service, .., usize::MAX)
                .into_iter()
                .map(|(name, _)| Row::Name(name))
                .collect(),
        }
    }

    fn apply(&self, mutation: &Mutation) {
        match mutation {
            Mutation::InsertSpan(span) => {
                let sequence = self.write_sequence.fetch_add(1, Ordering::AcqRel);
                let trace_id = span.trace_id();
                self.spans.upsert(
                    trace_id.low(),
                    (trace_id.high(), span.timestamp_as_micros(), span.id(), sequence),
                    span.clone(),
                );
            }
            Mutation::InsertTraceByServiceSpan {
                service,
                span,
                bucket,
                ts,
                trace_id,
                duration_millis,
            } => self.trace_by_service_span.upsert(
                (service.clone(), span.clone(), *bucket),
                (Reverse(*ts), *trace_id),
                *duration_millis,
            ),
            Mutation::InsertTraceByServiceRemoteService {
                service,
                remote_service,
                bucket,
                ts,
                trace_id,
            } => self.trace_by_service_remote_service.upsert(
                (service.clone(), remote_service.clone(), *bucket),
                (Reverse(*ts), *trace_id),
                (),
            ),
            Mutation::InsertTraceByAnnotation {
                service,
                term,
                bucket,
                ts,
                trace_id,
            } => self.trace_by_annotation.upsert(
                (service.clone(), term.clone(), *bucket),
                (Reverse(*ts), *trace_id),
                (),
            ),
            Mutation::InsertServiceSpan { service, span } => {
                self.span_names.upsert(service.clone(), span.clone(), ())
            }
            Mutation::InsertServiceRemoteService {
                service,
                remote_service,
            } => self
                .remote_service_names
                .upsert(service.clone(), remote_service.clone(), ()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("spans", &self.spans.row_count())
            .field("span_partitions", &self.spans.partition_count())
            .field("page_size", &self.page_size)
            .finish()
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn read(
        &self,
        statement: &ReadStatement,
        paging_state: Option<PagingState>,
    ) -> Result<Page> {
        let table = statement.table();
        if self.failing_reads.read().contains(&table) {
            return Err(StoreError::Unavailable {
                table,
                message: "injected read failure".into(),
            });
        }
        if paging_state.is_none() {
            self.read_log.lock().push(statement.clone());
        }
        let delay = *self.read_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let offset = paging_state.map(|p| p.0).unwrap_or(0);
        let rows = self.evaluate(statement);
        let end = offset.saturating_add(self.page_size).min(rows.len());
        let next = if end < rows.len() {
            Some(PagingState(end))
        } else {
            None
        };
        self.pages_served.fetch_add(1, Ordering::AcqRel);
        trace!(%table, offset, total = rows.len(), "served page");
        Ok(Page {
            rows: rows.into_iter().skip(offset).take(end.saturating_sub(offset)).collect(),
            paging_state: next,
        })
    }

    async fn write(&self, mutation: &Mutation) -> Result<()> {
        let table = mutation.table();
        if self.failing_writes.read().contains(&table) {
            return Err(StoreError::Unavailable {
                table,
                message: "injected write failure".into(),
            });
        }
        let delay = *self.write_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(trace_id) = mutation.trace_id() {
            trace!(%table, %trace_id, "write");
        }
        self.apply(mutation);
        *self.writes.lock().entry(table).or_insert(0) += 1;
        Ok(())
    }
}
