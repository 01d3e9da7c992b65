//! Scan-based span storage
//!
//! Holds spans in process and answers searches by testing every retained
//! trace against the request, newest first. Every predicate is evaluated
//! in one pass, so none of the index, fan-out or intersection machinery is
//! involved. Memory is bounded by `max_span_count`; the eldest traces are
//! evicted first.

use crate::call::Call;
use crate::config::StorageConfig;
use crate::consumer::{guess_timestamp, AcceptSummary};
use crate::error::Result;
use crate::SpanStorage;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracestore_core::{trace, QueryRequest, Span, TraceId};
use tracing::debug;

#[derive(Default)]
struct State {
    /// Spans by the low 64 bits of their trace id
    traces: FxHashMap<u64, Vec<Span>>,
    /// Timestamp each retained trace is ordered and evicted by
    timestamps: FxHashMap<u64, u64>,
    /// (timestamp, low trace id), eldest first
    by_time: BTreeSet<(u64, u64)>,
    span_count: usize,
}

impl State {
    fn insert(&mut self, span: Span) {
        let low = span.trace_id().low();
        let ts = guess_timestamp(&span).unwrap_or(0);
        match self.timestamps.get(&low).copied() {
            None => {
                self.timestamps.insert(low, ts);
                self.by_time.insert((ts, low));
            }
            // an earlier span moves the whole trace back in time
            Some(current) if ts != 0 && (current == 0 || ts < current) => {
                self.by_time.remove(&(current, low));
                self.by_time.insert((ts, low));
                self.timestamps.insert(low, ts);
            }
            Some(_) => {}
        }
        self.traces.entry(low).or_default().push(span);
        self.span_count += 1;
    }

    fn evict_to(&mut self, max_span_count: usize) -> usize {
        let mut evicted = 0;
        while self.span_count > max_span_count {
            let Some((_, low)) = self.by_time.pop_first() else {
                break;
            };
            self.timestamps.remove(&low);
            if let Some(spans) = self.traces.remove(&low) {
                self.span_count -= spans.len();
                evicted += 1;
            }
        }
        evicted
    }

    fn get_traces(&self, request: &QueryRequest, strict: bool) -> Vec<Vec<Span>> {
        let mut result = Vec::new();
        for (_, low) in self.by_time.iter().rev() {
            let Some(spans) = self.traces.get(low) else {
                continue;
            };
            for group in trace::group_by_trace_id(spans.clone(), strict) {
                let assembled = assemble(group);
                if request.test(&assembled) {
                    result.push(assembled);
                    if result.len() >= request.limit() {
                        return result;
                    }
                }
            }
        }
        result
    }

    fn get_trace(&self, trace_id: TraceId, strict: bool) -> Vec<Span> {
        let Some(spans) = self.traces.get(&trace_id.low()) else {
            return Vec::new();
        };
        let matching: Vec<Span> = spans
            .iter()
            .filter(|span| !strict || span.trace_id() == trace_id)
            .cloned()
            .collect();
        if matching.is_empty() {
            return matching;
        }
        assemble(matching)
    }

    fn names(&self) -> BTreeMap<String, (BTreeSet<String>, BTreeSet<String>)> {
        let mut names: BTreeMap<String, (BTreeSet<String>, BTreeSet<String>)> = BTreeMap::new();
        for span in self.traces.values().flatten() {
            let Some(service) = span.local_service_name() else {
                continue;
            };
            let (span_names, remote_names) = names.entry(service.to_string()).or_default();
            if let Some(name) = span.name() {
                span_names.insert(name.to_string());
            }
            if let Some(remote) = span.remote_service_name() {
                remote_names.insert(remote.to_string());
            }
        }
        names
    }
}

fn assemble(spans: Vec<Span>) -> Vec<Span> {
    trace::correct_clock_skew(trace::merge(spans))
}

/// [`SpanStorage`] that keeps spans in memory and scans on search
#[derive(Clone)]
pub struct InMemorySpanStorage {
    config: Arc<StorageConfig>,
    state: Arc<Mutex<State>>,
}

impl InMemorySpanStorage {
    /// Create storage bounded by `config.max_span_count`
    pub fn new(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(State::default())),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Spans currently retained
    pub fn span_count(&self) -> usize {
        self.state.lock().span_count
    }

    /// Traces currently retained, counted by low trace id
    pub fn trace_count(&self) -> usize {
        self.state.lock().traces.len()
    }

    /// Drop everything
    pub fn clear(&self) {
        *self.state.lock() = State::default();
    }

    fn names_call<F>(&self, select: F) -> Call<Vec<String>>
    where
        F: FnOnce(BTreeMap<String, (BTreeSet<String>, BTreeSet<String>)>) -> Vec<String>
            + Send
            + 'static,
    {
        if !self.config.search_enabled {
            return Call::ready(Vec::new());
        }
        let state = Arc::clone(&self.state);
        Call::new(move |_| async move {
            let names = state.lock().names();
            Ok(select(names))
        })
    }
}

impl SpanStorage for InMemorySpanStorage {
    fn accept(&self, spans: Vec<Span>) -> Call<AcceptSummary> {
        let state = Arc::clone(&self.state);
        let max = self.config.max_span_count;
        Call::committing(async move {
            let summary = AcceptSummary {
                spans: spans.len(),
                ..AcceptSummary::default()
            };
            let mut state = state.lock();
            for span in spans {
                state.insert(span);
            }
            let evicted = state.evict_to(max);
            if evicted > 0 {
                debug!(evicted, retained = state.span_count, "evicted eldest traces");
            }
            Ok(summary)
        })
    }

    fn get_traces(&self, request: QueryRequest) -> Call<Vec<Vec<Span>>> {
        if !self.config.search_enabled {
            return Call::ready(Vec::new());
        }
        let state = Arc::clone(&self.state);
        let strict = self.config.strict_trace_id;
        Call::new(move |_| async move { Ok(state.lock().get_traces(&request, strict)) })
    }

    fn get_trace(&self, trace_id: TraceId) -> Call<Vec<Span>> {
        let state = Arc::clone(&self.state);
        let strict = self.config.strict_trace_id;
        Call::new(move |_| async move { Ok(state.lock().get_trace(trace_id, strict)) })
    }

    fn get_service_names(&self) -> Call<Vec<String>> {
        self.names_call(|names| names.into_keys().collect())
    }

    fn get_span_names(&self, service: &str) -> Call<Vec<String>> {
        let service = service.to_lowercase();
        self.names_call(move |mut names| {
            names
                .remove(&service)
                .map(|(span_names, _)| span_names.into_iter().collect())
                .unwrap_or_default()
        })
    }

    fn get_remote_service_names(&self, service: &str) -> Call<Vec<String>> {
        let service = service.to_lowercase();
        self.names_call(move |mut names| {
            names
                .remove(&service)
                .map(|(_, remote_names)| remote_names.into_iter().collect())
                .unwrap_or_default()
        })
    }
}

impl std::fmt::Debug for InMemorySpanStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySpanStorage")
            .field("max_span_count", &self.config.max_span_count)
            .field("span_count", &self.span_count())
            .finish()
    }
}
