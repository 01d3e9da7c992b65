//! Span Storage Comprehensive Test Suite
//!
//! This test suite drives the public `TraceStorage` API. Behaviour shared by
//! both storage variants runs against each of them; behaviour only the
//! wide-column variant has (index compression, bucketed reads) inspects the
//! in-memory store it writes to.
//!
//! ## Running Tests
//!
//! ```bash
//! # Run the whole suite
//! cargo test --test span_storage_comprehensive
//!
//! # Run the read path tests only
//! cargo test --test span_storage_comprehensive read_path::
//! ```

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracestore::prelude::*;

// Test modules
pub mod cancellation;
pub mod failures;
pub mod read_path;
pub mod search_disabled;
pub mod strict_trace_id;
pub mod write_path;

// =============================================================================
// SHARED TEST UTILITIES
// =============================================================================

/// Storage variants under test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Index tables over the in-memory wide-column store
    WideColumn,
    /// Scan-based storage
    InMemory,
}

/// Every variant
pub const VARIANTS: [Variant; 2] = [Variant::WideColumn, Variant::InMemory];

/// Storage plus the store behind it, when there is one
pub struct Fixture {
    pub storage: TraceStorage,
    pub store: Option<Arc<MemoryStore>>,
}

impl Fixture {
    /// The wide-column store; panics for the scan variant
    pub fn store(&self) -> &MemoryStore {
        self.store.as_deref().expect("wide-column variant")
    }
}

/// Open a variant with `config`
pub fn open(variant: Variant, config: StorageConfig) -> Fixture {
    match variant {
        Variant::WideColumn => {
            let store = Arc::new(MemoryStore::new());
            let storage = TraceStorage::builder()
                .wide_column(store.clone() as Arc<dyn StoreClient>)
                .config(config)
                .build()
                .expect("valid config");
            Fixture {
                storage,
                store: Some(store),
            }
        }
        Variant::InMemory => Fixture {
            storage: TraceStorage::builder()
                .in_memory()
                .config(config)
                .build()
                .expect("valid config"),
            store: None,
        },
    }
}

/// Current wall-clock time in epoch microseconds
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_micros() as u64
}

/// Query over the last hour, ending one second from now
pub fn last_hour() -> tracestore::model::QueryRequestBuilder {
    QueryRequest::builder()
        .end_ts(now_micros() / 1000 + 1000)
        .lookback(3_600_000)
        .limit(10)
}

/// Three-span trace: a `frontend` root calling `backend`.
///
/// - frontend SERVER `get /`, tagged `http.method=GET` (and `error` when set)
/// - frontend CLIENT `get /api` to backend
/// - backend SERVER `get /api`, sharing the client span id
pub fn sample_trace(trace_id: TraceId, start: u64, duration: u64, error: bool) -> Vec<Span> {
    let mut root = Span::builder()
        .trace_id(trace_id)
        .id(1)
        .kind(Kind::Server)
        .name("get /")
        .timestamp(start)
        .duration(duration)
        .local_endpoint(Endpoint::of("frontend"))
        .put_tag("http.method", "GET");
    if error {
        root = root.put_tag("error", "timeout");
    }
    let client = Span::builder()
        .trace_id(trace_id)
        .parent_id(1)
        .id(2)
        .kind(Kind::Client)
        .name("get /api")
        .timestamp(start + 1_000)
        .duration(duration / 2)
        .local_endpoint(Endpoint::of("frontend"))
        .remote_endpoint(Endpoint::of("backend"));
    let server = Span::builder()
        .trace_id(trace_id)
        .parent_id(1)
        .id(2)
        .kind(Kind::Server)
        .shared(true)
        .name("get /api")
        .timestamp(start + 1_500)
        .duration(duration / 3)
        .local_endpoint(Endpoint::of("backend"))
        .add_annotation(start + 2_000, "cache.miss");
    vec![
        root.build().unwrap(),
        client.build().unwrap(),
        server.build().unwrap(),
    ]
}

/// Low 64 bits of each trace's id, in result order
pub fn trace_lows(traces: &[Vec<Span>]) -> Vec<u64> {
    traces.iter().map(|t| t[0].trace_id().low()).collect()
}

/// Install a test log writer once; `RUST_LOG` controls the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
