//! Write path: accept summaries, index compression and name tables

use crate::*;
use tracestore::store::Table;

const INDEX_TABLES: [Table; 3] = [
    Table::TraceByServiceSpan,
    Table::TraceByServiceRemoteService,
    Table::TraceByAnnotation,
];

fn index_writes(store: &MemoryStore) -> u64 {
    INDEX_TABLES.iter().map(|t| store.write_count(*t)).sum()
}

/// One trace of `n` frontend client spans, 1ms apart
fn long_trace(trace_id: TraceId, start: u64, n: u64) -> Vec<Span> {
    (0..n)
        .map(|i| {
            Span::builder()
                .trace_id(trace_id)
                .parent_id(1)
                .id(i + 2)
                .kind(Kind::Client)
                .name("get")
                .timestamp(start + i * 1_000)
                .duration(500)
                .local_endpoint(Endpoint::of("frontend"))
                .remote_endpoint(Endpoint::of("backend"))
                .put_tag("http.method", "GET")
                .build()
                .unwrap()
        })
        .collect()
}

#[tokio::test]
async fn test_accept_reports_span_count() {
    for variant in VARIANTS {
        let fx = open(variant, StorageConfig::default());
        let summary = fx
            .storage
            .accept(sample_trace(TraceId::from_low(1), now_micros(), 50_000, false))
            .await
            .unwrap();
        assert_eq!(summary.spans, 3, "{:?}", variant);
        assert_eq!(summary.failed, 0, "{:?}", variant);
    }
}

#[tokio::test]
async fn test_101_spans_compress_index_rows() {
    init_tracing();
    let fx = open(Variant::WideColumn, StorageConfig::default());
    let store = fx.store();
    let spans = long_trace(TraceId::from_low(7), now_micros() - 60_000_000, 101);

    let first = fx.storage.accept(spans.clone()).await.unwrap();
    assert_eq!(store.row_count(Table::Span), 101);
    for table in INDEX_TABLES {
        let rows = store.row_count(table);
        assert!(rows > 0, "{} is empty", table);
        assert!(rows < 20, "{} kept {} rows", table, rows);
    }
    assert!(first.index_rows_suppressed > 0);

    // an identical batch adds no index rows at all
    let before = index_writes(store);
    let second = fx.storage.accept(spans).await.unwrap();
    assert_eq!(index_writes(store), before);
    assert_eq!(second.index_rows_written, 0);
    assert_eq!(store.write_count(Table::Span), 202);
}

#[tokio::test]
async fn test_same_row_twice_writes_once() {
    let fx = open(Variant::WideColumn, StorageConfig::default());
    let store = fx.store();
    let span = long_trace(TraceId::from_low(3), now_micros(), 1);

    fx.storage.accept(span.clone()).await.unwrap();
    fx.storage.accept(span).await.unwrap();
    // "" and "get"
    assert_eq!(store.write_count(Table::TraceByServiceSpan), 2);
    assert_eq!(store.write_count(Table::TraceByServiceRemoteService), 1);
}

#[tokio::test]
async fn test_compressed_interval_keeps_both_ends() {
    let fx = open(Variant::WideColumn, StorageConfig::default());
    let start = now_micros() - 600_000_000;
    let spans = long_trace(TraceId::from_low(9), start, 101);
    let last = start + 100_000;
    fx.storage.accept(spans).await.unwrap();

    // a window holding only the first or only the last timestamp still
    // finds the trace through the remote-service index
    for ts in [start, last] {
        let millis = ts / 1000;
        let request = QueryRequest::builder()
            .service_name("frontend")
            .remote_service_name("backend")
            .end_ts(millis)
            .lookback(1)
            .limit(10)
            .build()
            .unwrap();
        let traces = fx.storage.get_traces(request).await.unwrap();
        assert_eq!(trace_lows(&traces), vec![9], "missing row at {}", ts);
    }
}

#[tokio::test]
async fn test_trace_across_midnight_keeps_ends_per_bucket() {
    const DAY: u64 = 86_400_000_000;
    let fx = open(Variant::WideColumn, StorageConfig::default());
    let store = fx.store();
    // a midnight safely inside the index ttl and in the past
    let midnight = (now_micros() / DAY) * DAY - DAY;
    let spans = long_trace(TraceId::from_low(11), midnight - 50_000, 101);

    fx.storage.accept(spans.clone()).await.unwrap();
    // ("" and "get") x two buckets x both ends
    assert_eq!(store.row_count(Table::TraceByServiceSpan), 8);
    assert_eq!(store.row_count(Table::TraceByServiceRemoteService), 4);

    let before = index_writes(store);
    let second = fx.storage.accept(spans).await.unwrap();
    assert_eq!(second.index_rows_written, 0);
    assert_eq!(index_writes(store), before);
    assert_eq!(store.row_count(Table::TraceByServiceSpan), 8);

    // each window holds only the bucket's own end row, never the trace's ends
    let midnight_millis = midnight / 1000;
    for (end_ts, lookback) in [(midnight_millis + 60, 59), (midnight_millis - 1, 9)] {
        let request = QueryRequest::builder()
            .service_name("frontend")
            .end_ts(end_ts)
            .lookback(lookback)
            .limit(10)
            .build()
            .unwrap();
        let traces = fx.storage.get_traces(request).await.unwrap();
        assert_eq!(trace_lows(&traces), vec![11], "window ending {}", end_ts);
    }
}

#[tokio::test]
async fn test_suppression_disabled_writes_every_row() {
    let fx = open(Variant::WideColumn, StorageConfig::default().index_cache_max(0));
    let store = fx.store();
    fx.storage
        .accept(long_trace(TraceId::from_low(5), now_micros(), 10))
        .await
        .unwrap();
    assert_eq!(store.write_count(Table::TraceByServiceRemoteService), 10);
}

#[tokio::test]
async fn test_name_tables() {
    for variant in VARIANTS {
        let fx = open(variant, StorageConfig::default());
        let ts = now_micros();
        fx.storage
            .accept(sample_trace(TraceId::from_low(1), ts, 50_000, false))
            .await
            .unwrap();
        fx.storage
            .accept(sample_trace(TraceId::from_low(2), ts + 10, 50_000, true))
            .await
            .unwrap();

        assert_eq!(
            fx.storage.get_service_names().await.unwrap(),
            vec!["backend", "frontend"],
            "{:?}",
            variant
        );
        assert_eq!(
            fx.storage.get_span_names("frontend").await.unwrap(),
            vec!["get /", "get /api"],
            "{:?}",
            variant
        );
        assert_eq!(
            fx.storage.get_remote_service_names("frontend").await.unwrap(),
            vec!["backend"],
            "{:?}",
            variant
        );
        assert!(fx
            .storage
            .get_remote_service_names("backend")
            .await
            .unwrap()
            .is_empty());
    }
}

#[tokio::test]
async fn test_name_rows_are_muted() {
    let fx = open(Variant::WideColumn, StorageConfig::default());
    let store = fx.store();
    for i in 0..5 {
        fx.storage
            .accept(sample_trace(TraceId::from_low(i + 1), now_micros(), 50_000, false))
            .await
            .unwrap();
    }
    // (frontend, get /), (frontend, get /api), (backend, get /api)
    assert_eq!(store.write_count(Table::ServiceSpan), 3);
    assert_eq!(store.write_count(Table::ServiceRemoteService), 1);
}

#[tokio::test]
async fn test_spans_without_timestamp_are_stored() {
    for variant in VARIANTS {
        let fx = open(variant, StorageConfig::default());
        let span = Span::builder()
            .trace_id(TraceId::from_low(4))
            .id(1)
            .name("get")
            .local_endpoint(Endpoint::of("frontend"))
            .build()
            .unwrap();
        fx.storage.accept(vec![span.clone()]).await.unwrap();
        assert_eq!(
            fx.storage.get_trace(TraceId::from_low(4)).await.unwrap(),
            vec![span],
            "{:?}",
            variant
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_accepts() {
    use rand::Rng;

    for variant in VARIANTS {
        let fx = open(variant, StorageConfig::default());
        let start = now_micros() - 30_000_000;
        let ids: Vec<TraceId> = {
            let mut rng = rand::thread_rng();
            (0..40)
                .map(|_| TraceId::new(rng.gen(), rng.gen::<u64>() | 1))
                .collect()
        };

        let tasks: Vec<_> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let storage = fx.storage.clone();
                let spans = sample_trace(*id, start + i as u64 * 1_000, 30_000, false);
                tokio::spawn(async move { storage.accept(spans).await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().failed, 0);
        }

        for id in &ids {
            assert_eq!(fx.storage.get_trace(*id).await.unwrap().len(), 3, "{:?}", variant);
        }
        let request = last_hour().service_name("frontend").limit(100).build().unwrap();
        assert_eq!(fx.storage.get_traces(request).await.unwrap().len(), 40, "{:?}", variant);
    }
}
