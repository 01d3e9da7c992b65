//! Failure handling and configuration errors

use crate::*;
use std::io::Write;
use tracestore::store::Table;

#[tokio::test]
async fn test_index_write_failures_are_isolated() {
    init_tracing();
    let fx = open(Variant::WideColumn, StorageConfig::default());
    let store = fx.store();
    store.fail_writes(Table::TraceByAnnotation);
    store.fail_writes(Table::ServiceRemoteService);

    let summary = fx
        .storage
        .accept(sample_trace(TraceId::from_low(1), now_micros(), 30_000, true))
        .await
        .unwrap();
    assert!(summary.failed > 0);
    assert_eq!(fx.storage.get_trace(TraceId::from_low(1)).await.unwrap().len(), 3);

    // the other indexes still serve
    let by_service = last_hour().service_name("frontend").build().unwrap();
    assert_eq!(trace_lows(&fx.storage.get_traces(by_service).await.unwrap()), vec![1]);
    let by_tag = last_hour()
        .service_name("frontend")
        .parse_annotation_query("error")
        .build()
        .unwrap();
    assert!(fx.storage.get_traces(by_tag).await.unwrap().is_empty());

    // the failed name row is retried by the next accept
    assert!(fx
        .storage
        .get_remote_service_names("frontend")
        .await
        .unwrap()
        .is_empty());
    store.heal();
    fx.storage
        .accept(sample_trace(TraceId::from_low(2), now_micros(), 30_000, false))
        .await
        .unwrap();
    assert_eq!(
        fx.storage.get_remote_service_names("frontend").await.unwrap(),
        vec!["backend"]
    );
}

#[tokio::test]
async fn test_span_write_failure_does_not_fail_accept() {
    let fx = open(Variant::WideColumn, StorageConfig::default());
    fx.store().fail_writes(Table::Span);
    let summary = fx
        .storage
        .accept(sample_trace(TraceId::from_low(1), now_micros(), 30_000, false))
        .await
        .unwrap();
    assert_eq!(summary.failed, 3);
    assert!(fx.storage.get_trace(TraceId::from_low(1)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_read_failures_propagate() {
    let fx = open(Variant::WideColumn, StorageConfig::default());
    fx.storage
        .accept(sample_trace(TraceId::from_low(1), now_micros(), 30_000, true))
        .await
        .unwrap();
    let store = fx.store();

    // one failing predicate fails the whole query instead of returning less
    store.fail_reads(Table::TraceByAnnotation);
    let request = last_hour()
        .service_name("frontend")
        .span_name("get /")
        .parse_annotation_query("error")
        .build()
        .unwrap();
    let err = fx.storage.get_traces(request).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(err, Error::Unavailable(_)));

    store.fail_reads(Table::Span);
    assert!(fx
        .storage
        .get_trace(TraceId::from_low(1))
        .await
        .unwrap_err()
        .is_retryable());

    store.fail_reads(Table::ServiceSpan);
    assert!(fx.storage.get_service_names().await.is_err());

    store.heal();
    assert_eq!(fx.storage.get_service_names().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    for variant in VARIANTS {
        let builder = TraceStorage::builder().config(StorageConfig::default().index_fetch_multiplier(0));
        let builder = match variant {
            Variant::WideColumn => builder.wide_column(Arc::new(MemoryStore::new())),
            Variant::InMemory => builder.in_memory(),
        };
        let err = builder.build().unwrap_err();
        assert!(err.is_invalid_argument(), "{:?}", variant);
    }
}

#[tokio::test]
async fn test_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"strict_trace_id": false, "index_fetch_multiplier": 5, "index_ttl_secs": null}}"#
    )
    .unwrap();

    let storage = TraceStorage::builder()
        .config_path(file.path())
        .unwrap()
        .wide_column(Arc::new(MemoryStore::new()))
        .build()
        .unwrap();
    assert!(!storage.config().strict_trace_id);
    assert_eq!(storage.config().index_fetch_multiplier, 5);
    assert_eq!(storage.config().index_ttl_secs, None);
    // unspecified fields keep their defaults
    assert!(storage.config().search_enabled);

    let mut bad = tempfile::NamedTempFile::new().unwrap();
    write!(bad, "{{ not json").unwrap();
    let err = TraceStorage::builder().config_path(bad.path()).unwrap_err();
    assert!(err.is_invalid_argument());

    let err = TraceStorage::builder()
        .config_path("/nonexistent/tracestore.json")
        .unwrap_err();
    assert!(err.is_invalid_argument());
}

#[tokio::test]
async fn test_invalid_query_is_invalid_argument() {
    let err: Error = QueryRequest::builder()
        .service_name("frontend")
        .end_ts(1)
        .lookback(1)
        .limit(10)
        .max_duration(5)
        .build()
        .unwrap_err()
        .into();
    assert!(err.is_invalid_argument());
}
