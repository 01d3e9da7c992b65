//! Search disabled: index reads short-circuit, span rows are still kept

use crate::*;
use tracestore::store::Table;

fn disabled() -> StorageConfig {
    StorageConfig::default().search_enabled(false)
}

#[tokio::test]
async fn test_reads_short_circuit_to_empty() {
    for variant in VARIANTS {
        let fx = open(variant, disabled());
        fx.storage
            .accept(sample_trace(TraceId::from_low(1), now_micros(), 30_000, true))
            .await
            .unwrap();

        let request = last_hour().service_name("frontend").build().unwrap();
        assert!(fx.storage.get_traces(request).await.unwrap().is_empty());
        assert!(fx.storage.get_service_names().await.unwrap().is_empty());
        assert!(fx.storage.get_span_names("frontend").await.unwrap().is_empty());
        assert!(fx
            .storage
            .get_remote_service_names("frontend")
            .await
            .unwrap()
            .is_empty());

        // the trace itself is still retrievable by id
        assert_eq!(
            fx.storage.get_trace(TraceId::from_low(1)).await.unwrap().len(),
            3,
            "{:?}",
            variant
        );
    }
}

#[tokio::test]
async fn test_no_index_traffic() {
    let fx = open(Variant::WideColumn, disabled());
    let summary = fx
        .storage
        .accept(sample_trace(TraceId::from_low(1), now_micros(), 30_000, true))
        .await
        .unwrap();
    assert_eq!(summary.index_rows_written, 0);

    let store = fx.store();
    for table in Table::ALL {
        if table != Table::Span {
            assert_eq!(store.write_count(table), 0, "{}", table);
        }
    }

    let request = last_hour()
        .service_name("frontend")
        .parse_annotation_query("error")
        .build()
        .unwrap();
    fx.storage.get_traces(request).await.unwrap();
    fx.storage.get_service_names().await.unwrap();
    fx.storage.get_span_names("frontend").await.unwrap();
    assert!(store.read_log().is_empty());
}
