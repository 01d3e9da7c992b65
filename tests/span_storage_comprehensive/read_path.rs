//! Read path: predicates, intersection, ordering and limits

use crate::*;
use tracestore::store::Table;

/// Trace 1: 150ms with error; trace 2: 20ms; trace 3: 60ms, two hours old
async fn seeded(variant: Variant) -> Fixture {
    let fx = open(variant, StorageConfig::default());
    let now = now_micros();
    fx.storage
        .accept(sample_trace(TraceId::from_low(1), now - 20_000_000, 150_000, true))
        .await
        .unwrap();
    fx.storage
        .accept(sample_trace(TraceId::from_low(2), now - 10_000_000, 20_000, false))
        .await
        .unwrap();
    fx.storage
        .accept(sample_trace(
            TraceId::from_low(3),
            now - 7_200_000_000,
            60_000,
            false,
        ))
        .await
        .unwrap();
    fx
}

async fn search(fx: &Fixture, request: QueryRequestBuilder) -> Vec<u64> {
    let traces = fx.storage.get_traces(request.build().unwrap()).await.unwrap();
    trace_lows(&traces)
}

type QueryRequestBuilder = tracestore::model::QueryRequestBuilder;

#[tokio::test]
async fn test_service_only_newest_first() {
    for variant in VARIANTS {
        let fx = seeded(variant).await;
        assert_eq!(
            search(&fx, last_hour().service_name("frontend")).await,
            vec![2, 1],
            "{:?}",
            variant
        );
        assert_eq!(
            search(&fx, last_hour().service_name("backend")).await,
            vec![2, 1],
            "{:?}",
            variant
        );
    }
}

#[tokio::test]
async fn test_each_predicate() {
    for variant in VARIANTS {
        let fx = seeded(variant).await;
        let frontend = || last_hour().service_name("frontend");

        assert_eq!(search(&fx, frontend().span_name("get /api")).await, vec![2, 1]);
        assert_eq!(
            search(&fx, frontend().remote_service_name("backend")).await,
            vec![2, 1]
        );
        assert_eq!(
            search(&fx, frontend().parse_annotation_query("error")).await,
            vec![1],
            "{:?}",
            variant
        );
        assert_eq!(
            search(&fx, frontend().parse_annotation_query("error=timeout")).await,
            vec![1]
        );
        assert_eq!(
            search(&fx, frontend().min_duration(100_000)).await,
            vec![1],
            "{:?}",
            variant
        );
        assert_eq!(
            search(&fx, frontend().min_duration(10_000).max_duration(30_000)).await,
            vec![2],
            "{:?}",
            variant
        );
        assert_eq!(
            search(
                &fx,
                last_hour()
                    .service_name("backend")
                    .parse_annotation_query("cache.miss")
            )
            .await,
            vec![2, 1]
        );
    }
}

#[tokio::test]
async fn test_predicates_are_anded() {
    for variant in VARIANTS {
        let fx = seeded(variant).await;
        let both = last_hour()
            .service_name("frontend")
            .span_name("get /api")
            .remote_service_name("backend")
            .parse_annotation_query("error and http.method=GET");
        assert_eq!(search(&fx, both).await, vec![1], "{:?}", variant);

        // one predicate matching nothing empties the result
        let none = last_hour()
            .service_name("frontend")
            .span_name("get /api")
            .remote_service_name("db");
        assert!(search(&fx, none).await.is_empty(), "{:?}", variant);
    }
}

#[tokio::test]
async fn test_span_and_remote_read_two_indexes() {
    let fx = seeded(Variant::WideColumn).await;
    fx.store().clear_read_log();
    let request = last_hour()
        .service_name("frontend")
        .span_name("get /api")
        .remote_service_name("backend");
    assert_eq!(search(&fx, request).await, vec![2, 1]);
    assert!(!fx.store().reads_of(Table::TraceByServiceSpan).is_empty());
    assert!(!fx.store().reads_of(Table::TraceByServiceRemoteService).is_empty());
    assert!(fx.store().reads_of(Table::TraceByAnnotation).is_empty());
}

#[tokio::test]
async fn test_limit_and_lookback() {
    for variant in VARIANTS {
        let fx = seeded(variant).await;
        assert_eq!(
            search(&fx, last_hour().service_name("frontend").limit(1)).await,
            vec![2],
            "{:?}",
            variant
        );
        let three_hours = last_hour().service_name("frontend").lookback(3 * 3_600_000);
        assert_eq!(search(&fx, three_hours).await, vec![2, 1, 3], "{:?}", variant);
    }
}

#[tokio::test]
async fn test_query_without_service_searches_all() {
    for variant in VARIANTS {
        let fx = seeded(variant).await;
        assert_eq!(search(&fx, last_hour()).await, vec![2, 1], "{:?}", variant);
    }
}

#[tokio::test]
async fn test_no_match_is_empty_success() {
    for variant in VARIANTS {
        let fx = seeded(variant).await;
        assert!(search(&fx, last_hour().service_name("unknown")).await.is_empty());
        assert!(fx
            .storage
            .get_trace(TraceId::from_low(99))
            .await
            .unwrap()
            .is_empty());
    }
}

#[tokio::test]
async fn test_traces_are_merged_and_ordered() {
    for variant in VARIANTS {
        let fx = open(variant, StorageConfig::default());
        let spans = sample_trace(TraceId::from_low(5), now_micros(), 40_000, false);
        // the same trace arrives in two batches, root last
        fx.storage.accept(spans[1..].to_vec()).await.unwrap();
        fx.storage.accept(spans[..1].to_vec()).await.unwrap();

        let trace = fx.storage.get_trace(TraceId::from_low(5)).await.unwrap();
        assert_eq!(trace.len(), 3, "{:?}", variant);
        assert_eq!(trace[0].id(), 1);
        assert_eq!(trace[0].parent_id(), None);
    }
}

#[tokio::test]
async fn test_longest_span_found_by_duration_after_later_batch() {
    for variant in VARIANTS {
        let fx = open(variant, StorageConfig::default());
        let start = now_micros() - 20_000_000;
        let frontend = |id: u64, offset: u64, duration: u64| {
            Span::builder()
                .trace_id(TraceId::from_low(8))
                .parent_id(1)
                .id(id)
                .name("get")
                .timestamp(start + offset)
                .duration(duration)
                .local_endpoint(Endpoint::of("frontend"))
                .build()
                .unwrap()
        };
        fx.storage
            .accept(vec![frontend(2, 10_000, 5_000), frontend(3, 50_000, 5_000)])
            .await
            .unwrap();
        // lands inside the indexed interval but is the longest span so far
        fx.storage
            .accept(vec![frontend(4, 20_000, 80_000)])
            .await
            .unwrap();

        let request = last_hour().service_name("frontend").min_duration(60_000);
        assert_eq!(search(&fx, request).await, vec![8], "{:?}", variant);
        let request = last_hour()
            .service_name("frontend")
            .span_name("get")
            .min_duration(60_000)
            .max_duration(100_000);
        assert_eq!(search(&fx, request).await, vec![8], "{:?}", variant);
    }
}
