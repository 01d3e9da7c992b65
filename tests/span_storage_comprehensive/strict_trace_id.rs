//! 128-bit trace ids and clients that truncate them to 64 bits

use crate::*;

const WIDE: &str = "48485a3953bb61246b221d5bc9e6496c";
const NARROW: &str = "6b221d5bc9e6496c";

/// Root recorded with the full id, child recorded with the truncated one
async fn mixed(variant: Variant, strict: bool) -> Fixture {
    let fx = open(variant, StorageConfig::default().strict_trace_id(strict));
    let wide = TraceId::parse(WIDE).unwrap();
    let narrow = TraceId::parse(NARROW).unwrap();
    let mut spans = sample_trace(wide, now_micros() - 5_000_000, 80_000, false);
    let child = spans[1].to_builder().trace_id(narrow).build().unwrap();
    spans[1] = child;
    fx.storage.accept(spans).await.unwrap();
    fx
}

#[tokio::test]
async fn test_parse_normalises_zero_high_bits() {
    let padded = TraceId::parse("00000000000000006b221d5bc9e6496c").unwrap();
    assert_eq!(padded, TraceId::parse(NARROW).unwrap());
    assert!(!padded.is_128_bit());
    assert!(TraceId::parse(WIDE).unwrap().is_128_bit());
}

#[tokio::test]
async fn test_strict_get_trace_matches_exactly() {
    for variant in VARIANTS {
        let fx = mixed(variant, true).await;
        let wide = fx.storage.get_trace_hex(WIDE).await.unwrap();
        assert_eq!(wide.len(), 2, "{:?}", variant);
        assert!(wide.iter().all(|s| s.trace_id().is_128_bit()));

        let narrow = fx.storage.get_trace_hex(NARROW).await.unwrap();
        assert_eq!(narrow.len(), 1, "{:?}", variant);
    }
}

#[tokio::test]
async fn test_loose_get_trace_returns_union() {
    for variant in VARIANTS {
        let fx = mixed(variant, false).await;
        for id in [WIDE, NARROW] {
            let trace = fx.storage.get_trace_hex(id).await.unwrap();
            assert_eq!(trace.len(), 3, "{:?} {}", variant, id);
            // merged spans all report the 128-bit id
            assert!(trace.iter().all(|s| s.trace_id().is_128_bit()));
        }
    }
}

#[tokio::test]
async fn test_loose_search_joins_truncated_spans() {
    for variant in VARIANTS {
        let fx = mixed(variant, false).await;
        let request = last_hour()
            .service_name("frontend")
            .span_name("get /api")
            .build()
            .unwrap();
        let traces = fx.storage.get_traces(request).await.unwrap();
        assert_eq!(traces.len(), 1, "{:?}", variant);
        assert_eq!(traces[0].len(), 3);
    }
}

#[tokio::test]
async fn test_strict_search_keeps_ids_apart() {
    for variant in VARIANTS {
        let fx = mixed(variant, true).await;
        let request = last_hour().service_name("frontend").build().unwrap();
        let traces = fx.storage.get_traces(request).await.unwrap();
        let mut sizes: Vec<usize> = traces.iter().map(Vec::len).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, 2], "{:?}", variant);
    }
}

#[tokio::test]
async fn test_malformed_hex_is_invalid_argument() {
    let fx = open(Variant::InMemory, StorageConfig::default());
    let err = fx.storage.get_trace_hex("not-hex").await.unwrap_err();
    assert!(err.is_invalid_argument());
}
