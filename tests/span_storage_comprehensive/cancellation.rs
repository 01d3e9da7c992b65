//! Cancellation of storage calls

use crate::*;
use std::time::Duration;

#[tokio::test]
async fn test_cancelled_call_fails_fast() {
    for variant in VARIANTS {
        let fx = open(variant, StorageConfig::default());
        let call = fx.storage.calls().get_service_names();
        call.cancel();
        let err = call.await.unwrap_err();
        assert!(err.is_cancelled(), "{:?}", variant);

        let err: Error = err.into();
        assert!(err.is_cancelled());
        assert!(!err.is_retryable());
    }
}

#[tokio::test]
async fn test_cancelled_accept_writes_nothing() {
    for variant in VARIANTS {
        let fx = open(variant, StorageConfig::default());
        let call = fx
            .storage
            .calls()
            .accept(sample_trace(TraceId::from_low(1), now_micros(), 30_000, false));
        call.cancel_handle().cancel();
        assert!(call.await.unwrap_err().is_cancelled());
        assert!(fx
            .storage
            .get_trace(TraceId::from_low(1))
            .await
            .unwrap()
            .is_empty());
    }
}

#[tokio::test]
async fn test_cancel_propagates_to_slow_reads() {
    let fx = open(Variant::WideColumn, StorageConfig::default());
    fx.storage
        .accept(sample_trace(TraceId::from_low(1), now_micros(), 30_000, false))
        .await
        .unwrap();
    fx.store().set_read_delay(Some(Duration::from_secs(10)));

    let request = last_hour()
        .service_name("frontend")
        .remote_service_name("backend")
        .build()
        .unwrap();
    let call = fx.storage.calls().get_traces(request);
    let handle = call.cancel_handle();
    let running = tokio::spawn(call.execute());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!fx.store().read_log().is_empty());
    handle.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .expect("cancel did not interrupt the read")
        .unwrap();
    assert!(result.unwrap_err().is_cancelled());
}

#[tokio::test]
async fn test_calls_can_be_mapped() {
    let fx = open(Variant::InMemory, StorageConfig::default());
    fx.storage
        .accept(sample_trace(TraceId::from_low(1), now_micros(), 30_000, false))
        .await
        .unwrap();
    let count = fx
        .storage
        .calls()
        .get_trace(TraceId::from_low(1))
        .map(|spans| spans.len())
        .await
        .unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
async fn test_cancel_after_accept_started_keeps_every_write() {
    let fx = open(Variant::WideColumn, StorageConfig::default());
    let store = fx.store();
    store.set_write_delay(Some(Duration::from_millis(50)));

    let call = fx
        .storage
        .calls()
        .accept(sample_trace(TraceId::from_low(1), now_micros(), 30_000, false));
    let handle = call.cancel_handle();
    let running = tokio::spawn(call.execute());
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.cancel();

    let summary = running.await.unwrap().unwrap();
    assert_eq!(summary.failed, 0);
    store.set_write_delay(None);
    assert_eq!(fx.storage.get_trace(TraceId::from_low(1)).await.unwrap().len(), 3);
    let request = last_hour().service_name("frontend").build().unwrap();
    assert_eq!(trace_lows(&fx.storage.get_traces(request).await.unwrap()), vec![1]);
}
