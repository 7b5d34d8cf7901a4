//! End-to-end fan-out/fan-in against in-process stub backends.

mod common;

use common::*;

const KEYS: [&str; 3] = ["k1", "k2", "k3"];

// ── Happy paths ──

#[tokio::test]
async fn test_streaming_query_returns_records_in_index_order() {
    // Cut inside the first record, on a delimiter, and just after one.
    let (index, index_stub) = spawn_index(IndexStub::streaming(&KEYS, &[5, 12, 13, 30])).await;
    let (s1, s1_stub) = spawn_storage(StorageStub::default()).await;
    let (s2, s2_stub) = spawn_storage(StorageStub::default()).await;
    let orch = orchestrator(&[&index], &[&s1, &s2]);

    let q = ClientQuery::TimeRange { from: 0, to: 100 };
    let resp = orch.handle(&q, ResolveMode::Streaming, budgets(2_000, 2_000)).await.unwrap();

    assert_eq!(keys_of(&resp.records), KEYS);
    assert_eq!(resp.records[1].value, "v-k2");
    assert!(resp.summary.is_none());
    assert_eq!(index_stub.requests.lock().clone(), vec!["from=0,to=100".to_string()]);
    // Round robin across storage, first call goes to the first member.
    assert_eq!(s1_stub.hit_keys(), vec!["k1", "k3"]);
    assert_eq!(s2_stub.hit_keys(), vec!["k2"]);
}

#[tokio::test]
async fn test_sync_query_returns_records_and_summary() {
    let (index, index_stub) = spawn_index(IndexStub::sync(&KEYS, "42")).await;
    let (storage, storage_stub) = spawn_storage(StorageStub::default()).await;
    let orch = orchestrator(&[&index], &[&storage]);

    let q = ClientQuery::TimeAndCount { from: 7, count: 3 };
    let resp = orch.handle(&q, ResolveMode::Sync, budgets(2_000, 2_000)).await.unwrap();

    assert_eq!(keys_of(&resp.records), KEYS);
    let summary = resp.summary.unwrap();
    assert_eq!(summary.count, "42");
    assert_eq!(summary.timestamp, "1700000000");
    assert_eq!(index_stub.requests.lock().clone(), vec!["from=7,count=3".to_string()]);
    assert_eq!(storage_stub.hit_keys(), KEYS);
}

#[tokio::test]
async fn test_sync_empty_key_list_is_empty_answer() {
    let (index, _) = spawn_index(IndexStub::sync(&[], "0")).await;
    let (storage, storage_stub) = spawn_storage(StorageStub::default()).await;
    let orch = orchestrator(&[&index], &[&storage]);

    let q = ClientQuery::TimeRange { from: 0, to: 1 };
    let resp = orch.handle(&q, ResolveMode::Sync, budgets(1_000, 1_000)).await.unwrap();
    assert!(resp.records.is_empty());
    assert!(storage_stub.hit_keys().is_empty());
}

#[tokio::test]
async fn test_storage_fetches_overlap_index_stream() {
    let mut stub = IndexStub::streaming(&KEYS, &[13, 26]);
    stub.part_delay = Duration::from_millis(150);
    let (index, index_stub) = spawn_index(stub).await;
    let (storage, storage_stub) = spawn_storage(StorageStub::default()).await;
    let orch = orchestrator(&[&index], &[&storage]);

    let q = ClientQuery::TimeRange { from: 0, to: 100 };
    orch.handle(&q, ResolveMode::Streaming, budgets(3_000, 3_000)).await.unwrap();

    let first_hit = storage_stub.first_hit().unwrap();
    let finished = index_stub.finished_at.lock().unwrap();
    assert!(first_hit < finished, "storage work should start while the index is still streaming");
}

#[tokio::test]
async fn test_order_independent_of_completion_order() {
    let keys = ["a", "b", "c", "d", "e"];
    let mut storage = StorageStub::default();
    for (i, k) in keys.iter().enumerate() {
        // Earlier keys finish later.
        let delay = Duration::from_millis(20 * (keys.len() - i) as u64);
        storage = storage.with(k, KeyBehaviour::Delayed(delay, format!("v-{}", k)));
    }
    let (index, _) = spawn_index(IndexStub::streaming(&keys, &[])).await;
    let (storage, _) = spawn_storage(storage).await;
    let orch = orchestrator(&[&index], &[&storage]);

    let q = ClientQuery::TimeRange { from: 0, to: 100 };
    let resp = orch.handle(&q, ResolveMode::Streaming, budgets(2_000, 2_000)).await.unwrap();
    assert_eq!(keys_of(&resp.records), keys);
}

// ── Deadlines ──

#[tokio::test]
async fn test_slow_index_stream_hits_index_deadline() {
    let mut stub = IndexStub::streaming(&KEYS, &[13]);
    stub.part_delay = Duration::from_secs(3);
    let (index, _) = spawn_index(stub).await;
    let (storage, _) = spawn_storage(StorageStub::default()).await;
    let orch = orchestrator(&[&index], &[&storage]);

    let started = Instant::now();
    let q = ClientQuery::TimeRange { from: 0, to: 100 };
    let err = orch
        .handle(&q, ResolveMode::Streaming, budgets(100, 2_000))
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::IndexPhaseTimeout { timeout_ms: 100 });
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_index_deadline_aborts_dispatched_fetches() {
    // k1 arrives at ~300ms and is dispatched; the rest would land at ~600ms.
    let mut stub = IndexStub::streaming(&KEYS, &[13]);
    stub.part_delay = Duration::from_millis(300);
    let (index, _) = spawn_index(stub).await;
    let fetcher = SlowFetcher::new(Duration::from_secs(1));
    let orch = orchestrator_with_fetcher(&[&index], fetcher.clone());

    let q = ClientQuery::TimeRange { from: 0, to: 100 };
    let err = orch
        .handle(&q, ResolveMode::Streaming, budgets(450, 2_000))
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::IndexPhaseTimeout { timeout_ms: 450 });
    assert_eq!(fetcher.started.load(std::sync::atomic::Ordering::SeqCst), 1);

    // Well past the point where k1 would have completed.
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert_eq!(fetcher.finished.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_slow_sync_index_hits_index_deadline() {
    let mut stub = IndexStub::sync(&KEYS, "3");
    stub.initial_delay = Duration::from_secs(3);
    let (index, _) = spawn_index(stub).await;
    let (storage, _) = spawn_storage(StorageStub::default()).await;
    let orch = orchestrator(&[&index], &[&storage]);

    let q = ClientQuery::TimeRange { from: 0, to: 100 };
    let err = orch.handle(&q, ResolveMode::Sync, budgets(100, 2_000)).await.unwrap_err();
    assert_eq!(err, GatewayError::IndexPhaseTimeout { timeout_ms: 100 });
}

#[tokio::test]
async fn test_sync_storage_reads_share_index_deadline() {
    let keys = ["a", "b", "c", "d"];
    let mut storage = StorageStub::default();
    for k in keys {
        storage = storage.with(k, KeyBehaviour::Delayed(Duration::from_millis(150), format!("v-{}", k)));
    }
    let (index, _) = spawn_index(IndexStub::sync(&keys, "4")).await;
    let (storage, storage_stub) = spawn_storage(storage).await;
    let orch = orchestrator(&[&index], &[&storage]);

    // Every read fits the storage budget; together they overrun the index one.
    let started = Instant::now();
    let q = ClientQuery::TimeRange { from: 0, to: 100 };
    let err = orch.handle(&q, ResolveMode::Sync, budgets(200, 200)).await.unwrap_err();
    assert_eq!(err, GatewayError::IndexPhaseTimeout { timeout_ms: 200 });
    assert!(started.elapsed() < Duration::from_millis(600));
    assert!(storage_stub.hit_keys().len() <= 2);
}

#[tokio::test]
async fn test_slow_storage_hits_storage_deadline() {
    let storage = StorageStub::default().with("k2", KeyBehaviour::Delayed(Duration::from_secs(3), "late".into()));
    let (index, _) = spawn_index(IndexStub::streaming(&KEYS, &[])).await;
    let (storage, _) = spawn_storage(storage).await;
    let orch = orchestrator(&[&index], &[&storage]);

    let started = Instant::now();
    let q = ClientQuery::TimeRange { from: 0, to: 100 };
    let err = orch
        .handle(&q, ResolveMode::Streaming, budgets(2_000, 150))
        .await
        .unwrap_err();
    assert!(
        matches!(err, GatewayError::StoragePhaseTimeout { timeout_ms: 150, .. }),
        "got {:?}",
        err
    );
    assert!(started.elapsed() < Duration::from_secs(2));
}

// ── Failures ──

#[tokio::test]
async fn test_one_failed_fetch_fails_whole_query_fast() {
    let storage = StorageStub::default()
        .with("k1", KeyBehaviour::Delayed(Duration::from_secs(2), "slow".into()))
        .with("k2", KeyBehaviour::Status(500))
        .with("k3", KeyBehaviour::Delayed(Duration::from_secs(2), "slow".into()));
    let (index, _) = spawn_index(IndexStub::streaming(&KEYS, &[])).await;
    let (storage, _) = spawn_storage(storage).await;
    let orch = orchestrator(&[&index], &[&storage]);

    let started = Instant::now();
    let q = ClientQuery::TimeRange { from: 0, to: 100 };
    let err = orch
        .handle(&q, ResolveMode::Streaming, budgets(5_000, 5_000))
        .await
        .unwrap_err();
    assert!(
        matches!(err, GatewayError::StoragePhaseFailure { ref key, .. } if key == "k2"),
        "got {:?}",
        err
    );
    assert!(started.elapsed() < Duration::from_millis(1_500));
}

#[tokio::test]
async fn test_missing_record_fails_query() {
    let storage = StorageStub::default().with("k3", KeyBehaviour::NoContent);
    let (index, _) = spawn_index(IndexStub::sync(&KEYS, "3")).await;
    let (storage, _) = spawn_storage(storage).await;
    let orch = orchestrator(&[&index], &[&storage]);

    let q = ClientQuery::TimeRange { from: 0, to: 100 };
    let err = orch.handle(&q, ResolveMode::Sync, budgets(1_000, 1_000)).await.unwrap_err();
    assert!(matches!(err, GatewayError::StoragePhaseFailure { ref key, .. } if key == "k3"));
}

#[tokio::test]
async fn test_garbage_record_is_deserialization_error() {
    let storage = StorageStub::default().with("k1", KeyBehaviour::Garbage);
    let (index, _) = spawn_index(IndexStub::streaming(&KEYS, &[])).await;
    let (storage, _) = spawn_storage(storage).await;
    let orch = orchestrator(&[&index], &[&storage]);

    let q = ClientQuery::TimeRange { from: 0, to: 100 };
    let err = orch
        .handle(&q, ResolveMode::Streaming, budgets(1_000, 1_000))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Deserialization(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_index_status_header_rejected_before_body() {
    let mut stub = IndexStub::streaming(&KEYS, &[]);
    stub.status_header = Some("error".into());
    let (index, _) = spawn_index(stub).await;
    let (storage, storage_stub) = spawn_storage(StorageStub::default()).await;
    let orch = orchestrator(&[&index], &[&storage]);

    let q = ClientQuery::TimeRange { from: 0, to: 100 };
    let err = orch
        .handle(&q, ResolveMode::Streaming, budgets(1_000, 1_000))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Backend { status: 200, .. }), "got {:?}", err);
    assert!(storage_stub.hit_keys().is_empty());
}

#[tokio::test]
async fn test_index_error_status_rejected() {
    let mut stub = IndexStub::streaming(&KEYS, &[]);
    stub.status = 500;
    let (index, _) = spawn_index(stub).await;
    let (storage, storage_stub) = spawn_storage(StorageStub::default()).await;
    let orch = orchestrator(&[&index], &[&storage]);

    let q = ClientQuery::TimeRange { from: 0, to: 100 };
    let err = orch
        .handle(&q, ResolveMode::Streaming, budgets(1_000, 1_000))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Backend { status: 500, .. }));
    assert!(storage_stub.hit_keys().is_empty());
}

#[tokio::test]
async fn test_empty_stream_is_no_chunks() {
    let (index, _) = spawn_index(IndexStub::streaming(&[], &[])).await;
    let (storage, _) = spawn_storage(StorageStub::default()).await;
    let orch = orchestrator(&[&index], &[&storage]);

    let q = ClientQuery::TimeRange { from: 0, to: 100 };
    let err = orch
        .handle(&q, ResolveMode::Streaming, budgets(1_000, 1_000))
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::NoChunks);
}

#[tokio::test]
async fn test_no_storage_registered() {
    let (index, _) = spawn_index(IndexStub::streaming(&KEYS, &[])).await;
    let orch = orchestrator(&[&index], &[]);

    let q = ClientQuery::TimeRange { from: 0, to: 100 };
    let err = orch
        .handle(&q, ResolveMode::Streaming, budgets(1_000, 1_000))
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::PoolEmpty { service: ServiceClass::Storage });
}

#[tokio::test]
async fn test_unreachable_index_is_transport_error() {
    let registry = BackendRegistry::new();
    registry.register(
        ServiceClass::Indexing,
        BackendEndpoint::new(ServiceClass::Indexing, "127.0.0.1", 1),
    );
    let orch = QueryOrchestrator::new(registry, FetchClient::new().unwrap());

    let q = ClientQuery::TimeRange { from: 0, to: 100 };
    for mode in [ResolveMode::Streaming, ResolveMode::Sync] {
        let err = orch.handle(&q, mode, budgets(1_000, 1_000)).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)), "{:?}: {:?}", mode, err);
    }
}
