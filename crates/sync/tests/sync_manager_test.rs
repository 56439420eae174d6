use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{broadcast, Mutex};

use coordinator_core::SyncConfig;
use coordinator_store::InMemoryRecordStore;
use coordinator_sync::SyncManager;

fn manager(worker_id: &str, store: &Arc<InMemoryRecordStore>) -> SyncManager {
    SyncManager::new(
        worker_id,
        Arc::clone(store) as Arc<dyn coordinator_core::RecordStore>,
        SyncConfig::default(),
    )
}

#[tokio::test]
async fn read_your_writes_before_flush() {
    let store = Arc::new(InMemoryRecordStore::new());
    let sync = manager("w1", &store);

    sync.write("tasks/1/state", json!({"status": "running"}))
        .await
        .unwrap();

    // Nothing flushed yet, but the writer observes its own value.
    assert_eq!(store.record_count("tasks/1").await, 0);
    let value = sync.read("tasks/1/state").await.unwrap();
    assert_eq!(value, Some(json!({"status": "running"})));
}

#[tokio::test]
async fn own_versions_are_strictly_increasing() {
    let store = Arc::new(InMemoryRecordStore::new());
    let sync = manager("w1", &store);

    let mut last = 0;
    for i in 0..5 {
        let entry = sync
            .write("tasks/1/state", json!({"round": i}))
            .await
            .unwrap();
        let count = entry.version.get("w1");
        assert!(count > last, "clock regressed: {count} <= {last}");
        last = count;
    }
    assert_eq!(sync.clock_snapshot().await.get("w1"), 5);
}

#[tokio::test]
async fn flushed_writes_are_visible_to_other_workers() {
    let store = Arc::new(InMemoryRecordStore::new());
    let writer = manager("w1", &store);
    let reader = manager("w2", &store);

    writer
        .write("tasks/7/state", json!({"status": "done"}))
        .await
        .unwrap();
    let report = writer.force_sync().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.flushed, vec!["tasks/7/state".to_string()]);

    let value = reader.read("tasks/7/state").await.unwrap();
    assert_eq!(value, Some(json!({"status": "done"})));

    // Reader's clock now dominates the writer's observed component.
    assert_eq!(reader.clock_snapshot().await.get("w1"), 1);
}

#[tokio::test]
async fn latest_write_supersedes_on_read() {
    let store = Arc::new(InMemoryRecordStore::new());
    let writer = manager("w1", &store);
    let reader = manager("w2", &store);

    writer.write("tasks/9/state", json!(1)).await.unwrap();
    writer.write("tasks/9/state", json!(2)).await.unwrap();
    writer.force_sync().await.unwrap();

    assert_eq!(reader.read("tasks/9/state").await.unwrap(), Some(json!(2)));
}

#[tokio::test]
async fn concurrent_writes_resolve_via_last_write_wins() {
    let store = Arc::new(InMemoryRecordStore::new());
    let worker_a = manager("w1", &store);
    let worker_b = manager("w2", &store);
    let reader = manager("w3", &store);

    // Neither worker observes the other before writing: concurrent versions.
    worker_a
        .write("tasks/42/state", json!({"status": "testing"}))
        .await
        .unwrap();
    worker_a.force_sync().await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    worker_b
        .write("tasks/42/state", json!({"status": "reviewing"}))
        .await
        .unwrap();
    worker_b.force_sync().await.unwrap();

    // The reader resolves the race; the later wall-clock write wins.
    let value = reader.read("tasks/42/state").await.unwrap();
    assert_eq!(value, Some(json!({"status": "reviewing"})));

    let stats = reader.stats().await;
    assert_eq!(stats.conflicts_resolved, 1);

    // The resolved entry is queued for write-back; once flushed, further
    // reads see a single dominating version and no new conflicts.
    reader.force_sync().await.unwrap();
    let reader2 = manager("w4", &store);
    assert_eq!(
        reader2.read("tasks/42/state").await.unwrap(),
        Some(json!({"status": "reviewing"}))
    );
    assert_eq!(reader2.stats().await.conflicts_resolved, 0);
}

#[tokio::test]
async fn tombstones_read_as_absent() {
    let store = Arc::new(InMemoryRecordStore::new());
    let sync = manager("w1", &store);
    let reader = manager("w2", &store);

    sync.write("tasks/3/lock", json!({"worker_id": "w1"}))
        .await
        .unwrap();
    sync.delete("tasks/3/lock").await.unwrap();
    sync.force_sync().await.unwrap();

    assert_eq!(sync.read("tasks/3/lock").await.unwrap(), None);
    assert_eq!(reader.read("tasks/3/lock").await.unwrap(), None);
}

#[tokio::test]
async fn subscribers_fire_on_local_writes_pre_flush() {
    let store = Arc::new(InMemoryRecordStore::new());
    let sync = manager("w1", &store);

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_cb = Arc::clone(&seen);
    let subscription = sync
        .subscribe(
            "tasks/*/state",
            Arc::new(move |key, _value| {
                seen_cb.try_lock().unwrap().push(key.to_string());
            }),
        )
        .await;

    sync.write("tasks/1/state", json!(1)).await.unwrap();
    sync.write("tasks/1/lock", json!(2)).await.unwrap();
    sync.write("tasks/2/state", json!(3)).await.unwrap();

    assert_eq!(
        *seen.lock().await,
        vec!["tasks/1/state".to_string(), "tasks/2/state".to_string()]
    );

    assert!(sync.unsubscribe(subscription).await);
    sync.write("tasks/3/state", json!(4)).await.unwrap();
    assert_eq!(seen.lock().await.len(), 2);
}

#[tokio::test]
async fn force_sync_reports_partial_failure_and_requeues() {
    let store = Arc::new(InMemoryRecordStore::new());
    let sync = manager("w1", &store);

    sync.write("tasks/1/state", json!(1)).await.unwrap();
    sync.write("tasks/2/state", json!(2)).await.unwrap();

    // First append fails, second succeeds.
    store.fail_next(1);
    let report = sync.force_sync().await.unwrap();
    assert_eq!(report.flushed, vec!["tasks/2/state".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "tasks/1/state");

    // The failed write stays queued and succeeds on the next flush.
    let retry = sync.force_sync().await.unwrap();
    assert!(retry.is_complete());
    assert_eq!(retry.flushed, vec!["tasks/1/state".to_string()]);
    assert_eq!(store.record_count("tasks/1").await, 1);
}

#[tokio::test]
async fn batch_threshold_triggers_immediate_flush() {
    let store = Arc::new(InMemoryRecordStore::new());
    let config = SyncConfig {
        batch_threshold: 3,
        ..Default::default()
    };
    let sync = SyncManager::new(
        "w1",
        Arc::clone(&store) as Arc<dyn coordinator_core::RecordStore>,
        config,
    );

    sync.write("tasks/1/state", json!(1)).await.unwrap();
    sync.write("tasks/1/state", json!(2)).await.unwrap();
    assert_eq!(store.record_count("tasks/1").await, 0);

    sync.write("tasks/1/state", json!(3)).await.unwrap();
    assert_eq!(store.record_count("tasks/1").await, 3);
}

#[tokio::test(start_paused = true)]
async fn background_flush_runs_on_interval() {
    let store = Arc::new(InMemoryRecordStore::new());
    let sync = Arc::new(manager("w1", &store));
    let (shutdown_tx, _) = broadcast::channel(1);
    sync.start_flush_task(shutdown_tx.subscribe()).await;

    sync.write("tasks/5/state", json!({"s": 1})).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;

    assert_eq!(store.record_count("tasks/5").await, 1);
    let _ = shutdown_tx.send(());
    sync.shutdown().await.unwrap();
}

#[tokio::test]
async fn fresh_reads_bypass_the_cached_copy() {
    let store = Arc::new(InMemoryRecordStore::new());
    let writer = manager("w1", &store);
    let reader = manager("w2", &store);

    writer.write("tasks/4/lock", json!({"hb": 1})).await.unwrap();
    writer.force_sync().await.unwrap();
    reader.read("tasks/4/lock").await.unwrap();

    // The writer updates the entry; the reader's cache still holds hb=1.
    writer.write("tasks/4/lock", json!({"hb": 2})).await.unwrap();
    writer.force_sync().await.unwrap();

    assert_eq!(
        reader.read("tasks/4/lock").await.unwrap(),
        Some(json!({"hb": 1}))
    );
    assert_eq!(
        reader.read_fresh("tasks/4/lock").await.unwrap(),
        Some(json!({"hb": 2}))
    );
}

#[tokio::test]
async fn read_matching_enumerates_current_keys() {
    let store = Arc::new(InMemoryRecordStore::new());
    let writer = manager("w1", &store);

    writer
        .write("coordination/assignments/task-1", json!("w1"))
        .await
        .unwrap();
    writer
        .write("coordination/assignments/task-2", json!("w2"))
        .await
        .unwrap();
    writer.write("coordination/queue", json!([])).await.unwrap();
    writer.delete("coordination/assignments/task-2").await.unwrap();
    writer.force_sync().await.unwrap();

    let reader = manager("w2", &store);
    let matching = reader
        .read_matching("coordination/assignments/*")
        .await
        .unwrap();
    // Tombstoned and non-matching keys are absent.
    assert_eq!(
        matching,
        vec![("coordination/assignments/task-1".to_string(), json!("w1"))]
    );
}

#[tokio::test]
async fn cache_serves_repeat_reads_without_store_traffic() {
    let store = Arc::new(InMemoryRecordStore::new());
    let writer = manager("w1", &store);
    let reader = manager("w2", &store);

    writer.write("workers/w1/status", json!("idle")).await.unwrap();
    writer.force_sync().await.unwrap();

    reader.read("workers/w1/status").await.unwrap();
    reader.read("workers/w1/status").await.unwrap();
    reader.read("workers/w1/status").await.unwrap();

    let stats = reader.stats().await;
    assert_eq!(stats.store_reads, 1);
    assert_eq!(stats.cache.hits, 2);
}

#[tokio::test]
async fn external_changes_notify_matching_subscribers() {
    let store = Arc::new(InMemoryRecordStore::new());
    let writer = manager("w1", &store);
    let reader = manager("w2", &store);

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_cb = Arc::clone(&fired);
    reader
        .subscribe(
            "tasks/**",
            Arc::new(move |_key, _value| {
                fired_cb.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await;

    writer.write("tasks/8/state", json!("new")).await.unwrap();
    writer.force_sync().await.unwrap();

    // First read observes the external change and notifies; the cached
    // re-read does not fire again.
    reader.read("tasks/8/state").await.unwrap();
    reader.read("tasks/8/state").await.unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}
