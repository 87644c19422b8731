use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use telemetry_dispatcher::{
    DurableStore, Event, FileBackend, MemoryBackend, StoreBackend, StoredEvent,
};

fn marker_event(n: usize) -> Event {
    Event::new(format!("event_{}", n))
}

#[tokio::test]
async fn test_cap_evicts_oldest_first() {
    let backend = Arc::new(MemoryBackend::new());
    let store = DurableStore::open(backend, 5, 7).await;

    for n in 0..8 {
        store.store(marker_event(n));
    }

    let pending = store.fetch_pending().await;
    assert_eq!(pending.len(), 5);
    // The three oldest entries were dropped.
    let types: Vec<&str> = pending.iter().map(|e| e.event.event_type.as_str()).collect();
    assert_eq!(types, vec!["event_3", "event_4", "event_5", "event_6", "event_7"]);

    store.shutdown().await;
}

#[tokio::test]
async fn test_delete_removes_given_ids() {
    let backend = Arc::new(MemoryBackend::new());
    let store = DurableStore::open(backend, 100, 7).await;

    for n in 0..4 {
        store.store(marker_event(n));
    }
    let pending = store.fetch_pending().await;
    let victim_ids: Vec<String> = pending.iter().take(2).map(|e| e.id.clone()).collect();

    store.delete(victim_ids.clone());

    let remaining = store.fetch_pending().await;
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|e| !victim_ids.contains(&e.id)));

    store.shutdown().await;
}

#[tokio::test]
async fn test_retry_exhaustion_evicts_entry() {
    let max_retries = 3;
    let backend = Arc::new(MemoryBackend::new());
    let store = DurableStore::open(backend, 100, 7).await;

    store.store(marker_event(0));
    let id = store.fetch_pending().await[0].id.clone();

    for _ in 0..max_retries {
        store.increment_retry(id.clone(), max_retries);
    }
    let pending = store.fetch_pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].retry_count, max_retries);

    // One more push exceeds the bound and evicts.
    store.increment_retry(id.clone(), max_retries);
    assert!(store.fetch_pending().await.is_empty());

    store.shutdown().await;
}

#[tokio::test]
async fn test_retention_purges_expired_entries_on_startup() {
    let backend = Arc::new(MemoryBackend::new());

    let mut stale = StoredEvent::new(marker_event(0));
    stale.created_at = Utc::now() - ChronoDuration::days(10);
    let fresh = StoredEvent::new(marker_event(1));
    backend
        .save_atomic(&[stale, fresh.clone()])
        .await
        .expect("seed snapshot");

    let store = DurableStore::open(backend, 100, 7).await;

    let pending = store.fetch_pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, fresh.id);

    store.shutdown().await;
}

#[tokio::test]
async fn test_explicit_sweep_purges_expired_entries() {
    let backend = Arc::new(MemoryBackend::new());
    // Zero-day retention: anything created before the sweep is expired.
    let store = DurableStore::open(backend, 100, 0).await;

    store.store(marker_event(0));
    assert_eq!(store.fetch_pending().await.len(), 1);

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    store.sweep();
    assert!(store.fetch_pending().await.is_empty());

    store.shutdown().await;
}

#[tokio::test]
async fn test_restart_round_trip_preserves_entries() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("offline_events.json");

    {
        let backend = Arc::new(FileBackend::new(&path));
        let store = DurableStore::open(backend, 100, 7).await;
        for n in 0..3 {
            store.store(marker_event(n));
        }
        let pending = store.fetch_pending().await;
        assert_eq!(pending.len(), 3);
        store.shutdown().await;
    }

    // Simulated restart: a new store reloads the same snapshot file.
    let backend = Arc::new(FileBackend::new(&path));
    let store = DurableStore::open(backend, 100, 7).await;
    let reloaded = store.fetch_pending().await;
    assert_eq!(reloaded.len(), 3);
    let types: Vec<&str> = reloaded.iter().map(|e| e.event.event_type.as_str()).collect();
    assert_eq!(types, vec!["event_0", "event_1", "event_2"]);
    assert!(reloaded.iter().all(|e| e.retry_count == 0));

    store.shutdown().await;
}

#[tokio::test]
async fn test_corrupt_snapshot_resets_to_empty_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("offline_events.json");
    std::fs::write(&path, b"{not valid json!").expect("write garbage");

    let backend = Arc::new(FileBackend::new(&path));
    let store = DurableStore::open(backend, 100, 7).await;

    assert!(store.fetch_pending().await.is_empty());

    // The reset store keeps working.
    store.store(marker_event(0));
    assert_eq!(store.fetch_pending().await.len(), 1);

    store.shutdown().await;
}

#[tokio::test]
async fn test_missing_snapshot_is_a_fresh_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("never_written.json");

    let backend = Arc::new(FileBackend::new(&path));
    let store = DurableStore::open(backend, 100, 7).await;
    assert!(store.fetch_pending().await.is_empty());

    store.shutdown().await;
}
