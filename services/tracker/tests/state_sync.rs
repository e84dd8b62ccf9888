//! Fan-out semantics of the state synchronizer: first-error-aborts fetches
//! and best-effort deletes.

mod common;

use std::sync::Arc;

use common::*;
use serde_json::json;
use tracker_lib::tracking::notify::FailureNotifier;
use tracker_lib::tracking::state_sync::StateSynchronizer;
use xapi_core::domain::{Actor, StateCollection, StateKey};

fn synchronizer(store: Arc<MemoryRecordStore>, sink: Arc<RecordingSink>) -> StateSynchronizer {
    let notifier = Arc::new(FailureNotifier::new(CountingNotifier::new(), true));
    StateSynchronizer::new(
        store,
        sink,
        notifier,
        StateKey {
            activity_id: "http://x/course".to_string(),
            actor: Actor::with_mbox("A", "mailto:a@x.com"),
            registration: None,
        },
    )
}

#[tokio::test]
async fn missing_collections_are_empty_not_errors() {
    init_tracing();
    let store = MemoryRecordStore::new()
        .with_state("blocks", json!([{"_id": "b-05"}]));
    let sync = synchronizer(store, RecordingSink::new());

    let snapshot = sync.fetch_all().await.unwrap();

    assert!(!snapshot.is_empty());
    assert_eq!(snapshot.blocks.len(), 1);
    assert!(snapshot.components.is_empty());
    assert!(snapshot.course.is_none());
}

#[tokio::test]
async fn a_malformed_collection_aborts_the_whole_fetch() {
    init_tracing();
    let store = MemoryRecordStore::new()
        .with_state("blocks", json!([{"_id": "b-05"}]));
    store
        .malformed_states
        .lock()
        .unwrap()
        .insert("articles".to_string());
    let sync = synchronizer(store, RecordingSink::new());

    assert!(sync.fetch_all().await.is_err());
}

#[tokio::test]
async fn upserts_write_through_and_report_success() {
    init_tracing();
    let store = MemoryRecordStore::new();
    let sink = RecordingSink::new();
    let sync = synchronizer(store.clone(), sink.clone());

    sync.upsert(StateCollection::Components, json!({"_id": "c-05", "v": 1}))
        .await;
    sync.upsert(StateCollection::Components, json!({"_id": "c-06", "v": 1}))
        .await;
    sync.upsert(StateCollection::Components, json!({"_id": "c-05", "v": 2}))
        .await;

    let state = store.state.lock().unwrap();
    let components = state.get("components").unwrap().as_array().unwrap();
    assert_eq!(components.len(), 2);
    assert_eq!(components[0], json!({"_id": "c-05", "v": 2}));
    drop(state);

    assert_eq!(
        sink.labels()
            .iter()
            .filter(|label| *label == "sendState:success")
            .count(),
        3
    );
}

#[tokio::test]
async fn delete_all_is_best_effort_but_reports_failure() {
    init_tracing();
    let store = MemoryRecordStore::new()
        .with_state("components", json!([{"_id": "c-05"}]))
        .with_state("articles", json!([{"_id": "a-05"}]));
    store
        .failing_deletes
        .lock()
        .unwrap()
        .insert("blocks".to_string());
    let sync = synchronizer(store.clone(), RecordingSink::new());

    let result = sync.delete_all().await;

    assert!(result.is_err());
    // The failing collection did not stop the remaining deletes.
    let deleted = store.deleted.lock().unwrap();
    assert_eq!(deleted.len(), StateCollection::ALL.len() - 1);
    assert!(!deleted.contains(&"blocks".to_string()));
    // The local mirror is reset regardless.
    assert!(sync.snapshot().is_empty());
}
