//! services/tracker/src/tracking/state_sync.rs
//!
//! Mirrors the named in-memory collections to remote snapshot documents and
//! back: fetch-all at startup, one unbatched write per mutation, best-effort
//! delete-all when an attempt is reset.

use std::sync::{Arc, Mutex};

use futures::future::{join_all, try_join_all};
use serde_json::Value;
use tracing::warn;
use xapi_core::domain::{Snapshot, StateCollection, StateKey};
use xapi_core::events::TrackerEvent;
use xapi_core::ports::{ContentRegistry, PortError, RecordStore, TrackerEventSink};

use crate::error::{TrackerError, TrackerResult};
use crate::tracking::notify::{FailureClass, FailureNotifier};

/// Synchronizes the local snapshot cache with the remote record store.
///
/// The cache is only ever mutated from the single event-handling task; the
/// mutex exists because the synchronizer is shared behind an `Arc`.
pub struct StateSynchronizer {
    store: Arc<dyn RecordStore>,
    sink: Arc<dyn TrackerEventSink>,
    failures: Arc<FailureNotifier>,
    key: StateKey,
    cache: Mutex<Snapshot>,
}

impl StateSynchronizer {
    pub fn new(
        store: Arc<dyn RecordStore>,
        sink: Arc<dyn TrackerEventSink>,
        failures: Arc<FailureNotifier>,
        key: StateKey,
    ) -> Self {
        Self {
            store,
            sink,
            failures,
            key,
            cache: Mutex::new(Snapshot::default()),
        }
    }

    /// A copy of the locally cached snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.cache.lock().expect("snapshot poisoned").clone()
    }

    /// Fetches every tracked collection with one independent read each.
    ///
    /// A missing document is empty for that collection only; any other
    /// failure (including a malformed payload) aborts the whole fetch.
    pub async fn fetch_all(&self) -> TrackerResult<Snapshot> {
        let reads = StateCollection::ALL.iter().map(|collection| async move {
            let document = self.store.get_state(&self.key, collection.state_id()).await;

            match document {
                Ok(document) => Ok((*collection, document)),
                // Stores that signal absence as an error rather than an
                // empty read are tolerated the same way.
                Err(PortError::NotFound(_)) => Ok((*collection, None)),
                Err(error) => {
                    warn!(
                        collection = collection.state_id(),
                        activity = %self.key.activity_id,
                        "state read failed: {error}"
                    );
                    Err(error)
                }
            }
        });

        let documents = try_join_all(reads).await.map_err(TrackerError::Port)?;

        let mut snapshot = Snapshot::default();
        for (collection, document) in documents {
            if let Some(document) = document {
                snapshot.apply_fetched(collection, document);
            }
        }

        *self.cache.lock().expect("snapshot poisoned") = snapshot.clone();
        Ok(snapshot)
    }

    /// Applies one state mutation locally and pushes the affected collection
    /// document to the remote store.
    ///
    /// Transport failures are reported through the event sink and the
    /// failure notifier; they do not propagate to the caller so that one
    /// failed write never blocks course interaction.
    pub async fn upsert(&self, collection: StateCollection, entry: Value) {
        let document = {
            let mut cache = self.cache.lock().expect("snapshot poisoned");
            cache.upsert(collection, entry)
        };

        match self
            .store
            .set_state(&self.key, collection.state_id(), &document)
            .await
        {
            Ok(()) => {
                self.sink.emit(TrackerEvent::SendStateSuccess { collection });
            }
            Err(error) => {
                warn!(
                    collection = collection.state_id(),
                    "state write failed: {error}"
                );
                self.sink.emit(TrackerEvent::SendStateError {
                    message: error.to_string(),
                });
                self.failures.failure(FailureClass::State);
            }
        }
    }

    /// Deletes every tracked collection from the remote store.
    ///
    /// One failed collection does not stop the others, but the aggregate
    /// operation reports failure if any collection failed.
    pub async fn delete_all(&self) -> TrackerResult<()> {
        let deletes = StateCollection::ALL.iter().map(|collection| async move {
            let result = self
                .store
                .delete_state(&self.key, collection.state_id())
                .await;
            (*collection, result)
        });

        let mut failed = 0usize;
        for (collection, result) in join_all(deletes).await {
            if let Err(error) = result {
                warn!(
                    collection = collection.state_id(),
                    "state delete failed: {error}"
                );
                failed += 1;
            }
        }

        self.cache.lock().expect("snapshot poisoned").clear();

        if failed > 0 {
            return Err(TrackerError::Internal(format!(
                "failed to delete state for {failed} collection(s)"
            )));
        }

        Ok(())
    }

    /// Applies the restored component and block entries to the live content
    /// tree. Entries whose entity no longer exists are skipped with a
    /// warning; the content may have changed since the snapshot was taken.
    pub fn restore(&self, registry: &dyn ContentRegistry) {
        let snapshot = self.snapshot();

        for collection in [StateCollection::Components, StateCollection::Blocks] {
            for entry in snapshot.list(collection) {
                let Some(id) = entry.get("_id").and_then(Value::as_str) else {
                    warn!(
                        collection = collection.state_id(),
                        "skipping state entry without an _id"
                    );
                    continue;
                };

                if !registry.apply_state(id, entry) {
                    warn!("Unable to restore state for {}: {id}", collection.state_id());
                }
            }
        }
    }
}
