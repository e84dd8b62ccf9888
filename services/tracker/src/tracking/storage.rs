//! services/tracker/src/tracking/storage.rs
//!
//! A key-value storage facade backed by the profile-store snapshot
//! collection. Usable before tracking initializes, in which case it works
//! against an in-memory temporary store only.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use xapi_core::domain::{Actor, StateCollection};

use crate::tracking::state_sync::StateSynchronizer;

/// The learner identity surfaced to course content.
#[derive(Debug, Clone, Serialize)]
pub struct LearnerInfo {
    pub id: Option<String>,
    pub name: String,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
}

/// Derives the learner info from the actor. The full name is split as
/// "Firstname Lastname" when it has that shape.
pub fn learner_info(actor: &Actor) -> LearnerInfo {
    let name = actor.name.clone().unwrap_or_default();

    let (firstname, lastname) = match name.split_once(char::is_whitespace) {
        Some((first, rest)) if !rest.trim().is_empty() => {
            (Some(first.to_string()), Some(rest.trim().to_string()))
        }
        _ => {
            warn!("actor name not in \"firstname lastname\" format");
            (None, None)
        }
    };

    LearnerInfo {
        id: actor.learner_id(),
        name,
        firstname,
        lastname,
    }
}

struct Binding {
    sync: Arc<StateSynchronizer>,
    actor: Actor,
    track_state: bool,
}

struct StoreState {
    values: serde_json::Map<String, Value>,
    restored: bool,
    binding: Option<Binding>,
}

/// The snapshot-backed key-value store handed to the host runtime.
pub struct OfflineStore {
    state: Mutex<StoreState>,
}

impl Default for OfflineStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState {
                values: serde_json::Map::new(),
                restored: false,
                binding: None,
            }),
        }
    }

    /// Attaches the store to a live synchronizer once tracking has
    /// initialized. Values written before this point stay in memory and are
    /// pushed on the next `set`.
    pub(crate) fn bind(&self, sync: Arc<StateSynchronizer>, actor: Actor, track_state: bool) {
        let mut state = self.state.lock().expect("offline store poisoned");
        state.binding = Some(Binding {
            sync,
            actor,
            track_state,
        });
    }

    /// True while the store has no record-store backing.
    pub fn is_temporary(&self) -> bool {
        self.state
            .lock()
            .expect("offline store poisoned")
            .binding
            .is_none()
    }

    fn restore_if_needed(state: &mut StoreState) {
        if state.restored {
            return;
        }

        let Some(binding) = &state.binding else {
            return;
        };

        if let Some(Value::Object(map)) = binding.sync.snapshot().profile_store {
            state.values = map;
        }
        state.restored = true;
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let mut state = self.state.lock().expect("offline store poisoned");
        Self::restore_if_needed(&mut state);

        if name.eq_ignore_ascii_case("learnerinfo") {
            if let Some(binding) = &state.binding {
                return serde_json::to_value(learner_info(&binding.actor)).ok();
            }
        }

        state.values.get(name).cloned()
    }

    pub fn get_all(&self) -> serde_json::Map<String, Value> {
        let mut state = self.state.lock().expect("offline store poisoned");
        Self::restore_if_needed(&mut state);

        let mut values = state.values.clone();

        // If not connected, return just the store.
        if let Some(binding) = &state.binding {
            if let Ok(info) = serde_json::to_value(learner_info(&binding.actor)) {
                values.insert("learnerInfo".to_string(), info);
            }
        }

        values
    }

    /// Stores a value and, once tracking is live, mirrors the whole store to
    /// the profile-store collection.
    pub fn set(&self, name: &str, value: Value) {
        let (sync, document) = {
            let mut state = self.state.lock().expect("offline store poisoned");
            Self::restore_if_needed(&mut state);
            state.values.insert(name.to_string(), value);

            match &state.binding {
                Some(binding) if binding.track_state => {
                    (binding.sync.clone(), Value::Object(state.values.clone()))
                }
                _ => return,
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    sync.upsert(StateCollection::ProfileStore, document).await;
                });
            }
            Err(_) => {
                warn!("no async runtime available to persist offline storage");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn works_as_a_temporary_store_before_binding() {
        let store = OfflineStore::new();

        assert!(store.is_temporary());
        store.set("bookmark", json!("co-05"));

        assert_eq!(store.get("bookmark"), Some(json!("co-05")));
        assert_eq!(store.get_all().get("bookmark"), Some(&json!("co-05")));
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn learner_info_splits_the_full_name() {
        let actor = Actor::with_mbox("Ada Lovelace", "mailto:ada@x.com");
        let info = learner_info(&actor);

        assert_eq!(info.id.as_deref(), Some("ada@x.com"));
        assert_eq!(info.firstname.as_deref(), Some("Ada"));
        assert_eq!(info.lastname.as_deref(), Some("Lovelace"));
    }

    #[test]
    fn single_token_names_have_no_split() {
        let actor = Actor::with_mbox("Ada", "mailto:ada@x.com");
        let info = learner_info(&actor);

        assert_eq!(info.name, "Ada");
        assert!(info.firstname.is_none());
        assert!(info.lastname.is_none());
    }
}
