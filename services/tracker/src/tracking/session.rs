//! services/tracker/src/tracking/session.rs
//!
//! Defines the per-load session value and the shared collaborator handles.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use xapi_core::domain::{Actor, StateKey};
use xapi_core::ports::{
    ContentRegistry, Notifier, RecordStore, StatementInterceptor, TrackerEventSink,
};

//=========================================================================================
// Collaborators (Supplied by the Host at Bootstrap)
//=========================================================================================

/// The external collaborators handed to the tracker by the host's bootstrap.
pub struct Collaborators {
    pub registry: Arc<dyn ContentRegistry>,
    pub notifier: Arc<dyn Notifier>,
    pub sink: Arc<dyn TrackerEventSink>,
    pub interceptor: Option<Arc<dyn StatementInterceptor>>,
    /// An already-configured record store transport. When absent, the
    /// tracker builds its own HTTP transport from the resolved launch
    /// credentials.
    pub store: Option<Arc<dyn RecordStore>>,
}

//=========================================================================================
// SessionState (One per Course Load)
//=========================================================================================

/// The state of one tracked course session.
///
/// Created once per course load by the lifecycle controller and passed by
/// reference into every statement construction; never persisted itself.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub is_initialised: bool,
    pub activity_id: String,
    pub actor: Actor,
    pub registration: Option<Uuid>,
    /// The verb display language.
    pub lang: String,
    /// The language used for activity names and descriptions.
    pub display_lang: String,
    pub generate_ids: bool,
    pub should_track_state: bool,
    pub should_use_registration: bool,
    pub component_blacklist: Vec<String>,
    pub course_title: String,
    pub course_description: String,
    pub start_timestamp: DateTime<Utc>,
    /// Attempt time accumulated before this session, carried across resumes.
    pub attempt_duration_baseline_ms: i64,
    pub is_complete: bool,
    pub is_terminated: bool,
}

impl SessionState {
    /// Elapsed time of this session only.
    pub fn session_duration_ms(&self) -> i64 {
        (Utc::now() - self.start_timestamp).num_milliseconds().abs()
    }

    /// Elapsed time of the whole attempt, including prior sessions.
    pub fn attempt_duration_ms(&self) -> i64 {
        self.attempt_duration_baseline_ms + self.session_duration_ms()
    }

    /// The key addressing this attempt's state documents.
    pub fn state_key(&self) -> StateKey {
        StateKey {
            activity_id: self.activity_id.clone(),
            actor: self.actor.clone(),
            registration: if self.should_use_registration {
                self.registration
            } else {
                None
            },
        }
    }

    /// Checks if a given component is blacklisted from sending statements.
    pub fn is_blacklisted(&self, component: &str) -> bool {
        self.component_blacklist
            .iter()
            .any(|entry| entry == &component.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionState {
        SessionState {
            is_initialised: true,
            activity_id: "http://x/course".to_string(),
            actor: Actor::with_mbox("A", "mailto:a@x.com"),
            registration: Some(Uuid::new_v4()),
            lang: "en-US".to_string(),
            display_lang: "en-US".to_string(),
            generate_ids: false,
            should_track_state: true,
            should_use_registration: false,
            component_blacklist: vec!["blank".to_string(), "graphic".to_string()],
            course_title: "Course".to_string(),
            course_description: String::new(),
            start_timestamp: Utc::now(),
            attempt_duration_baseline_ms: 60_000,
            is_complete: false,
            is_terminated: false,
        }
    }

    #[test]
    fn attempt_duration_includes_the_baseline() {
        let session = session();
        assert!(session.attempt_duration_ms() >= 60_000);
        assert!(session.session_duration_ms() < 60_000);
    }

    #[test]
    fn registration_is_withheld_unless_configured() {
        let mut session = session();
        assert!(session.state_key().registration.is_none());

        session.should_use_registration = true;
        assert_eq!(session.state_key().registration, session.registration);
    }

    #[test]
    fn blacklist_matches_case_insensitively() {
        let session = session();
        assert!(session.is_blacklisted("Graphic"));
        assert!(!session.is_blacklisted("mcq"));
    }
}
