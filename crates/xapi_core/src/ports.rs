//! crates/xapi_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the tracker's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! core to be independent of the host runtime and of the concrete record
//! store transport.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{
    Actor, AssessmentThresholds, ContentItem, CourseInfo, Notification, StateKey, Statement,
    ThresholdTarget,
};
use crate::events::TrackerEvent;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g. the
/// record store's HTTP client).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Malformed payload: {0}")]
    InvalidPayload(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The remote learning record store.
///
/// State reads resolve to `Ok(None)` on 404 or an empty body; a malformed
/// payload is an `InvalidPayload` error, never silently empty.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn post_statement(&self, statement: &Statement) -> PortResult<()>;

    async fn get_state(&self, key: &StateKey, state_id: &str) -> PortResult<Option<Value>>;

    async fn set_state(&self, key: &StateKey, state_id: &str, document: &Value) -> PortResult<()>;

    async fn delete_state(&self, key: &StateKey, state_id: &str) -> PortResult<()>;

    async fn get_agent_profile(&self, actor: &Actor, profile_id: &str)
        -> PortResult<Option<Value>>;

    /// Best-effort synchronous batch send, used only for terminal statements
    /// at unload. Must not require a running async executor.
    fn post_statements_blocking(&self, statements: &[Statement]) -> PortResult<()>;
}

/// Lookup into the host's live content tree.
pub trait ContentRegistry: Send + Sync {
    /// Title and description of the course itself.
    fn course(&self) -> CourseInfo;

    fn find(&self, id: &str) -> Option<ContentItem>;

    /// Applies a restored state document to the live entity. Returns false
    /// when the entity no longer exists (content changed since the snapshot).
    fn apply_state(&self, id: &str, state: &Value) -> bool;

    /// Ids of the enabled, scored assessments in the course.
    fn assessment_ids(&self) -> Vec<String>;

    /// Whether course passing is configured on percentage thresholds.
    fn passing_is_percentage_based(&self) -> bool;

    fn thresholds(&self, target: &ThresholdTarget) -> Option<AssessmentThresholds>;

    fn set_thresholds(&self, target: &ThresholdTarget, thresholds: AssessmentThresholds);
}

/// User-facing failure notification.
pub trait Notifier: Send + Sync {
    fn alert(&self, notification: &Notification);
}

/// Receives the tracker's lifecycle events.
pub trait TrackerEventSink: Send + Sync {
    fn emit(&self, event: TrackerEvent);
}

/// Pre-send interception point: a collaborator may mutate a statement or add
/// attachments before it is transmitted.
pub trait StatementInterceptor: Send + Sync {
    fn before_send(&self, statement: &mut Statement);
}
