//! crates/xapi_core/src/events.rs
//!
//! Defines the event protocol between the host course runtime and the
//! tracker: content events flowing in, tracker lifecycle events flowing out.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    AssessmentOutcome, CompletionStatus, ContentItem, QuestionInteraction, StateCollection,
};

//=========================================================================================
// Events Sent FROM the Host Runtime TO the Tracker
//=========================================================================================

/// The content events a host runtime can deliver to the tracker.
///
/// Which variants are acted on is decided once at startup from the
/// `_coreEvents` configuration map; disabled variants are dropped silently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentEvent {
    /// A menu or page has been visited.
    ItemExperienced { item: ContentItem },

    /// A question component recorded a learner interaction.
    InteractionRecorded { interaction: QuestionInteraction },

    /// A tracked entity's completion flag changed.
    ItemCompleted { item: ContentItem, is_complete: bool },

    /// An assessment was submitted and scored.
    AssessmentCompleted { outcome: AssessmentOutcome },

    /// The course as a whole reached a completion state.
    CourseCompleted {
        status: CompletionStatus,
        assessment: Option<AssessmentOutcome>,
    },

    /// A tracked entity's persisted state changed.
    StateChanged {
        collection: StateCollection,
        id: String,
        state: Value,
    },

    /// The learner switched the course locale. Starts a new attempt.
    LanguageChanged { lang: String },

    /// The learner asked to leave the course.
    UserExited,
}

//=========================================================================================
// Events Sent FROM the Tracker TO the Host Runtime
//=========================================================================================

/// The lifecycle events the tracker reports back to the host runtime.
///
/// Failures are delivered here rather than returned as errors so that one
/// failed record never blocks course interaction.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// Initialization finished and statements may now flow.
    InitializeSuccess,

    /// Initialization failed; the course must still render.
    InitializeError { message: String },

    /// A statement was accepted by the record store.
    SendStatementSuccess { verb: String },

    /// A statement could not be delivered.
    SendStatementError { message: String },

    /// A state document was written for the given collection.
    SendStateSuccess { collection: StateCollection },

    /// A state document write failed.
    SendStateError { message: String },

    /// The full snapshot has been fetched and is ready to restore.
    StateLoaded,

    /// The launch data asked for a redirect when the learner exits.
    ExitRequested { url: String },
}
