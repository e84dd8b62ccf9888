pub mod domain;
pub mod duration;
pub mod events;
pub mod ports;
pub mod verbs;

pub use domain::{
    Account, Activity, ActivityDefinition, ActivityKind, AssessmentOutcome, AssessmentThresholds,
    Attachment, Actor, CompletionStatus, ContentItem, ContentKind, Context, ContextActivities,
    CourseInfo, InteractionKind, LanguageMap, Notification, QuestionInteraction, Score, Snapshot,
    StateCollection, StateKey, Statement, StatementResult, ThresholdTarget, Verb,
};
pub use events::{ContentEvent, TrackerEvent};
pub use ports::{
    ContentRegistry, Notifier, PortError, PortResult, RecordStore, StatementInterceptor,
    TrackerEventSink,
};
pub use verbs::{VerbKey, DEFAULT_LANG};
