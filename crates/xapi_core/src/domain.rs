//! crates/xapi_core/src/domain.rs
//!
//! Defines the pure, core data structures for course tracking.
//! These structs serialize directly to the xAPI wire format and are
//! independent of any transport or host framework.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

//=========================================================================================
// Language Maps
//=========================================================================================

/// A map of language tag (e.g. `en-US`) to display text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguageMap(BTreeMap<String, String>);

impl LanguageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a map holding a single language entry.
    pub fn single(lang: &str, text: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(lang.to_string(), text.into());
        Self(map)
    }

    pub fn insert(&mut self, lang: &str, text: impl Into<String>) {
        self.0.insert(lang.to_string(), text.into());
    }

    pub fn get(&self, lang: &str) -> Option<&str> {
        self.0.get(lang).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

//=========================================================================================
// Actor
//=========================================================================================

/// An account-based learner identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "homePage")]
    pub home_page: String,
    pub name: String,
}

/// The identity of the learner issuing tracked events.
///
/// Exactly one of `mbox`, `openid` or `account` identifies the actor once
/// [`Actor::normalize`] has run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mbox: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<Account>,
}

impl Actor {
    /// Creates an actor identified by a `mailto:` mailbox.
    pub fn with_mbox(name: impl Into<String>, mbox: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            mbox: Some(mbox.into()),
            ..Self::default()
        }
    }

    /// Parses an actor from the launch-parameter JSON value.
    ///
    /// Launch systems are historically sloppy here: `name` and `mbox` may
    /// arrive as single-element arrays, and `account` may be an array of
    /// objects using the `accountServiceHomePage`/`accountName` aliases.
    pub fn from_launch_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        let unwrap_string = |v: &Value| -> Option<String> {
            match v {
                Value::String(s) => Some(s.clone()),
                Value::Array(items) => items.first().and_then(|i| i.as_str().map(String::from)),
                _ => None,
            }
        };

        let mut actor = Actor {
            name: obj.get("name").and_then(unwrap_string),
            mbox: obj.get("mbox").and_then(unwrap_string),
            openid: obj.get("openid").and_then(unwrap_string),
            account: None,
        };

        if let Some(account) = obj.get("account") {
            let entry = match account {
                Value::Array(items) => items.first(),
                Value::Object(_) => Some(account),
                _ => None,
            };

            if let Some(entry) = entry.and_then(Value::as_object) {
                let home_page = entry
                    .get("accountServiceHomePage")
                    .or_else(|| entry.get("homePage"))
                    .and_then(Value::as_str);
                let name = entry
                    .get("accountName")
                    .or_else(|| entry.get("name"))
                    .and_then(Value::as_str);

                if let (Some(home_page), Some(name)) = (home_page, name) {
                    actor.account = Some(Account {
                        home_page: home_page.to_string(),
                        name: name.to_string(),
                    });
                }
            }
        }

        actor.normalize();
        Some(actor)
    }

    /// Reduces the identity to a single identifying property.
    ///
    /// Precedence: account, then openid, then mbox.
    pub fn normalize(&mut self) {
        if self.account.is_some() {
            self.openid = None;
            self.mbox = None;
        } else if self.openid.is_some() {
            self.mbox = None;
        }
    }

    /// True when at least one identifying property is present.
    pub fn has_identity(&self) -> bool {
        self.account.is_some() || self.openid.is_some() || self.mbox.is_some()
    }

    /// The learner's unique id, checking account name, openid and mbox in order.
    pub fn learner_id(&self) -> Option<String> {
        if let Some(account) = &self.account {
            return Some(account.name.clone());
        }

        if let Some(openid) = &self.openid {
            return Some(openid.clone());
        }

        if let Some(mbox) = &self.mbox {
            if !mbox.is_empty() {
                return Some(mbox.replace("mailto:", ""));
            }
        }

        None
    }
}

//=========================================================================================
// Verbs
//=========================================================================================

/// A canonical action identifier with localized display text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verb {
    pub id: String,
    pub display: LanguageMap,
}

//=========================================================================================
// Activities
//=========================================================================================

/// The trackable entity categories, each mapping to an ADL activity type IRI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Course,
    Lesson,
    Module,
    Interaction,
    Media,
    Question,
    Assessment,
}

impl ActivityKind {
    pub fn iri(self) -> &'static str {
        match self {
            ActivityKind::Course => "http://adlnet.gov/expapi/activities/course",
            ActivityKind::Lesson => "http://adlnet.gov/expapi/activities/lesson",
            ActivityKind::Module => "http://adlnet.gov/expapi/activities/module",
            ActivityKind::Interaction => "http://adlnet.gov/expapi/activities/interaction",
            ActivityKind::Media => "http://adlnet.gov/expapi/activities/media",
            ActivityKind::Question => "http://adlnet.gov/expapi/activities/question",
            ActivityKind::Assessment => "http://adlnet.gov/expapi/activities/assessment",
        }
    }
}

/// The recognized interaction types of answerable components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InteractionKind {
    Choice,
    Matching,
    FillIn,
    LongFillIn,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActivityDefinition {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "LanguageMap::is_empty")]
    pub name: LanguageMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<LanguageMap>,
    #[serde(rename = "interactionType", skip_serializing_if = "Option::is_none")]
    pub interaction_type: Option<InteractionKind>,
}

/// An IRI-identified trackable entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Activity {
    pub id: String,
    #[serde(rename = "objectType")]
    pub object_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<ActivityDefinition>,
}

impl Activity {
    pub fn new(iri: impl Into<String>) -> Self {
        Self {
            id: iri.into(),
            object_type: "Activity".to_string(),
            definition: None,
        }
    }

    pub fn with_definition(iri: impl Into<String>, definition: ActivityDefinition) -> Self {
        Self {
            id: iri.into(),
            object_type: "Activity".to_string(),
            definition: Some(definition),
        }
    }
}

//=========================================================================================
// Results and Context
//=========================================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Score {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scaled: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatementResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<Score>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl StatementResult {
    pub fn is_empty(&self) -> bool {
        self.score.is_none()
            && self.success.is_none()
            && self.completion.is_none()
            && self.duration.is_none()
            && self.response.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextActivities {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parent: Vec<Activity>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub grouping: Vec<Activity>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<Activity>,
}

impl ContextActivities {
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty() && self.grouping.is_empty() && self.category.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Context {
    #[serde(
        rename = "contextActivities",
        skip_serializing_if = "ContextActivities::is_empty"
    )]
    pub context_activities: ContextActivities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Map<String, Value>>,
}

impl Context {
    pub fn is_empty(&self) -> bool {
        self.context_activities.is_empty()
            && self.registration.is_none()
            && self.language.is_none()
            && self.extensions.is_none()
    }
}

//=========================================================================================
// Attachments
//=========================================================================================

fn serialize_attachment_value<S: Serializer>(
    value: &Option<Bytes>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    use base64::Engine;

    match value {
        Some(bytes) => {
            serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
        }
        None => serializer.serialize_none(),
    }
}

/// A binary attachment resolved and inlined before a statement is transmitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Attachment {
    #[serde(rename = "usageType")]
    pub usage_type: String,
    pub display: LanguageMap,
    #[serde(rename = "contentType")]
    pub content_type: String,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_attachment_value"
    )]
    pub value: Option<Bytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

//=========================================================================================
// Statements
//=========================================================================================

/// One immutable tracking record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub actor: Actor,
    pub verb: Verb,
    pub object: Activity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<StatementResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Statement {
    pub fn new(actor: Actor, verb: Verb, object: Activity) -> Self {
        Self {
            id: None,
            actor,
            verb,
            object,
            result: None,
            context: None,
            timestamp: None,
            attachments: Vec::new(),
        }
    }

    /// Adds a grouping activity to the statement's contextActivities.
    pub fn add_grouping_activity(&mut self, activity: Activity) {
        self.context
            .get_or_insert_with(Context::default)
            .context_activities
            .grouping
            .push(activity);
    }

    /// Adds a parent activity to the statement's contextActivities.
    pub fn add_parent_activity(&mut self, activity: Activity) {
        self.context
            .get_or_insert_with(Context::default)
            .context_activities
            .parent
            .push(activity);
    }

    /// A statement is transmittable only with an identified actor, a verb id
    /// and an object IRI.
    pub fn is_well_formed(&self) -> bool {
        self.actor.has_identity() && !self.verb.id.is_empty() && !self.object.id.is_empty()
    }

    pub fn verb_id(&self) -> &str {
        &self.verb.id
    }
}

//=========================================================================================
// State documents
//=========================================================================================

/// The REST key shared by every state document of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct StateKey {
    pub activity_id: String,
    pub actor: Actor,
    pub registration: Option<Uuid>,
}

/// The tracked state collections, one remote document each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StateCollection {
    Course,
    ContentObjects,
    Articles,
    Blocks,
    Components,
    ProfileStore,
}

impl StateCollection {
    pub const ALL: [StateCollection; 6] = [
        StateCollection::Course,
        StateCollection::ContentObjects,
        StateCollection::Articles,
        StateCollection::Blocks,
        StateCollection::Components,
        StateCollection::ProfileStore,
    ];

    /// The `stateId` used on the wire for this collection.
    pub fn state_id(self) -> &'static str {
        match self {
            StateCollection::Course => "course",
            StateCollection::ContentObjects => "contentObjects",
            StateCollection::Articles => "articles",
            StateCollection::Blocks => "blocks",
            StateCollection::Components => "components",
            StateCollection::ProfileStore => "profileStore",
        }
    }

    /// Singleton collections hold one document; the rest hold ordered lists.
    pub fn is_singleton(self) -> bool {
        matches!(self, StateCollection::Course | StateCollection::ProfileStore)
    }

    pub fn for_kind(kind: ContentKind) -> StateCollection {
        match kind {
            ContentKind::Menu | ContentKind::Page => StateCollection::ContentObjects,
            ContentKind::Article => StateCollection::Articles,
            ContentKind::Block => StateCollection::Blocks,
            ContentKind::Component => StateCollection::Components,
        }
    }
}

fn value_is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// The local mirror of the remote progress snapshot.
///
/// List entries are unique by `_id`; an upsert replaces in place, preserving
/// first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub course: Option<Value>,
    pub profile_store: Option<Value>,
    pub content_objects: Vec<Value>,
    pub articles: Vec<Value>,
    pub blocks: Vec<Value>,
    pub components: Vec<Value>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.course.is_none()
            && self.profile_store.is_none()
            && self.content_objects.is_empty()
            && self.articles.is_empty()
            && self.blocks.is_empty()
            && self.components.is_empty()
    }

    pub fn list(&self, collection: StateCollection) -> &[Value] {
        match collection {
            StateCollection::ContentObjects => &self.content_objects,
            StateCollection::Articles => &self.articles,
            StateCollection::Blocks => &self.blocks,
            StateCollection::Components => &self.components,
            _ => &[],
        }
    }

    fn list_mut(&mut self, collection: StateCollection) -> Option<&mut Vec<Value>> {
        match collection {
            StateCollection::ContentObjects => Some(&mut self.content_objects),
            StateCollection::Articles => Some(&mut self.articles),
            StateCollection::Blocks => Some(&mut self.blocks),
            StateCollection::Components => Some(&mut self.components),
            _ => None,
        }
    }

    pub fn singleton(&self, collection: StateCollection) -> Option<&Value> {
        match collection {
            StateCollection::Course => self.course.as_ref(),
            StateCollection::ProfileStore => self.profile_store.as_ref(),
            _ => None,
        }
    }

    /// Stores a document fetched from the remote store. Empty payloads are
    /// treated as absent.
    pub fn apply_fetched(&mut self, collection: StateCollection, document: Value) {
        if value_is_empty(&document) {
            return;
        }

        match collection {
            StateCollection::Course => self.course = Some(document),
            StateCollection::ProfileStore => self.profile_store = Some(document),
            _ => {
                if let Value::Array(entries) = document {
                    if let Some(list) = self.list_mut(collection) {
                        *list = entries;
                    }
                }
            }
        }
    }

    /// Applies one local mutation and returns the document that must be
    /// written to the remote store for this collection.
    ///
    /// List collections replace by `_id` when present, otherwise append.
    pub fn upsert(&mut self, collection: StateCollection, entry: Value) -> Value {
        match collection {
            StateCollection::Course => {
                self.course = Some(entry.clone());
                entry
            }
            StateCollection::ProfileStore => {
                self.profile_store = Some(entry.clone());
                entry
            }
            list_collection => {
                let Some(list) = self.list_mut(list_collection) else {
                    return entry;
                };

                let entry_id = entry.get("_id").cloned();
                let position = entry_id.as_ref().and_then(|id| {
                    list.iter()
                        .position(|existing| existing.get("_id") == Some(id))
                });

                match position {
                    Some(index) => list[index] = entry,
                    None => list.push(entry),
                }

                Value::Array(list.clone())
            }
        }
    }

    pub fn clear(&mut self) {
        *self = Snapshot::default();
    }
}

//=========================================================================================
// Content tree view
//=========================================================================================

/// The host content-tree entity categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Menu,
    Page,
    Article,
    Block,
    Component,
}

impl ContentKind {
    /// The activity type used when this entity appears as a statement object.
    pub fn activity_kind(self, is_question: bool) -> ActivityKind {
        match self {
            ContentKind::Menu => ActivityKind::Module,
            ContentKind::Page => ActivityKind::Lesson,
            ContentKind::Article | ContentKind::Block => ActivityKind::Interaction,
            ContentKind::Component => {
                if is_question {
                    ActivityKind::Interaction
                } else {
                    ActivityKind::Media
                }
            }
        }
    }
}

/// The view of a live content entity consumed by the statement builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub kind: ContentKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The component type, e.g. `mcq` or `graphic`. Only set for components.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default)]
    pub is_question: bool,
    #[serde(default)]
    pub is_part_of_assessment: bool,
    /// The containing page, when this entity sits below one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    /// The owning assessment, for question components inside one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment_id: Option<String>,
}

impl ContentItem {
    /// The preferred display name for this entity.
    pub fn name(&self) -> &str {
        self.display_title.as_deref().unwrap_or(&self.title)
    }
}

/// Payload of a recorded question interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionInteraction {
    pub item: ContentItem,
    pub interaction_type: InteractionKind,
    pub response: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    #[serde(default)]
    pub is_complete: bool,
}

/// The state of a completed assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub article_id: String,
    pub page_id: String,
    pub score: f64,
    pub max_score: f64,
    pub score_as_percent: f64,
    pub is_pass: bool,
    pub is_complete: bool,
}

impl AssessmentOutcome {
    /// The id the synthetic assessment activity derives its IRI from.
    pub fn activity_key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.article_id)
    }
}

/// The overall course completion status reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Completed,
    Passed,
    Failed,
}

//=========================================================================================
// Assessment configuration
//=========================================================================================

/// The percentage-based pass thresholds of the course or one assessment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssessmentThresholds {
    pub score_to_pass: f64,
    pub correct_to_pass: f64,
    pub passing_score: f64,
}

impl AssessmentThresholds {
    pub fn uniform(percent: f64) -> Self {
        Self {
            score_to_pass: percent,
            correct_to_pass: percent,
            passing_score: percent,
        }
    }
}

/// Which passing-threshold configuration a mutation targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ThresholdTarget {
    Course,
    Assessment(String),
}

/// Title and description of the course itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CourseInfo {
    pub title: String,
    pub description: String,
}

/// A user-facing alert raised when the record store is unreachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub confirm_text: String,
}
