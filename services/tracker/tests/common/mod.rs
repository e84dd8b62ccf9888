//! Shared in-memory collaborators for the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracker_lib::config::{LaunchEnvironment, TrackingConfig};
use tracker_lib::tracking::session::Collaborators;
use url::Url;
use xapi_core::domain::{
    Actor, AssessmentThresholds, ContentItem, ContentKind, CourseInfo, Notification, StateKey,
    Statement, ThresholdTarget,
};
use xapi_core::events::TrackerEvent;
use xapi_core::ports::{
    ContentRegistry, Notifier, PortError, PortResult, RecordStore, TrackerEventSink,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}

//=========================================================================================
// Record store
//=========================================================================================

#[derive(Default)]
pub struct MemoryRecordStore {
    pub statements: Mutex<Vec<Statement>>,
    pub terminal_batches: Mutex<Vec<Vec<Statement>>>,
    pub state: Mutex<HashMap<String, Value>>,
    pub agent_profiles: Mutex<HashMap<String, Value>>,
    pub deleted: Mutex<Vec<String>>,
    pub state_reads: AtomicUsize,
    pub fail_statements: AtomicBool,
    pub malformed_states: Mutex<HashSet<String>>,
    pub failing_deletes: Mutex<HashSet<String>>,
}

impl MemoryRecordStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_state(self: Arc<Self>, state_id: &str, document: Value) -> Arc<Self> {
        self.state
            .lock()
            .unwrap()
            .insert(state_id.to_string(), document);
        self
    }

    /// The trailing verb name of every statement sent asynchronously, in
    /// send order.
    pub fn verbs(&self) -> Vec<String> {
        self.statements
            .lock()
            .unwrap()
            .iter()
            .map(verb_name)
            .collect()
    }

    pub fn terminal_verbs(&self) -> Vec<Vec<String>> {
        self.terminal_batches
            .lock()
            .unwrap()
            .iter()
            .map(|batch| batch.iter().map(verb_name).collect())
            .collect()
    }
}

pub fn verb_name(statement: &Statement) -> String {
    statement
        .verb
        .id
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn post_statement(&self, statement: &Statement) -> PortResult<()> {
        if self.fail_statements.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("record store offline".to_string()));
        }

        self.statements.lock().unwrap().push(statement.clone());
        Ok(())
    }

    async fn get_state(&self, _key: &StateKey, state_id: &str) -> PortResult<Option<Value>> {
        self.state_reads.fetch_add(1, Ordering::SeqCst);

        if self.malformed_states.lock().unwrap().contains(state_id) {
            return Err(PortError::InvalidPayload(format!(
                "unparseable state document for {state_id}"
            )));
        }

        Ok(self.state.lock().unwrap().get(state_id).cloned())
    }

    async fn set_state(&self, _key: &StateKey, state_id: &str, document: &Value) -> PortResult<()> {
        self.state
            .lock()
            .unwrap()
            .insert(state_id.to_string(), document.clone());
        Ok(())
    }

    async fn delete_state(&self, _key: &StateKey, state_id: &str) -> PortResult<()> {
        if self.failing_deletes.lock().unwrap().contains(state_id) {
            return Err(PortError::Unexpected(format!(
                "delete refused for {state_id}"
            )));
        }

        self.deleted.lock().unwrap().push(state_id.to_string());
        self.state.lock().unwrap().remove(state_id);
        Ok(())
    }

    async fn get_agent_profile(
        &self,
        _actor: &Actor,
        profile_id: &str,
    ) -> PortResult<Option<Value>> {
        Ok(self.agent_profiles.lock().unwrap().get(profile_id).cloned())
    }

    fn post_statements_blocking(&self, statements: &[Statement]) -> PortResult<()> {
        self.terminal_batches
            .lock()
            .unwrap()
            .push(statements.to_vec());
        Ok(())
    }
}

//=========================================================================================
// Content registry
//=========================================================================================

pub struct MemoryRegistry {
    pub course: CourseInfo,
    pub items: Mutex<HashMap<String, ContentItem>>,
    pub applied: Mutex<Vec<String>>,
    pub thresholds: Mutex<HashMap<ThresholdTarget, AssessmentThresholds>>,
    pub assessments: Vec<String>,
    pub percentage_based: bool,
}

impl MemoryRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            course: CourseInfo {
                title: "Demo Course".to_string(),
                description: "An integration-test course".to_string(),
            },
            items: Mutex::new(HashMap::new()),
            applied: Mutex::new(Vec::new()),
            thresholds: Mutex::new(HashMap::new()),
            assessments: Vec::new(),
            percentage_based: true,
        })
    }

    pub fn with_assessments(assessments: Vec<String>) -> Arc<Self> {
        let mut registry = Self {
            course: CourseInfo {
                title: "Demo Course".to_string(),
                description: String::new(),
            },
            items: Mutex::new(HashMap::new()),
            applied: Mutex::new(Vec::new()),
            thresholds: Mutex::new(HashMap::new()),
            assessments,
            percentage_based: true,
        };
        registry
            .thresholds
            .get_mut()
            .unwrap()
            .insert(ThresholdTarget::Course, AssessmentThresholds::uniform(60.0));
        Arc::new(registry)
    }

    pub fn insert(&self, item: ContentItem) {
        self.items.lock().unwrap().insert(item.id.clone(), item);
    }
}

impl ContentRegistry for MemoryRegistry {
    fn course(&self) -> CourseInfo {
        self.course.clone()
    }

    fn find(&self, id: &str) -> Option<ContentItem> {
        self.items.lock().unwrap().get(id).cloned()
    }

    fn apply_state(&self, id: &str, _state: &Value) -> bool {
        if self.items.lock().unwrap().contains_key(id) {
            self.applied.lock().unwrap().push(id.to_string());
            true
        } else {
            false
        }
    }

    fn assessment_ids(&self) -> Vec<String> {
        self.assessments.clone()
    }

    fn passing_is_percentage_based(&self) -> bool {
        self.percentage_based
    }

    fn thresholds(&self, target: &ThresholdTarget) -> Option<AssessmentThresholds> {
        self.thresholds.lock().unwrap().get(target).copied()
    }

    fn set_thresholds(&self, target: &ThresholdTarget, thresholds: AssessmentThresholds) {
        self.thresholds
            .lock()
            .unwrap()
            .insert(target.clone(), thresholds);
    }
}

//=========================================================================================
// Sink and notifier
//=========================================================================================

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<TrackerEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn labels(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| match event {
                TrackerEvent::InitializeSuccess => "initialize:success".to_string(),
                TrackerEvent::InitializeError { .. } => "initialize:error".to_string(),
                TrackerEvent::SendStatementSuccess { .. } => "sendStatement:success".to_string(),
                TrackerEvent::SendStatementError { .. } => "sendStatement:error".to_string(),
                TrackerEvent::SendStateSuccess { .. } => "sendState:success".to_string(),
                TrackerEvent::SendStateError { .. } => "sendState:error".to_string(),
                TrackerEvent::StateLoaded => "stateLoaded".to_string(),
                TrackerEvent::ExitRequested { .. } => "exitRequested".to_string(),
            })
            .collect()
    }
}

impl TrackerEventSink for RecordingSink {
    fn emit(&self, event: TrackerEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct CountingNotifier {
    pub alerts: AtomicUsize,
}

impl CountingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl Notifier for CountingNotifier {
    fn alert(&self, _notification: &Notification) {
        self.alerts.fetch_add(1, Ordering::SeqCst);
    }
}

//=========================================================================================
// Fixtures
//=========================================================================================

pub const PAGE_URL: &str = "http://lms.example/course/index.html";

/// A launch URL carrying the default mailbox actor.
pub fn launch_url() -> String {
    format!("{PAGE_URL}?actor=%7B%22name%22%3A%22A%22%2C%22mbox%22%3A%22mailto%3Aa%40x.com%22%7D")
}

pub fn environment(url: &str) -> LaunchEnvironment {
    LaunchEnvironment::new(Url::parse(url).unwrap(), "en-US")
}

/// Tracking enabled against a same-origin endpoint.
pub fn base_config() -> TrackingConfig {
    TrackingConfig::from_value(json!({
        "_isEnabled": true,
        "_endpoint": "http://lms.example/data/xapi",
        "_activityID": "http://x/course"
    }))
    .unwrap()
}

pub struct Fixture {
    pub store: Arc<MemoryRecordStore>,
    pub registry: Arc<MemoryRegistry>,
    pub sink: Arc<RecordingSink>,
    pub notifier: Arc<CountingNotifier>,
}

impl Fixture {
    pub fn new() -> Self {
        init_tracing();
        Self {
            store: MemoryRecordStore::new(),
            registry: MemoryRegistry::new(),
            sink: RecordingSink::new(),
            notifier: CountingNotifier::new(),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            registry: self.registry.clone(),
            notifier: self.notifier.clone(),
            sink: self.sink.clone(),
            interceptor: None,
            store: Some(self.store.clone()),
        }
    }
}

pub fn page(id: &str) -> ContentItem {
    ContentItem {
        id: id.to_string(),
        kind: ContentKind::Page,
        title: "Page One".to_string(),
        display_title: None,
        description: None,
        component: None,
        is_question: false,
        is_part_of_assessment: false,
        page_id: None,
        assessment_id: None,
    }
}

pub fn component(id: &str, component: &str, is_question: bool) -> ContentItem {
    ContentItem {
        id: id.to_string(),
        kind: ContentKind::Component,
        title: format!("Component {id}"),
        display_title: None,
        description: Some("What is the answer?".to_string()),
        component: Some(component.to_string()),
        is_question,
        is_part_of_assessment: false,
        page_id: Some("co-05".to_string()),
        assessment_id: None,
    }
}
