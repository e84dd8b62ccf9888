//! services/tracker/src/tracking/lifecycle.rs
//!
//! Orchestrates the tracked session: launch resolution, the startup
//! statement sequence, the attempt/resume decision, content event handling
//! and the termination boundary.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;
use xapi_core::domain::{Actor, CompletionStatus, ContentItem, ContentKind, StatementResult};
use xapi_core::events::{ContentEvent, TrackerEvent};
use xapi_core::ports::{ContentRegistry, RecordStore, StatementInterceptor, TrackerEventSink};
use xapi_core::verbs::{VerbKey, DEFAULT_LANG};

use crate::adapters::lrs::{LrsCredentials, XapiRecordStore};
use crate::config::{ConfigError, CoreEvents, LaunchEnvironment, SpecificationProfile, TrackingConfig};
use crate::error::{TrackerError, TrackerResult};
use crate::tracking::cmi5::{self, Cmi5Session};
use crate::tracking::dispatch::Dispatcher;
use crate::tracking::notify::{FailureClass, FailureNotifier};
use crate::tracking::session::SessionState;
use crate::tracking::state_sync::StateSynchronizer;
use crate::tracking::statements;
use crate::tracking::storage::OfflineStore;

pub use crate::tracking::session::Collaborators;

/// Delay before an assessment statement is dispatched, so that child item
/// completion statements are recorded first. The ordering is a correctness
/// requirement for downstream reporting, not cosmetic.
const ASSESSMENT_DISPATCH_DELAY: Duration = Duration::from_millis(500);

/// Launch parameters consumed by the bootstrap itself; everything else on
/// the query string is LMS-specific and forwarded to the terminal transport.
const KNOWN_LAUNCH_PARAMS: [&str; 7] = [
    "endpoint",
    "auth",
    "actor",
    "registration",
    "activity_id",
    "activityId",
    "fetch",
];

/// The session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStatus {
    Uninitialized,
    Initializing,
    Initialized,
    Failed,
    Terminating,
    Terminated,
}

/// The live parts of an initialized session.
struct Active {
    session: SessionState,
    dispatcher: Dispatcher,
    sync: Arc<StateSynchronizer>,
    cmi5: Option<Cmi5Session>,
}

struct ResolvedLaunch {
    activity_id: String,
    actor: Actor,
    registration: Option<Uuid>,
    endpoint: Option<Url>,
    auth: Option<String>,
    should_use_registration: bool,
    is_cmi5: bool,
}

/// The session lifecycle controller.
///
/// Created once per course load by [`TrackingController::initialize`]; the
/// host keeps the returned handle and feeds it content events, visibility
/// changes and the unload trigger.
pub struct TrackingController {
    registry: Arc<dyn ContentRegistry>,
    sink: Arc<dyn TrackerEventSink>,
    failures: Arc<FailureNotifier>,
    core_events: CoreEvents,
    storage: Arc<OfflineStore>,
    status: Mutex<LifecycleStatus>,
    active: Mutex<Option<Active>>,
}

impl TrackingController {
    /// Bootstraps tracking for one course load.
    ///
    /// This never fails hard: a bootstrap error marks the controller
    /// `Failed`, raises `initialize:error` through the sink and returns, so
    /// course rendering is never blocked on the record store.
    pub async fn initialize(
        config: TrackingConfig,
        env: LaunchEnvironment,
        collaborators: Collaborators,
    ) -> Arc<TrackingController> {
        let failures = Arc::new(FailureNotifier::new(
            collaborators.notifier.clone(),
            config.should_notify_failures(),
        ));

        let controller = Arc::new(TrackingController {
            registry: collaborators.registry.clone(),
            sink: collaborators.sink.clone(),
            failures,
            core_events: config.core_events.clone(),
            storage: Arc::new(OfflineStore::new()),
            status: Mutex::new(LifecycleStatus::Uninitialized),
            active: Mutex::new(None),
        });

        if !config.is_enabled {
            return controller;
        }

        controller.set_status(LifecycleStatus::Initializing);
        info!("Tracking configuration loaded. Initializing session...");

        let bootstrap = controller
            .bootstrap(
                &config,
                &env,
                collaborators.store,
                collaborators.interceptor,
            )
            .await;

        match bootstrap {
            Ok(active) => {
                *controller.active.lock().expect("controller poisoned") = Some(active);
                controller.set_status(LifecycleStatus::Initialized);
                controller.sink.emit(TrackerEvent::InitializeSuccess);
                info!("Tracking session initialized.");
            }
            Err(cause) => {
                error!("tracking initialization failed: {cause}");
                controller.set_status(LifecycleStatus::Failed);
                controller.sink.emit(TrackerEvent::InitializeError {
                    message: cause.to_string(),
                });
                controller.failures.failure(FailureClass::Initialize);
            }
        }

        controller
    }

    pub fn status(&self) -> LifecycleStatus {
        *self.status.lock().expect("controller poisoned")
    }

    /// The snapshot-backed storage facade. Works as an in-memory temporary
    /// store until tracking initializes.
    pub fn storage(&self) -> Arc<OfflineStore> {
        self.storage.clone()
    }

    fn set_status(&self, status: LifecycleStatus) {
        *self.status.lock().expect("controller poisoned") = status;
    }

    //=====================================================================================
    // Bootstrap
    //=====================================================================================

    async fn bootstrap(
        &self,
        config: &TrackingConfig,
        env: &LaunchEnvironment,
        injected_store: Option<Arc<dyn RecordStore>>,
        interceptor: Option<Arc<dyn StatementInterceptor>>,
    ) -> TrackerResult<Active> {
        let http = reqwest::Client::builder().build()?;

        let need_token = injected_store.is_none();
        let resolved = Self::resolve_launch(config, env, &http, need_token).await?;

        if !resolved.actor.has_identity() {
            warn!("\"actor\" attribute not found!");
            return Err(ConfigError::MissingProperty("actor").into());
        }

        if resolved.activity_id.is_empty() {
            warn!("\"activityId\" attribute not found!");
            return Err(ConfigError::MissingProperty("activityId").into());
        }

        let store: Arc<dyn RecordStore> = match injected_store {
            Some(store) => store,
            None => {
                let endpoint = resolved.endpoint.clone().ok_or_else(|| {
                    TrackerError::Launch("no record store endpoint is configured".to_string())
                })?;
                let auth = resolved.auth.clone().ok_or_else(|| {
                    TrackerError::Launch("no record store credentials are configured".to_string())
                })?;

                Arc::new(XapiRecordStore::new(LrsCredentials {
                    endpoint,
                    auth,
                    extended: Self::extended_params(env),
                })?)
            }
        };

        let course = self.registry.course();
        let mut session = SessionState {
            is_initialised: false,
            activity_id: resolved.activity_id,
            actor: resolved.actor,
            registration: resolved.registration,
            lang: config.lang.clone().unwrap_or_else(|| DEFAULT_LANG.to_string()),
            display_lang: env.default_language.clone(),
            generate_ids: config.generate_ids,
            should_track_state: config.should_track_state(),
            should_use_registration: resolved.should_use_registration,
            component_blacklist: config.component_blacklist.normalized(),
            course_title: course.title,
            course_description: course.description,
            start_timestamp: Utc::now(),
            attempt_duration_baseline_ms: 0,
            is_complete: false,
            is_terminated: false,
        };

        let dispatcher = Dispatcher::new(
            store.clone(),
            self.sink.clone(),
            self.failures.clone(),
            interceptor,
            http,
            resolved.endpoint.clone(),
            env.page_url.clone(),
        );

        // Send the 'launched' and 'initialized' statements; both must be
        // accepted before anything else happens.
        dispatcher
            .send_many(vec![
                statements::course_statement(&session, VerbKey::Launched, Default::default()),
                statements::course_statement(&session, VerbKey::Initialized, Default::default()),
            ])
            .await?;

        let cmi5_session = if resolved.is_cmi5 {
            let loaded =
                cmi5::load_session(store.as_ref(), &session.state_key(), &session.actor).await?;
            cmi5::apply_mastery_score(&loaded, self.registry.as_ref());
            Some(loaded)
        } else {
            None
        };

        let sync = Arc::new(StateSynchronizer::new(
            store,
            self.sink.clone(),
            self.failures.clone(),
            session.state_key(),
        ));

        if session.should_track_state {
            // Retrieve the course state. The attempt/resume decision happens
            // exactly once, only after the full snapshot fetch completes.
            let snapshot = sync.fetch_all().await?;
            self.sink.emit(TrackerEvent::StateLoaded);

            if let Some(baseline) = snapshot
                .course
                .as_ref()
                .and_then(|course| course.get("_totalDuration"))
                .and_then(Value::as_i64)
            {
                session.attempt_duration_baseline_ms = baseline;
            }

            let decision = if snapshot.is_empty() {
                // This is a new attempt.
                VerbKey::Attempted
            } else {
                // This is a continuation of an existing attempt.
                VerbKey::Resumed
            };
            dispatcher
                .send(statements::course_statement(
                    &session,
                    decision,
                    Default::default(),
                ))
                .await?;

            sync.restore(self.registry.as_ref());
        }

        self.storage
            .bind(sync.clone(), session.actor.clone(), session.should_track_state);

        session.is_initialised = true;

        Ok(Active {
            session,
            dispatcher,
            sync,
            cmi5: cmi5_session,
        })
    }

    async fn resolve_launch(
        config: &TrackingConfig,
        env: &LaunchEnvironment,
        http: &reqwest::Client,
        need_token: bool,
    ) -> TrackerResult<ResolvedLaunch> {
        if config.profile == Some(SpecificationProfile::Cmi5) {
            let params = cmi5::launch_parameters(env)?;

            let auth = if need_token {
                let token = cmi5::fetch_auth_token(http, &params.fetch_url).await?;
                Some(format!("Basic {token}"))
            } else {
                None
            };

            return Ok(ResolvedLaunch {
                activity_id: params.activity_id,
                actor: params.actor,
                registration: params.registration,
                endpoint: Some(Url::parse(&params.endpoint)?),
                auth,
                // cmi5 state documents are always scoped to the registration.
                should_use_registration: true,
                is_cmi5: true,
            });
        }

        let (endpoint, auth) = match config.normalized_endpoint() {
            // The endpoint has been defined in the config, so use the
            // static values.
            Some(endpoint) => {
                let auth = match (&config.user, &config.password) {
                    (Some(user), Some(password)) => Some(basic_auth(user, password)),
                    _ => None,
                };
                (Some(endpoint), auth)
            }
            // Otherwise check whether the configuration was passed on the
            // launch URL.
            None => {
                let endpoint = env.query_param("endpoint").map(|mut endpoint| {
                    if !endpoint.ends_with('/') {
                        endpoint.push('/');
                    }
                    endpoint
                });
                (endpoint, env.query_param("auth"))
            }
        };

        let endpoint = endpoint.map(|e| Url::parse(&e)).transpose()?;

        let actor = env
            .query_param("actor")
            .and_then(|json| serde_json::from_str::<Value>(&json).ok())
            .and_then(|value| Actor::from_launch_value(&value))
            .unwrap_or_default();

        let activity_id = config
            .activity_id
            .clone()
            .or_else(|| env.query_param("activity_id"))
            .unwrap_or_else(|| {
                let url = env.base_activity_id();
                info!("Using detected URL ({url}) as the activity id");
                url
            });

        let registration = env
            .query_param("registration")
            .and_then(|value| Uuid::parse_str(&value).ok());

        Ok(ResolvedLaunch {
            activity_id,
            actor,
            registration,
            endpoint,
            auth,
            should_use_registration: config.should_use_registration,
            is_cmi5: false,
        })
    }

    /// LMS-specified query parameters beyond the launch set, forwarded on
    /// the terminal transport's POST URL.
    fn extended_params(env: &LaunchEnvironment) -> Vec<(String, String)> {
        env.page_url
            .query_pairs()
            .filter(|(key, _)| !KNOWN_LAUNCH_PARAMS.contains(&key.as_ref()))
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect()
    }

    //=====================================================================================
    // Content Events
    //=====================================================================================

    fn active_parts(
        &self,
    ) -> Option<(SessionState, Dispatcher, Arc<StateSynchronizer>, Option<Cmi5Session>)> {
        if self.status() != LifecycleStatus::Initialized {
            return None;
        }

        let active = self.active.lock().expect("controller poisoned");
        active.as_ref().map(|active| {
            (
                active.session.clone(),
                active.dispatcher.clone(),
                active.sync.clone(),
                active.cmi5.clone(),
            )
        })
    }

    /// Handles one content event from the host runtime.
    ///
    /// Events arriving before initialization (or after a failed one) are
    /// dropped with a warning; gating per event kind follows the
    /// `_coreEvents` map built at startup.
    pub async fn handle_event(&self, event: ContentEvent) {
        let Some((session, dispatcher, sync, cmi5_session)) = self.active_parts() else {
            warn!("Unable to handle content events before tracking is initialized");
            return;
        };

        match event {
            ContentEvent::ItemExperienced { item } => {
                let enabled = match item.kind {
                    ContentKind::Menu => self.core_events.menu_visited,
                    ContentKind::Page => self.core_events.page_visited,
                    // Only menu and page visits are tracked as experiences.
                    _ => false,
                };
                if !enabled {
                    return;
                }

                let _ = dispatcher
                    .send(statements::experience_statement(&session, &item))
                    .await;
            }

            ContentEvent::InteractionRecorded { interaction } => {
                if !self.core_events.interactions || !interaction.item.is_question {
                    return;
                }

                if let Some(component) = &interaction.item.component {
                    // This component is on the blacklist, so do not send a
                    // statement.
                    if session.is_blacklisted(component) {
                        return;
                    }
                }

                let mut statement = statements::answered_statement(&session, &interaction);

                let page = self.find_page(&interaction.item);
                let parent = interaction
                    .item
                    .is_part_of_assessment
                    .then(|| interaction.item.assessment_id.as_deref())
                    .flatten()
                    .map(|id| statements::assessment_activity(&session, id));

                statements::add_grouping(
                    &session,
                    &mut statement,
                    ContentKind::Component,
                    page.as_ref(),
                    parent,
                );

                let _ = dispatcher.send(statement).await;
            }

            ContentEvent::ItemCompleted { item, is_complete } => {
                // The item is not actually completed, e.g. it may have been
                // reset.
                if !is_complete {
                    return;
                }

                if !self.core_events.completion_enabled(item.kind) {
                    return;
                }

                // A question's 'answered' statement already encodes its
                // completion; do not record it twice.
                if item.kind == ContentKind::Component
                    && item.is_question
                    && self.core_events.interactions
                    && self.core_events.components_complete
                {
                    return;
                }

                if item.kind == ContentKind::Component {
                    if let Some(component) = &item.component {
                        if session.is_blacklisted(component) {
                            return;
                        }
                    }
                }

                let mut statement = statements::completed_statement(&session, &item);
                let page = self.find_page(&item);
                statements::add_grouping(&session, &mut statement, item.kind, page.as_ref(), None);

                let _ = dispatcher.send(statement).await;
            }

            ContentEvent::AssessmentCompleted { outcome } => {
                if !self.core_events.assessments_complete {
                    return;
                }

                let lesson = self.registry.find(&outcome.page_id);
                let statement =
                    statements::assessment_statement(&session, &outcome, lesson.as_ref());

                // Delay so that component completion can be recorded before
                // assessment completion.
                tokio::spawn(async move {
                    tokio::time::sleep(ASSESSMENT_DISPATCH_DELAY).await;
                    let _ = dispatcher.send(statement).await;
                });
            }

            ContentEvent::CourseCompleted { status, assessment } => {
                let session = {
                    let mut active = self.active.lock().expect("controller poisoned");
                    let Some(active) = active.as_mut() else { return };
                    active.session.is_complete = true;
                    active.session.clone()
                };

                match &cmi5_session {
                    Some(cmi5_session) => {
                        self.send_cmi5_completion(
                            &session,
                            &dispatcher,
                            cmi5_session,
                            status,
                            assessment.as_ref().map(statements::assessment_result),
                        )
                        .await;
                    }
                    None => {
                        let _ = dispatcher
                            .send(statements::course_completion_statement(
                                &session,
                                status,
                                assessment.as_ref(),
                            ))
                            .await;
                    }
                }
            }

            ContentEvent::StateChanged {
                collection,
                id,
                state,
            } => {
                if !session.should_track_state {
                    return;
                }

                let entry = if collection.is_singleton() {
                    state
                } else {
                    // List entries carry their id so the upsert can match.
                    let mut entry = match state {
                        Value::Object(map) => map,
                        other => {
                            let mut map = serde_json::Map::new();
                            map.insert("_state".to_string(), other);
                            map
                        }
                    };
                    entry
                        .entry("_id".to_string())
                        .or_insert_with(|| Value::String(id));
                    Value::Object(entry)
                };

                sync.upsert(collection, entry).await;
            }

            ContentEvent::LanguageChanged { lang } => {
                let session = {
                    let mut active = self.active.lock().expect("controller poisoned");
                    let Some(active) = active.as_mut() else { return };
                    active.session.display_lang = lang;
                    active.session.clone()
                };

                // A language change counts as a new attempt, so reset the
                // remote state before relaunching.
                if session.should_track_state {
                    if let Err(cause) = sync.delete_all().await {
                        error!("failed to reset state for the new attempt: {cause}");
                        return;
                    }
                }

                let _ = dispatcher
                    .send(statements::course_statement(
                        &session,
                        VerbKey::Launched,
                        Default::default(),
                    ))
                    .await;
            }

            ContentEvent::UserExited => {
                if let Some(url) = cmi5_session.as_ref().and_then(|c| {
                    c.return_url().map(String::from)
                }) {
                    self.sink.emit(TrackerEvent::ExitRequested { url });
                }
            }
        }
    }

    async fn send_cmi5_completion(
        &self,
        session: &SessionState,
        dispatcher: &Dispatcher,
        cmi5_session: &Cmi5Session,
        status: CompletionStatus,
        assessment_result: Option<StatementResult>,
    ) {
        let (verb, result) = match status {
            CompletionStatus::Passed => (VerbKey::Passed, assessment_result.unwrap_or_default()),
            CompletionStatus::Failed => (VerbKey::Failed, assessment_result.unwrap_or_default()),
            CompletionStatus::Completed => (
                VerbKey::Completed,
                StatementResult {
                    completion: Some(true),
                    ..StatementResult::default()
                },
            ),
        };

        match cmi5::defined_statement(session, cmi5_session, verb, result) {
            Ok(statement) => {
                let _ = dispatcher.send(statement).await;
            }
            Err(cause) => {
                error!("cmi5 completion statement could not be built: {cause}");
                return;
            }
        }

        // The move-on rule may require an additional synthetic 'completed'
        // statement; it is evaluated after every pass/fail/complete event.
        if cmi5::move_on_requires_completed(cmi5_session.move_on(), verb) {
            let completion = StatementResult {
                completion: Some(true),
                ..StatementResult::default()
            };

            match cmi5::defined_statement(session, cmi5_session, VerbKey::Completed, completion) {
                Ok(statement) => {
                    let _ = dispatcher.send(statement).await;
                }
                Err(cause) => error!("cmi5 move-on statement could not be built: {cause}"),
            }
        }
    }

    fn find_page(&self, item: &ContentItem) -> Option<ContentItem> {
        item.page_id
            .as_deref()
            .and_then(|id| self.registry.find(id))
    }

    //=====================================================================================
    // Session Boundary
    //=====================================================================================

    /// Reacts to the page visibility changing. Hiding the page suspends and
    /// terminates the session; re-entering visibility re-arms it with a
    /// `resumed` statement.
    pub async fn visibility_changed(&self, visible: bool) {
        if !visible {
            self.suspend_and_terminate();
            return;
        }

        let resumed = {
            let mut status = self.status.lock().expect("controller poisoned");
            if !matches!(
                *status,
                LifecycleStatus::Initialized | LifecycleStatus::Terminated
            ) {
                return;
            }
            *status = LifecycleStatus::Initialized;

            let mut active = self.active.lock().expect("controller poisoned");
            active.as_mut().map(|active| {
                active.session.is_terminated = false;
                (active.session.clone(), active.dispatcher.clone())
            })
        };

        if let Some((session, dispatcher)) = resumed {
            let _ = dispatcher
                .send(statements::course_statement(
                    &session,
                    VerbKey::Resumed,
                    Default::default(),
                ))
                .await;
        }
    }

    /// Sends the terminal statements: `suspended` while the course is not
    /// complete, then always `terminated` with the session-only duration.
    ///
    /// Uses the best-effort synchronous transport so termination survives
    /// the page unloading; repeat triggers are no-ops once terminated.
    pub fn suspend_and_terminate(&self) {
        let parts = {
            let mut status = self.status.lock().expect("controller poisoned");
            if *status != LifecycleStatus::Initialized {
                return;
            }

            let mut active = self.active.lock().expect("controller poisoned");
            let Some(active) = active.as_mut() else {
                return;
            };
            if active.session.is_terminated {
                return;
            }

            *status = LifecycleStatus::Terminating;
            active.session.is_terminated = true;
            (active.session.clone(), active.dispatcher.clone())
        };

        let (session, dispatcher) = parts;
        let mut statements_to_send = Vec::new();

        if !session.is_complete {
            // If the course is still in progress, send the 'suspended' verb.
            statements_to_send.push(statements::course_statement(
                &session,
                VerbKey::Suspended,
                Default::default(),
            ));
        }

        // Always send the 'terminated' verb.
        statements_to_send.push(statements::course_statement(
            &session,
            VerbKey::Terminated,
            Default::default(),
        ));

        dispatcher.send_terminal(statements_to_send);
        self.set_status(LifecycleStatus::Terminated);
    }

    /// The hard unload path: terminate the session and abort whatever
    /// ordinary sends are still in flight.
    pub fn page_unload(&self) {
        self.suspend_and_terminate();

        let dispatcher = {
            let active = self.active.lock().expect("controller poisoned");
            active.as_ref().map(|active| active.dispatcher.clone())
        };

        if let Some(dispatcher) = dispatcher {
            dispatcher.abort_inflight();
        }
    }
}

fn basic_auth(user: &str, password: &str) -> String {
    use base64::Engine;

    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"))
    )
}
