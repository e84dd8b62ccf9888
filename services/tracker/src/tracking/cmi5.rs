//! services/tracker/src/tracking/cmi5.rs
//!
//! The cmi5 profile extension: launch-parameter bootstrap with a token
//! exchange, launch-data and learner-preference reads, mastery-score
//! propagation, and the profile-defined statements with their move-on rules.

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;
use xapi_core::domain::{
    Activity, Actor, AssessmentThresholds, Context, StateKey, Statement, StatementResult,
    ThresholdTarget,
};
use xapi_core::duration::encode_iso8601_duration;
use xapi_core::ports::{ContentRegistry, RecordStore};
use xapi_core::verbs::VerbKey;

use crate::config::LaunchEnvironment;
use crate::error::{TrackerError, TrackerResult};
use crate::tracking::session::SessionState;
use crate::tracking::statements::course_activity;

pub const CMI5_CATEGORY: &str = "https://w3id.org/xapi/cmi5/context/categories/cmi5";
pub const MOVE_ON_CATEGORY: &str = "https://w3id.org/xapi/cmi5/context/categories/moveon";
pub const MASTERY_SCORE_EXTENSION: &str =
    "https://w3id.org/xapi/cmi5/context/extensions/masteryscore";

/// The state document and agent profile ids the cmi5 specification reserves.
pub const LAUNCH_DATA_STATE_ID: &str = "LMS.LaunchData";
pub const LEARNER_PREFERENCES_PROFILE_ID: &str = "cmi5LearnerPreferences";

//=========================================================================================
// Launch Parameters and Token Exchange
//=========================================================================================

/// The launch parameters a cmi5 LMS appends to the course URL.
#[derive(Debug, Clone)]
pub struct Cmi5LaunchParameters {
    pub endpoint: String,
    pub fetch_url: String,
    pub activity_id: String,
    pub actor: Actor,
    pub registration: Option<Uuid>,
}

fn required_param(env: &LaunchEnvironment, name: &'static str) -> TrackerResult<String> {
    env.query_param(name)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| TrackerError::Launch(format!("missing cmi5 launch parameter \"{name}\"")))
}

/// Reads the cmi5 launch parameters from the page URL.
pub fn launch_parameters(env: &LaunchEnvironment) -> TrackerResult<Cmi5LaunchParameters> {
    let mut endpoint = required_param(env, "endpoint")?;
    if !endpoint.ends_with('/') {
        endpoint.push('/');
    }

    let fetch_url = required_param(env, "fetch")?;
    let activity_id = required_param(env, "activityId")?;

    // The actor arrives URL-encoded; query_pairs has already decoded it.
    let actor_json: Value = serde_json::from_str(&required_param(env, "actor")?)?;
    let actor = Actor::from_launch_value(&actor_json)
        .filter(Actor::has_identity)
        .ok_or_else(|| TrackerError::Launch("cmi5 actor is not identifiable".to_string()))?;

    let registration = env
        .query_param("registration")
        .and_then(|value| Uuid::parse_str(&value).ok());

    Ok(Cmi5LaunchParameters {
        endpoint,
        fetch_url,
        activity_id,
        actor,
        registration,
    })
}

/// Exchanges the one-time fetch URL for an authorization token with a single
/// POST, as the specification requires.
pub async fn fetch_auth_token(http: &reqwest::Client, fetch_url: &str) -> TrackerResult<String> {
    let url = Url::parse(fetch_url)?;
    let response = http.post(url).send().await?.error_for_status()?;
    let body: Value = response.json().await?;

    body.get("auth-token")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| {
            TrackerError::Launch("token exchange response is missing \"auth-token\"".to_string())
        })
}

//=========================================================================================
// Launch Data
//=========================================================================================

/// How much of the course must be done before the LMS will let the learner
/// move on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOn {
    Completed,
    Passed,
    CompletedAndPassed,
    CompletedOrPassed,
}

impl MoveOn {
    fn from_str(value: &str) -> Option<Self> {
        match value {
            "Completed" => Some(MoveOn::Completed),
            "Passed" => Some(MoveOn::Passed),
            "CompletedAndPassed" => Some(MoveOn::CompletedAndPassed),
            "CompletedOrPassed" => Some(MoveOn::CompletedOrPassed),
            _ => None,
        }
    }
}

/// The cmi5 session data fetched after `initialized`.
#[derive(Debug, Clone, Default)]
pub struct Cmi5Session {
    pub launch_data: Value,
}

impl Cmi5Session {
    pub fn mastery_score(&self) -> Option<f64> {
        match self.launch_data.get("masteryScore")? {
            Value::Number(number) => number.as_f64(),
            Value::String(text) if !text.is_empty() => text.parse().ok(),
            _ => None,
        }
    }

    pub fn move_on(&self) -> Option<MoveOn> {
        self.launch_data
            .get("moveOn")
            .and_then(Value::as_str)
            .and_then(MoveOn::from_str)
    }

    pub fn return_url(&self) -> Option<&str> {
        self.launch_data.get("returnURL").and_then(Value::as_str)
    }
}

/// Fetches the launch-data state document and the learner-preferences agent
/// profile. Both reads are best-effort: a missing document defaults to empty.
pub async fn load_session(
    store: &dyn RecordStore,
    key: &StateKey,
    actor: &Actor,
) -> TrackerResult<Cmi5Session> {
    let launch_data = store
        .get_state(key, LAUNCH_DATA_STATE_ID)
        .await?
        .unwrap_or_default();

    // Not currently using the agent profile data in the course, but it is a
    // cmi5 requirement to fetch it before sending statements.
    let agent_profile = store
        .get_agent_profile(actor, LEARNER_PREFERENCES_PROFILE_ID)
        .await?;
    info!("Agent profile: {:?}", agent_profile);

    Ok(Cmi5Session { launch_data })
}

/// Propagates an LMS mastery score into the course's percentage-based
/// passing thresholds. With exactly one scored assessment in the course the
/// same thresholds are applied to that assessment as well.
pub fn apply_mastery_score(cmi5: &Cmi5Session, registry: &dyn ContentRegistry) {
    let Some(mastery_score) = cmi5.mastery_score() else {
        return;
    };

    if !registry.passing_is_percentage_based() {
        return;
    }

    let thresholds = AssessmentThresholds::uniform(mastery_score * 100.0);
    registry.set_thresholds(&ThresholdTarget::Course, thresholds);

    let assessments = registry.assessment_ids();
    if let [only] = assessments.as_slice() {
        registry.set_thresholds(&ThresholdTarget::Assessment(only.clone()), thresholds);
    }

    debug!(
        "passing thresholds set to {} from the LMS mastery score",
        mastery_score * 100.0
    );
}

//=========================================================================================
// Defined Statements and Move-On Rules
//=========================================================================================

fn defined_context(session: &SessionState, cmi5: &Cmi5Session, verb: VerbKey) -> Context {
    let mut context = Context {
        registration: session.registration,
        ..Context::default()
    };

    context
        .context_activities
        .category
        .push(Activity::new(CMI5_CATEGORY));

    let move_on_applies = matches!(
        verb,
        VerbKey::Passed | VerbKey::Failed | VerbKey::Completed
    );
    if move_on_applies && cmi5.move_on().is_some() {
        context
            .context_activities
            .category
            .push(Activity::new(MOVE_ON_CATEGORY));
    }

    if matches!(verb, VerbKey::Passed | VerbKey::Failed) {
        if let Some(mastery_score) = cmi5.mastery_score() {
            let mut extensions = serde_json::Map::new();
            extensions.insert(MASTERY_SCORE_EXTENSION.to_string(), mastery_score.into());
            context.extensions = Some(extensions);
        }
    }

    context
}

/// A cmi5-defined statement about the course, with the profile's duration
/// rules and context categories.
pub fn defined_statement(
    session: &SessionState,
    cmi5: &Cmi5Session,
    verb: VerbKey,
    mut result: StatementResult,
) -> TrackerResult<Statement> {
    match verb {
        VerbKey::Initialized => {}
        VerbKey::Failed | VerbKey::Passed => {
            // The profile forbids completion on pass/fail statements.
            result.completion = None;
            result.duration = Some(encode_iso8601_duration(session.attempt_duration_ms()));
        }
        VerbKey::Completed => {
            result.duration = Some(encode_iso8601_duration(session.attempt_duration_ms()));
        }
        VerbKey::Terminated => {
            result.duration = Some(encode_iso8601_duration(session.session_duration_ms()));
        }
        other => {
            return Err(TrackerError::Internal(format!(
                "verb {:?} is not a cmi5 defined verb",
                other
            )));
        }
    }

    let mut statement = Statement::new(
        session.actor.clone(),
        verb.resolved(&session.lang),
        course_activity(session),
    );

    if !result.is_empty() {
        statement.result = Some(result);
    }

    statement.context = Some(defined_context(session, cmi5, verb));
    statement.timestamp = Some(Utc::now());

    if session.generate_ids {
        statement.id = Some(Uuid::new_v4());
    }

    Ok(statement)
}

/// Decides whether the move-on rule demands an extra synthetic `completed`
/// statement after the given completion verb. Evaluated after every
/// pass/fail/complete event, not only once.
pub fn move_on_requires_completed(move_on: Option<MoveOn>, verb: VerbKey) -> bool {
    match move_on {
        Some(MoveOn::CompletedOrPassed) => verb == VerbKey::Failed,
        Some(MoveOn::Completed) => verb != VerbKey::Completed,
        Some(MoveOn::CompletedAndPassed) => verb == VerbKey::Passed,
        _ => false,
    }
}
