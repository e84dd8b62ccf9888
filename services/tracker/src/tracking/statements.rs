//! services/tracker/src/tracking/statements.rs
//!
//! Pure construction of tracking statements, one function per event kind.
//! Shared helpers build the object, result and context pieces; nothing in
//! this module performs I/O.

use uuid::Uuid;
use xapi_core::domain::{
    Activity, ActivityDefinition, ActivityKind, AssessmentOutcome, CompletionStatus, ContentItem,
    ContentKind, Context, InteractionKind, LanguageMap, QuestionInteraction, Score, Statement,
    StatementResult, Verb,
};
use xapi_core::duration::encode_iso8601_duration;
use xapi_core::verbs::VerbKey;

use crate::error::{TrackerError, TrackerResult};
use crate::tracking::session::SessionState;

//=========================================================================================
// IRIs and Activities
//=========================================================================================

/// The IRI of a non-course entity, derived from the base activity id.
pub fn entity_iri(activity_id: &str, entity_id: &str) -> String {
    format!("{activity_id}#/id/{entity_id}")
}

/// The IRI of a synthetic assessment activity.
pub fn assessment_iri(activity_id: &str, assessment_key: &str) -> String {
    format!("{activity_id}#/assessment/{assessment_key}")
}

fn name_map(session: &SessionState, text: &str) -> LanguageMap {
    LanguageMap::single(&session.display_lang, text)
}

/// The activity representing the course itself; its IRI is the base activity
/// id, unmodified.
pub fn course_activity(session: &SessionState) -> Activity {
    let mut definition = ActivityDefinition {
        kind: Some(ActivityKind::Course.iri().to_string()),
        name: name_map(session, &session.course_title),
        ..ActivityDefinition::default()
    };

    if !session.course_description.is_empty() {
        definition.description = Some(name_map(session, &session.course_description));
    }

    Activity::with_definition(session.activity_id.clone(), definition)
}

/// The activity for a content entity, typed by its kind.
pub fn item_activity(session: &SessionState, item: &ContentItem) -> Activity {
    Activity::with_definition(
        entity_iri(&session.activity_id, &item.id),
        ActivityDefinition {
            kind: Some(item.kind.activity_kind(item.is_question).iri().to_string()),
            name: name_map(session, item.name()),
            ..ActivityDefinition::default()
        },
    )
}

/// The lesson activity for a page, used as a grouping for its descendants.
pub fn lesson_activity(session: &SessionState, page: &ContentItem) -> Activity {
    Activity::with_definition(
        entity_iri(&session.activity_id, &page.id),
        ActivityDefinition {
            kind: Some(ActivityKind::Lesson.iri().to_string()),
            name: name_map(session, page.name()),
            ..ActivityDefinition::default()
        },
    )
}

/// The synthetic activity representing a scored assessment.
pub fn assessment_activity(session: &SessionState, assessment_key: &str) -> Activity {
    Activity::with_definition(
        assessment_iri(&session.activity_id, assessment_key),
        ActivityDefinition {
            kind: Some(ActivityKind::Assessment.iri().to_string()),
            name: name_map(session, assessment_key),
            ..ActivityDefinition::default()
        },
    )
}

//=========================================================================================
// Shared Pieces
//=========================================================================================

/// Resolves a verb key (case-insensitive) to its single-language verb.
/// Unknown keys are an error, not a silent no-op.
pub fn resolve_verb(session: &SessionState, key: &str) -> TrackerResult<Verb> {
    match VerbKey::from_key(key) {
        Some(verb) => Ok(verb.resolved(&session.lang)),
        None => Err(TrackerError::Internal(format!(
            "Verb \"{key}\" does not exist in the verb registry"
        ))),
    }
}

fn build_statement(
    session: &SessionState,
    verb: Verb,
    object: Activity,
    result: StatementResult,
    context: Option<Context>,
) -> Statement {
    let mut statement = Statement::new(session.actor.clone(), verb, object);

    if !result.is_empty() {
        statement.result = Some(result);
    }

    if let Some(context) = context {
        if !context.is_empty() {
            statement.context = Some(context);
        }
    }

    if session.generate_ids {
        statement.id = Some(Uuid::new_v4());
    }

    statement
}

/// Adds the grouping and/or parent activities to a statement's context.
///
/// Every non-course object is grouped by the course; articles, blocks and
/// components are additionally grouped by their containing lesson. A question
/// component that is part of a scored assessment gets that assessment as its
/// parent rather than the lesson.
pub fn add_grouping(
    session: &SessionState,
    statement: &mut Statement,
    kind: ContentKind,
    page: Option<&ContentItem>,
    parent_assessment: Option<Activity>,
) {
    statement.add_grouping_activity(course_activity(session));

    if matches!(
        kind,
        ContentKind::Article | ContentKind::Block | ContentKind::Component
    ) {
        if let Some(page) = page {
            statement.add_grouping_activity(lesson_activity(session, page));
        }
    }

    if let Some(assessment) = parent_assessment {
        statement.add_parent_activity(assessment);
    }
}

/// Takes an assessment outcome and returns a result object based on it.
pub fn assessment_result(outcome: &AssessmentOutcome) -> StatementResult {
    StatementResult {
        score: Some(Score {
            scaled: Some(outcome.score_as_percent / 100.0),
            raw: Some(outcome.score),
            min: Some(0.0),
            max: Some(outcome.max_score),
        }),
        success: Some(outcome.is_pass),
        completion: Some(outcome.is_complete),
        ..StatementResult::default()
    }
}

/// Reformats a raw component response into the wire-format escapes.
///
/// Choice responses swap the `,`/`#` separators for `[,]`; matching
/// responses turn `source#target` pairs into 1-indexed `n[.]target` tokens.
pub fn normalize_response(kind: InteractionKind, response: &str) -> String {
    match kind {
        InteractionKind::Choice => response.replace(['#', ','], "[,]"),
        InteractionKind::Matching => response
            .split(',')
            .enumerate()
            .map(|(index, pair)| {
                let target = pair.split_once('#').map(|(_, t)| t).unwrap_or(pair);
                format!("{}[.]{}", index + 1, target.replace('.', "_"))
            })
            .collect::<Vec<_>>()
            .join("[,]"),
        _ => response.to_string(),
    }
}

//=========================================================================================
// Statement Construction (One Function per Event Kind)
//=========================================================================================

/// A statement about the course object itself, with the duration rules the
/// session verbs require.
pub fn course_statement(
    session: &SessionState,
    verb: VerbKey,
    mut result: StatementResult,
) -> Statement {
    let object = course_activity(session);

    // Append the duration.
    match verb {
        VerbKey::Launched | VerbKey::Initialized | VerbKey::Attempted => {
            result.duration = Some("PT0S".to_string());
        }
        VerbKey::Failed | VerbKey::Passed | VerbKey::Suspended => {
            result.duration = Some(encode_iso8601_duration(session.attempt_duration_ms()));
        }
        VerbKey::Terminated => {
            result.duration = Some(encode_iso8601_duration(session.session_duration_ms()));
        }
        _ => {}
    }

    build_statement(session, verb.resolved(&session.lang), object, result, None)
}

/// An `experienced` statement for a visited menu or page.
pub fn experience_statement(session: &SessionState, item: &ContentItem) -> Statement {
    let mut statement = build_statement(
        session,
        VerbKey::Experienced.resolved(&session.lang),
        item_activity(session, item),
        StatementResult::default(),
        None,
    );

    add_grouping(session, &mut statement, item.kind, None, None);
    statement
}

/// An `answered` statement for a recorded question interaction.
pub fn answered_statement(session: &SessionState, interaction: &QuestionInteraction) -> Statement {
    let item = &interaction.item;
    let mut definition = ActivityDefinition {
        kind: Some(ActivityKind::Question.iri().to_string()),
        name: name_map(session, item.name()),
        interaction_type: Some(interaction.interaction_type),
        ..ActivityDefinition::default()
    };

    if let Some(description) = &item.description {
        definition.description = Some(name_map(session, description));
    }

    let object = Activity::with_definition(entity_iri(&session.activity_id, &item.id), definition);

    let result = StatementResult {
        score: Some(Score {
            raw: Some(interaction.score),
            ..Score::default()
        }),
        success: interaction.is_correct,
        completion: Some(interaction.is_complete),
        response: Some(normalize_response(
            interaction.interaction_type,
            &interaction.response,
        )),
        ..StatementResult::default()
    };

    build_statement(
        session,
        VerbKey::Answered.resolved(&session.lang),
        object,
        result,
        None,
    )
}

/// A `completed` statement for a generic content entity.
pub fn completed_statement(session: &SessionState, item: &ContentItem) -> Statement {
    build_statement(
        session,
        VerbKey::Completed.resolved(&session.lang),
        item_activity(session, item),
        StatementResult {
            completion: Some(true),
            ..StatementResult::default()
        },
        None,
    )
}

/// A `passed`/`failed` statement for a scored assessment, grouped by the
/// course and its containing lesson.
pub fn assessment_statement(
    session: &SessionState,
    outcome: &AssessmentOutcome,
    lesson: Option<&ContentItem>,
) -> Statement {
    let verb = if outcome.is_pass {
        VerbKey::Passed
    } else {
        VerbKey::Failed
    };

    let mut statement = build_statement(
        session,
        verb.resolved(&session.lang),
        assessment_activity(session, outcome.activity_key()),
        assessment_result(outcome),
        None,
    );

    statement.add_grouping_activity(course_activity(session));
    if let Some(lesson) = lesson {
        statement.add_grouping_activity(lesson_activity(session, lesson));
    }

    statement
}

/// The course-level completion statement: `passed`/`failed` carry the
/// assessment result, plain completion carries `completion: true`.
pub fn course_completion_statement(
    session: &SessionState,
    status: CompletionStatus,
    assessment: Option<&AssessmentOutcome>,
) -> Statement {
    let (verb, result) = match status {
        CompletionStatus::Passed => (
            VerbKey::Passed,
            assessment.map(assessment_result).unwrap_or_default(),
        ),
        CompletionStatus::Failed => (
            VerbKey::Failed,
            assessment.map(assessment_result).unwrap_or_default(),
        ),
        CompletionStatus::Completed => (
            VerbKey::Completed,
            StatementResult {
                completion: Some(true),
                ..StatementResult::default()
            },
        ),
    };

    course_statement(session, verb, result)
}
