//! End-to-end behavior of the session lifecycle controller against
//! in-memory collaborators.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;
use serde_json::json;
use tracker_lib::tracking::lifecycle::{LifecycleStatus, TrackingController};
use xapi_core::domain::{
    AssessmentOutcome, CompletionStatus, InteractionKind, QuestionInteraction, StateCollection,
};
use xapi_core::events::ContentEvent;

#[tokio::test]
async fn fresh_attempt_emits_launched_initialized_attempted() {
    let fixture = Fixture::new();

    let controller = TrackingController::initialize(
        base_config(),
        environment(&launch_url()),
        fixture.collaborators(),
    )
    .await;

    assert_eq!(controller.status(), LifecycleStatus::Initialized);
    assert_eq!(fixture.store.verbs(), ["launched", "initialized", "attempted"]);

    // Nothing to restore from an empty snapshot.
    assert!(fixture.registry.applied.lock().unwrap().is_empty());

    let labels = fixture.sink.labels();
    assert!(labels.contains(&"stateLoaded".to_string()));
    assert!(labels.contains(&"initialize:success".to_string()));
    assert_eq!(fixture.notifier.alerts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn non_empty_snapshot_resumes_and_restores() {
    let fixture = Fixture::new();
    fixture.registry.insert(component("c-05", "mcq", true));

    let store = fixture.store.clone().with_state(
        "components",
        json!([
            {"_id": "c-05", "_isComplete": true},
            {"_id": "c-gone", "_isComplete": true}
        ]),
    );
    store
        .clone()
        .with_state("course", json!({"_totalDuration": 3_600_000}));

    let controller = TrackingController::initialize(
        base_config(),
        environment(&launch_url()),
        fixture.collaborators(),
    )
    .await;

    assert_eq!(controller.status(), LifecycleStatus::Initialized);
    assert_eq!(fixture.store.verbs(), ["launched", "initialized", "resumed"]);

    // The known component is restored; the removed one is skipped.
    assert_eq!(*fixture.registry.applied.lock().unwrap(), ["c-05"]);

    // The restored baseline flows into attempt durations at suspension.
    controller.suspend_and_terminate();
    let batches = fixture.store.terminal_verbs();
    assert_eq!(batches, [["suspended", "terminated"]]);

    let batch = &fixture.store.terminal_batches.lock().unwrap()[0];
    let suspended_duration = batch[0].result.as_ref().unwrap().duration.clone().unwrap();
    assert!(
        suspended_duration.starts_with("PT1H"),
        "expected the attempt baseline in {suspended_duration}"
    );
    let terminated_duration = batch[1].result.as_ref().unwrap().duration.clone().unwrap();
    assert!(
        terminated_duration.starts_with("PT0"),
        "terminated must carry the session-only duration, got {terminated_duration}"
    );
}

#[tokio::test]
async fn attempt_decision_reacts_to_any_collection() {
    let fixture = Fixture::new();
    fixture
        .store
        .clone()
        .with_state("articles", json!([{"_id": "a-05"}]));

    TrackingController::initialize(
        base_config(),
        environment(&launch_url()),
        fixture.collaborators(),
    )
    .await;

    assert_eq!(fixture.store.verbs(), ["launched", "initialized", "resumed"]);
}

#[tokio::test]
async fn missing_actor_fails_initialization_without_blocking() {
    let fixture = Fixture::new();

    // No actor launch parameter on the page URL.
    let controller = TrackingController::initialize(
        base_config(),
        environment(PAGE_URL),
        fixture.collaborators(),
    )
    .await;

    assert_eq!(controller.status(), LifecycleStatus::Failed);
    assert!(fixture.store.verbs().is_empty());
    assert!(fixture
        .sink
        .labels()
        .contains(&"initialize:error".to_string()));
    assert_eq!(fixture.notifier.alerts.load(Ordering::SeqCst), 1);

    // Content events after a failed bootstrap are dropped quietly.
    controller
        .handle_event(ContentEvent::ItemCompleted {
            item: component("c-05", "mcq", false),
            is_complete: true,
        })
        .await;
    assert!(fixture.store.verbs().is_empty());
}

#[tokio::test]
async fn failure_notification_respects_ignore_behaviour() {
    let fixture = Fixture::new();
    let mut config = base_config();
    config.lrs_failure_behaviour = Some("ignore".to_string());

    let controller =
        TrackingController::initialize(config, environment(PAGE_URL), fixture.collaborators())
            .await;

    assert_eq!(controller.status(), LifecycleStatus::Failed);
    assert_eq!(fixture.notifier.alerts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn disabled_state_tracking_skips_the_snapshot() {
    let fixture = Fixture::new();
    let mut config = base_config();
    config.should_track_state = Some(false);

    let controller = TrackingController::initialize(
        config,
        environment(&launch_url()),
        fixture.collaborators(),
    )
    .await;

    assert_eq!(controller.status(), LifecycleStatus::Initialized);
    assert_eq!(fixture.store.verbs(), ["launched", "initialized"]);
    assert_eq!(fixture.store.state_reads.load(Ordering::SeqCst), 0);

    // State change events are ignored outright.
    controller
        .handle_event(ContentEvent::StateChanged {
            collection: StateCollection::Components,
            id: "c-05".to_string(),
            state: json!({"_isComplete": true}),
        })
        .await;
    assert!(fixture.store.state.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_initial_statement_send_fails_bootstrap() {
    let fixture = Fixture::new();
    fixture.store.fail_statements.store(true, Ordering::SeqCst);

    let controller = TrackingController::initialize(
        base_config(),
        environment(&launch_url()),
        fixture.collaborators(),
    )
    .await;

    assert_eq!(controller.status(), LifecycleStatus::Failed);
    // One alert per failure class: the failed send and the failed bootstrap.
    assert_eq!(fixture.notifier.alerts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unload_is_suspended_then_terminated_and_idempotent() {
    let fixture = Fixture::new();

    let controller = TrackingController::initialize(
        base_config(),
        environment(&launch_url()),
        fixture.collaborators(),
    )
    .await;

    controller.suspend_and_terminate();
    controller.suspend_and_terminate();

    assert_eq!(controller.status(), LifecycleStatus::Terminated);
    assert_eq!(fixture.store.terminal_verbs(), [["suspended", "terminated"]]);
}

#[tokio::test]
async fn completed_courses_are_not_suspended_at_unload() {
    let fixture = Fixture::new();

    let controller = TrackingController::initialize(
        base_config(),
        environment(&launch_url()),
        fixture.collaborators(),
    )
    .await;

    controller
        .handle_event(ContentEvent::CourseCompleted {
            status: CompletionStatus::Completed,
            assessment: None,
        })
        .await;
    controller.suspend_and_terminate();

    assert_eq!(fixture.store.terminal_verbs(), [["terminated"]]);
    let verbs = fixture.store.verbs();
    assert_eq!(verbs.last().map(String::as_str), Some("completed"));
}

#[tokio::test]
async fn hidden_then_visible_resumes_the_session() {
    let fixture = Fixture::new();

    let controller = TrackingController::initialize(
        base_config(),
        environment(&launch_url()),
        fixture.collaborators(),
    )
    .await;

    controller.visibility_changed(false).await;
    assert_eq!(controller.status(), LifecycleStatus::Terminated);

    controller.visibility_changed(true).await;
    assert_eq!(controller.status(), LifecycleStatus::Initialized);
    assert_eq!(fixture.store.verbs().last().map(String::as_str), Some("resumed"));

    // Termination is armed again after the resume.
    controller.visibility_changed(false).await;
    assert_eq!(fixture.store.terminal_verbs().len(), 2);
}

#[tokio::test]
async fn cross_origin_terminal_sends_fall_back_to_the_async_transport() {
    let fixture = Fixture::new();
    let mut config = base_config();
    config.endpoint = Some("http://lrs.elsewhere/data/xapi".to_string());

    let controller = TrackingController::initialize(
        config,
        environment(&launch_url()),
        fixture.collaborators(),
    )
    .await;

    controller.suspend_and_terminate();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(fixture.store.terminal_batches.lock().unwrap().is_empty());
    let verbs = fixture.store.verbs();
    assert!(verbs.ends_with(&["suspended".to_string(), "terminated".to_string()]));
}

#[tokio::test]
async fn language_change_starts_a_new_attempt() {
    let fixture = Fixture::new();
    fixture
        .store
        .clone()
        .with_state("components", json!([{"_id": "c-05"}]));

    let controller = TrackingController::initialize(
        base_config(),
        environment(&launch_url()),
        fixture.collaborators(),
    )
    .await;

    controller
        .handle_event(ContentEvent::LanguageChanged {
            lang: "fr-FR".to_string(),
        })
        .await;

    let mut deleted = fixture.store.deleted.lock().unwrap().clone();
    deleted.sort();
    assert_eq!(
        deleted,
        ["articles", "blocks", "components", "contentObjects", "course", "profileStore"]
    );
    assert_eq!(fixture.store.verbs().last().map(String::as_str), Some("launched"));
}

#[tokio::test]
async fn answered_and_completed_are_never_both_emitted() {
    let fixture = Fixture::new();
    fixture.registry.insert(page("co-05"));
    let question = component("c-05", "mcq", true);

    let controller = TrackingController::initialize(
        base_config(),
        environment(&launch_url()),
        fixture.collaborators(),
    )
    .await;

    controller
        .handle_event(ContentEvent::InteractionRecorded {
            interaction: QuestionInteraction {
                item: question.clone(),
                interaction_type: InteractionKind::Choice,
                response: "a,b#c".to_string(),
                score: 1.0,
                is_correct: Some(true),
                is_complete: true,
            },
        })
        .await;

    // The completion-change event for the same interaction is suppressed.
    controller
        .handle_event(ContentEvent::ItemCompleted {
            item: question,
            is_complete: true,
        })
        .await;

    let verbs = fixture.store.verbs();
    assert_eq!(verbs, ["launched", "initialized", "attempted", "answered"]);

    let statements = fixture.store.statements.lock().unwrap();
    let answered = statements.last().unwrap();
    let result = answered.result.as_ref().unwrap();
    assert_eq!(result.response.as_deref(), Some("a[,]b[,]c"));
    assert_eq!(result.completion, Some(true));

    // Grouped by the course and the containing lesson.
    let grouping = &answered
        .context
        .as_ref()
        .unwrap()
        .context_activities
        .grouping;
    assert_eq!(grouping.len(), 2);
}

#[tokio::test]
async fn blacklisted_components_send_no_statements() {
    let fixture = Fixture::new();

    let controller = TrackingController::initialize(
        base_config(),
        environment(&launch_url()),
        fixture.collaborators(),
    )
    .await;

    controller
        .handle_event(ContentEvent::ItemCompleted {
            item: component("c-07", "Graphic", false),
            is_complete: true,
        })
        .await;
    controller
        .handle_event(ContentEvent::InteractionRecorded {
            interaction: QuestionInteraction {
                item: component("c-08", "graphic", true),
                interaction_type: InteractionKind::Choice,
                response: "a".to_string(),
                score: 0.0,
                is_correct: Some(false),
                is_complete: true,
            },
        })
        .await;

    assert_eq!(fixture.store.verbs(), ["launched", "initialized", "attempted"]);
}

#[tokio::test]
async fn non_question_completions_are_recorded() {
    let fixture = Fixture::new();
    fixture.registry.insert(page("co-05"));

    let controller = TrackingController::initialize(
        base_config(),
        environment(&launch_url()),
        fixture.collaborators(),
    )
    .await;

    controller
        .handle_event(ContentEvent::ItemCompleted {
            item: component("c-09", "narrative", false),
            is_complete: true,
        })
        .await;
    // A reset back to incomplete is not a completion.
    controller
        .handle_event(ContentEvent::ItemCompleted {
            item: component("c-09", "narrative", false),
            is_complete: false,
        })
        .await;

    let verbs = fixture.store.verbs();
    assert_eq!(verbs.last().map(String::as_str), Some("completed"));
    assert_eq!(verbs.iter().filter(|verb| *verb == "completed").count(), 1);
}

#[tokio::test]
async fn assessment_statements_are_delayed_behind_item_completions() {
    let fixture = Fixture::new();
    fixture.registry.insert(page("co-05"));

    let controller = TrackingController::initialize(
        base_config(),
        environment(&launch_url()),
        fixture.collaborators(),
    )
    .await;

    controller
        .handle_event(ContentEvent::AssessmentCompleted {
            outcome: AssessmentOutcome {
                id: Some("quiz".to_string()),
                article_id: "a-05".to_string(),
                page_id: "co-05".to_string(),
                score: 9.0,
                max_score: 10.0,
                score_as_percent: 90.0,
                is_pass: true,
                is_complete: true,
            },
        })
        .await;

    // Component completions arriving within the delay window land first.
    controller
        .handle_event(ContentEvent::ItemCompleted {
            item: component("c-11", "narrative", false),
            is_complete: true,
        })
        .await;

    assert!(!fixture.store.verbs().contains(&"passed".to_string()));

    tokio::time::sleep(Duration::from_millis(700)).await;

    let verbs = fixture.store.verbs();
    assert_eq!(verbs.last().map(String::as_str), Some("passed"));
    let completed_at = verbs.iter().position(|verb| verb == "completed").unwrap();
    let passed_at = verbs.iter().position(|verb| verb == "passed").unwrap();
    assert!(completed_at < passed_at);

    let statements = fixture.store.statements.lock().unwrap();
    let passed = statements.last().unwrap();
    assert_eq!(passed.object.id, "http://x/course#/assessment/quiz");
    let score = passed.result.as_ref().unwrap().score.unwrap();
    assert_eq!(score.scaled, Some(0.9));
}

#[tokio::test]
async fn state_changes_upsert_per_collection_documents() {
    let fixture = Fixture::new();

    let controller = TrackingController::initialize(
        base_config(),
        environment(&launch_url()),
        fixture.collaborators(),
    )
    .await;

    controller
        .handle_event(ContentEvent::StateChanged {
            collection: StateCollection::Components,
            id: "c-05".to_string(),
            state: json!({"_isComplete": false}),
        })
        .await;
    controller
        .handle_event(ContentEvent::StateChanged {
            collection: StateCollection::Components,
            id: "c-10".to_string(),
            state: json!({"_isComplete": true}),
        })
        .await;
    controller
        .handle_event(ContentEvent::StateChanged {
            collection: StateCollection::Components,
            id: "c-05".to_string(),
            state: json!({"_isComplete": true}),
        })
        .await;
    controller
        .handle_event(ContentEvent::StateChanged {
            collection: StateCollection::Course,
            id: "course".to_string(),
            state: json!({"_totalDuration": 1000}),
        })
        .await;

    let state = fixture.store.state.lock().unwrap();
    let components = state.get("components").unwrap().as_array().unwrap();
    assert_eq!(components.len(), 2);
    assert_eq!(components[0]["_id"], "c-05");
    assert_eq!(components[0]["_isComplete"], true);
    assert_eq!(components[1]["_id"], "c-10");
    assert_eq!(state.get("course").unwrap()["_totalDuration"], 1000);

    let labels = fixture.sink.labels();
    assert_eq!(
        labels
            .iter()
            .filter(|label| *label == "sendState:success")
            .count(),
        4
    );
}

#[tokio::test]
async fn offline_storage_is_mirrored_into_the_profile_store() {
    let fixture = Fixture::new();

    let controller = TrackingController::initialize(
        base_config(),
        environment(&launch_url()),
        fixture.collaborators(),
    )
    .await;

    let storage = controller.storage();
    assert!(!storage.is_temporary());

    storage.set("bookmark", json!("co-05"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = fixture.store.state.lock().unwrap();
    assert_eq!(state.get("profileStore").unwrap()["bookmark"], "co-05");
    drop(state);

    // Learner info is derived from the launch actor.
    let info = storage.get("learnerinfo").unwrap();
    assert_eq!(info["id"], "a@x.com");
    assert_eq!(info["name"], "A");
}
