//! End-to-end behaviour of status transitions over the in-memory repository.

mod fixtures;

use chrono::{TimeDelta, Utc};
use serde_json::json;
use std::sync::Arc;

use fixtures::workflow::{trigger_step, WorkflowFixture};
use statusflow::repository::{StepOwner, WorkflowRepository};
use statusflow::workflows::model::ConditionType;
use statusflow::workflows::positions::{is_contiguous, PositionScope};
use statusflow::workflows::{ConfigurationError, StepError, StepOutcome, TransitionError};
use statusflow::{EngineSettings, RecordingGateway};

#[tokio::test]
async fn unknown_status_is_rejected_and_nothing_changes() {
    let fx = WorkflowFixture::new().await;
    let (submitted, _) = fx.status("Submitted").await;
    let app = fx.application(&submitted).await;
    let engine = fx.engine();

    let result = engine.transition(app.id, "Teleported").await;
    assert!(!result.ok);
    assert!(result.message.contains("Teleported"));
    assert_eq!(fx.current_status(app.id).await, "Submitted");

    let err = engine.transition_detailed(app.id, "Teleported").await.unwrap_err();
    assert!(matches!(err, TransitionError::UnknownStatus(name) if name == "Teleported"));
    assert_eq!(
        fx.repo.get_application(app.id).await.unwrap().updated_at,
        app.updated_at
    );
}

#[tokio::test]
async fn status_commits_even_when_every_step_fails() {
    let fx = WorkflowFixture::with_gateway(RecordingGateway::new().fail_all()).await;
    let (submitted, _) = fx.status("Submitted").await;
    let (accepted, accepted_order) = fx.status("Accepted").await;
    let owner = StepOwner::StatusOrder(accepted_order.id);

    // move_status without a target, a rejected notification, a move to a
    // status that does not exist
    fx.push(owner, statusflow::workflows::model::NewFunction::robot(fx.mover.id, json!({})))
        .await;
    fx.push(owner, fx.notification("Welcome, {status}")).await;
    fx.push(owner, fx.move_to("Graduated")).await;

    let app = fx.application(&submitted).await;
    let done = fx.engine().transition_detailed(app.id, "Accepted").await.unwrap();

    assert_eq!(done.application.status, accepted);
    assert_eq!(fx.current_status(app.id).await, "Accepted");
    assert_eq!(done.chain.len(), 3);
    assert_eq!(done.chain.failures().len(), 3);
    assert!(matches!(
        done.chain.steps[0].outcome,
        StepOutcome::Failed(StepError::Configuration(ConfigurationError::InvalidConfig { .. }))
    ));
    assert!(matches!(done.chain.steps[1].outcome, StepOutcome::Failed(StepError::Notification(_))));
    assert!(matches!(done.chain.steps[2].outcome, StepOutcome::Failed(StepError::Transition(_))));

    let result = fx.engine().transition(app.id, "Submitted").await;
    assert!(result.ok);
}

#[tokio::test]
async fn notifications_run_in_order_and_failures_stay_local() {
    let fx = WorkflowFixture::with_gateway(RecordingGateway::new().fail_call(0)).await;
    let (submitted, _) = fx.status("Submitted").await;
    let (_, interview_order) = fx.status("Interview").await;
    let check = fx.trigger("still interviewing", ConditionType::StatusCheck).await;

    fx.push(
        StepOwner::StatusOrder(interview_order.id),
        fx.notification("first: {status}"),
    )
    .await;
    fx.push(
        StepOwner::StatusOrder(interview_order.id),
        trigger_step(&check, json!({"status": "Interview"})),
    )
    .await;
    fx.push(StepOwner::Trigger(check.id), fx.notification("second: {status}"))
        .await;

    let app = fx.application(&submitted).await;
    let done = fx.engine().transition_detailed(app.id, "Interview").await.unwrap();

    let attempts = fx.gateway.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].text, "first: Interview");
    assert!(!attempts[0].delivered);
    assert_eq!(attempts[1].text, "second: Interview");
    assert!(attempts[1].delivered);
    assert_eq!(attempts[1].chat_id, "1001");

    assert!(matches!(done.chain.steps[1].outcome, StepOutcome::ConditionMet { .. }));
    assert_eq!(done.chain.failures().len(), 1);
    assert_eq!(done.chain.notifications_sent(), 1);
}

#[tokio::test]
async fn field_comparison_selects_applicants_by_course() {
    let fx = WorkflowFixture::new().await;
    let (submitted, _) = fx.status("Submitted").await;
    let (_, review_order) = fx.status("Review").await;
    let third_year = fx.trigger("third year", ConditionType::FieldComparison).await;

    fx.push(
        StepOwner::StatusOrder(review_order.id),
        trigger_step(&third_year, json!({"field": "course", "operator": "==", "value": 3})),
    )
    .await;
    fx.push(StepOwner::Trigger(third_year.id), fx.notification("course 3 in {status}"))
        .await;

    let third = fx
        .application_with(&submitted, |app| app.profile.course = Some(3))
        .await;
    let second = fx
        .application_with(&submitted, |app| app.profile.course = Some(2))
        .await;
    let engine = fx.engine();

    let met = engine.transition_detailed(third.id, "Review").await.unwrap();
    assert!(matches!(met.chain.steps[0].outcome, StepOutcome::ConditionMet { .. }));

    let not_met = engine.transition_detailed(second.id, "Review").await.unwrap();
    assert!(matches!(not_met.chain.steps[0].outcome, StepOutcome::ConditionNotMet));

    assert_eq!(fx.gateway.attempts().len(), 1);
    assert_eq!(fx.gateway.attempts()[0].text, "course 3 in Review");
}

#[tokio::test]
async fn time_expiration_compares_against_deadline_field() {
    let fx = WorkflowFixture::new().await;
    let (submitted, _) = fx.status("Submitted").await;
    let (_, closed_order) = fx.status("Closed").await;
    let overdue = fx.trigger("deadline passed", ConditionType::TimeExpiration).await;
    let stale = fx.trigger("untouched for an hour", ConditionType::TimeExpiration).await;

    let owner = StepOwner::StatusOrder(closed_order.id);
    fx.push(
        owner,
        trigger_step(&overdue, json!({"interval": "hours", "value": 1, "field": "date_end"})),
    )
    .await;
    fx.push(owner, trigger_step(&stale, json!({"interval": "hours", "value": 1})))
        .await;
    fx.push(StepOwner::Trigger(overdue.id), fx.notification("overdue"))
        .await;

    let late = fx
        .application_with(&submitted, |app| {
            app.date_end = Some(Utc::now() - TimeDelta::minutes(90))
        })
        .await;
    let on_time = fx
        .application_with(&submitted, |app| {
            app.date_end = Some(Utc::now() - TimeDelta::minutes(30))
        })
        .await;
    let engine = fx.engine();

    let done = engine.transition_detailed(late.id, "Closed").await.unwrap();
    assert!(matches!(done.chain.steps[0].outcome, StepOutcome::ConditionMet { .. }));
    // The transition itself just touched updated_at.
    assert!(matches!(done.chain.steps[1].outcome, StepOutcome::ConditionNotMet));

    let done = engine.transition_detailed(on_time.id, "Closed").await.unwrap();
    assert!(matches!(done.chain.steps[0].outcome, StepOutcome::ConditionNotMet));

    assert_eq!(fx.gateway.attempts().len(), 1);
}

#[tokio::test]
async fn chained_move_is_visible_to_later_notifications() {
    let fx = WorkflowFixture::new().await;
    let (submitted, _) = fx.status("Submitted").await;
    let (_, approved_order) = fx.status("Approved").await;
    fx.status("Enrolled").await;

    let owner = StepOwner::StatusOrder(approved_order.id);
    fx.push(owner, fx.move_to("Enrolled")).await;
    fx.push(owner, fx.notification("You are now {status}")).await;

    let app = fx.application(&submitted).await;
    let done = fx.engine().transition_detailed(app.id, "Approved").await.unwrap();

    assert!(matches!(
        &done.chain.steps[0].outcome,
        StepOutcome::Moved { status, .. } if status == "Enrolled"
    ));
    assert_eq!(fx.current_status(app.id).await, "Enrolled");
    assert_eq!(fx.gateway.attempts()[0].text, "You are now Enrolled");
}

#[tokio::test]
async fn self_looping_move_terminates_at_depth_limit() {
    let fx = WorkflowFixture::new().await;
    let (submitted, _) = fx.status("Submitted").await;
    let (_, loop_order) = fx.status("Loop").await;
    fx.push(StepOwner::StatusOrder(loop_order.id), fx.move_to("Loop"))
        .await;

    let app = fx.application(&submitted).await;
    let engine = fx.engine_with(EngineSettings {
        max_chain_depth: 4,
        ..EngineSettings::default()
    });

    let done = engine.transition_detailed(app.id, "Loop").await.unwrap();
    let all = done.chain.walk();
    assert_eq!(all.len(), 5);
    let failures = done.chain.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].outcome.is_recursion_limit());
    assert_eq!(fx.current_status(app.id).await, "Loop");
}

#[tokio::test]
async fn trigger_actions_count_towards_depth() {
    let fx = WorkflowFixture::new().await;
    let (submitted, _) = fx.status("Submitted").await;
    let (_, spin_order) = fx.status("Spin").await;
    let always = fx.trigger("always spinning", ConditionType::StatusCheck).await;

    fx.push(
        StepOwner::StatusOrder(spin_order.id),
        trigger_step(&always, json!({"status": "Spin"})),
    )
    .await;
    // The trigger's own action list re-runs the trigger.
    fx.push(
        StepOwner::Trigger(always.id),
        trigger_step(&always, json!({"status": "Spin"})),
    )
    .await;

    let app = fx.application(&submitted).await;
    let engine = fx.engine_with(EngineSettings {
        max_chain_depth: 3,
        ..EngineSettings::default()
    });
    let done = engine.transition_detailed(app.id, "Spin").await.unwrap();
    assert_eq!(done.chain.failures().len(), 1);
    assert!(done.chain.failures()[0].outcome.is_recursion_limit());
}

#[tokio::test]
async fn inactive_templates_are_skipped() {
    let fx = WorkflowFixture::new().await;
    let (submitted, _) = fx.status("Submitted").await;
    let (_, accepted_order) = fx.status("Accepted").await;
    let mut muted = statusflow::workflows::model::NewRobot::new(
        "muted",
        statusflow::workflows::model::ActionType::Notification,
    );
    muted.active = false;
    let muted = fx.repo.create_robot(muted).await.unwrap();

    fx.push(
        StepOwner::StatusOrder(accepted_order.id),
        statusflow::workflows::model::NewFunction::robot(
            muted.id,
            json!({"bot_token": "t", "chat_id": 1}),
        ),
    )
    .await;

    let app = fx.application(&submitted).await;
    let done = fx.engine().transition_detailed(app.id, "Accepted").await.unwrap();
    assert!(matches!(done.chain.steps[0].outcome, StepOutcome::Skipped { .. }));
    assert!(fx.gateway.attempts().is_empty());
}

#[tokio::test]
async fn application_without_event_uses_chains_of_all_events() {
    let fx = WorkflowFixture::new().await;
    let (submitted, _) = fx.status("Submitted").await;
    let (accepted, accepted_order) = fx.status("Accepted").await;
    fx.push(StepOwner::StatusOrder(accepted_order.id), fx.notification("A"))
        .await;

    let other_event = fx.repo.create_event("Winter School").await.unwrap();
    let other_order = fx
        .repo
        .insert_status_order(other_event.id, accepted.id, 1)
        .await
        .unwrap();
    fx.push(StepOwner::StatusOrder(other_order.id), fx.notification("B"))
        .await;

    let scoped = fx.application(&submitted).await;
    let unscoped = fx.application_with(&submitted, |app| app.event_id = None).await;
    let engine = fx.engine();

    engine.transition_detailed(scoped.id, "Accepted").await.unwrap();
    engine.transition_detailed(unscoped.id, "Accepted").await.unwrap();

    let texts: Vec<String> = fx.gateway.attempts().into_iter().map(|m| m.text).collect();
    assert_eq!(texts, vec!["A", "A", "B"]);
}

#[tokio::test]
async fn concurrent_transitions_leave_one_consistent_status() {
    let fx = WorkflowFixture::new().await;
    let (submitted, _) = fx.status("Submitted").await;
    fx.status("Accepted").await;
    fx.status("Rejected").await;
    let app = fx.application(&submitted).await;
    let engine = Arc::new(fx.engine());

    let mut handles = Vec::new();
    for i in 0..16 {
        let engine = engine.clone();
        let target = if i % 2 == 0 { "Accepted" } else { "Rejected" };
        handles.push(tokio::spawn(async move {
            engine.transition_detailed(app.id, target).await.map(|done| done.application)
        }));
    }

    let mut committed = Vec::new();
    for handle in handles {
        committed.push(handle.await.unwrap().unwrap());
    }

    // Whatever committed last is exactly what is stored: no torn writes.
    let stored = fx.repo.get_application(app.id).await.unwrap();
    assert!(["Accepted", "Rejected"].contains(&stored.status.name.as_str()));
    assert!(committed
        .iter()
        .any(|app| app.status == stored.status && app.updated_at == stored.updated_at));

    let slots = fx.repo.slots(PositionScope::Event(fx.event_id)).await.unwrap();
    assert!(is_contiguous(&slots));
}
