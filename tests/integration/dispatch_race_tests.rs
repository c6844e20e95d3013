//! Races between concurrent writers are resolved to a single winner.

use fleet_warden::errors::AppError;
use fleet_warden::models::agent::AgentState;
use fleet_warden::models::task::{TaskOutcome, TaskStatus};

use super::test_helpers::FleetHarness;

#[tokio::test]
async fn duplicate_result_submissions_keep_the_first_result() {
    let fleet = FleetHarness::start().await;
    let agent = fleet
        .lifecycle
        .register("owner-1".into(), "worker".into(), vec![])
        .await
        .expect("register");
    let task = fleet
        .scheduler
        .schedule(&agent.id, "r", "index", serde_json::json!({}), 0, None)
        .await
        .expect("schedule");
    fleet.scheduler.assign(&task.id).await.expect("assign");

    let (success, failure) = tokio::join!(
        fleet.scheduler.submit_result(
            &task.id,
            &agent.id,
            TaskOutcome::Success(serde_json::json!({ "attempt": 1 })),
        ),
        fleet.scheduler.submit_result(
            &task.id,
            &agent.id,
            TaskOutcome::Error("retry submitted twice".into()),
        ),
    );

    let wins = [success.is_ok(), failure.is_ok()]
        .iter()
        .filter(|w| **w)
        .count();
    assert_eq!(wins, 1);

    let final_task = fleet
        .scheduler
        .list_tasks(&agent.id, None)
        .await
        .expect("list")
        .pop()
        .expect("task present");
    assert!(final_task.status.is_terminal());
    // Whichever writer won, its payload is the one that persisted.
    match final_task.status {
        TaskStatus::Completed => {
            assert_eq!(final_task.result, Some(serde_json::json!({ "attempt": 1 })));
            assert!(final_task.error.is_none());
        }
        TaskStatus::Failed => {
            assert_eq!(final_task.error.as_deref(), Some("retry submitted twice"));
            assert!(final_task.result.is_none());
        }
        other => panic!("unexpected status {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_escalation_and_deactivation_yield_one_state() {
    let fleet = FleetHarness::start().await;
    let agent = fleet
        .lifecycle
        .register("owner-1".into(), "contested".into(), vec![])
        .await
        .expect("register");

    let (suspend, deactivate) = tokio::join!(
        fleet
            .lifecycle
            .transition(&agent.id, AgentState::Active, AgentState::Suspended),
        fleet.lifecycle.deactivate(&agent.id, "operator", "ops-1"),
    );

    let wins = [suspend.is_ok(), deactivate.is_ok()]
        .iter()
        .filter(|w| **w)
        .count();
    assert_eq!(wins, 1, "exactly one state change must land");

    let state = fleet.lifecycle.get_agent(&agent.id).await.expect("get").state;
    if suspend.is_ok() {
        assert_eq!(state, AgentState::Suspended);
        assert!(matches!(deactivate, Err(AppError::InvalidTransition(_) | AppError::StateMismatch(_))));
    } else {
        assert_eq!(state, AgentState::Inactive);
        assert!(matches!(suspend, Err(AppError::StateMismatch(_))));
    }
}

#[tokio::test]
async fn concurrent_assignments_hand_the_task_over_once() {
    let fleet = FleetHarness::start().await;
    let agent = fleet
        .lifecycle
        .register("owner-1".into(), "worker".into(), vec![])
        .await
        .expect("register");
    let task = fleet
        .scheduler
        .schedule(&agent.id, "r", "index", serde_json::json!({}), 0, None)
        .await
        .expect("schedule");

    let (a, b) = tokio::join!(
        fleet.scheduler.assign(&task.id),
        fleet.scheduler.assign(&task.id),
    );
    let wins = [a.is_ok(), b.is_ok()].iter().filter(|w| **w).count();
    assert_eq!(wins, 1);
    let loser = if a.is_err() { a } else { b };
    assert!(matches!(loser, Err(AppError::InvalidTransition(_))));
}
