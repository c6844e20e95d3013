//! Deactivation cascade: open tasks are cancelled, finished work is kept.

use fleet_warden::models::task::{TaskOutcome, TaskStatus};

use super::test_helpers::FleetHarness;

#[tokio::test]
async fn deactivation_cancels_open_tasks_and_preserves_terminal_ones() {
    let fleet = FleetHarness::start().await;
    let agent = fleet
        .lifecycle
        .register("owner-1".into(), "worker".into(), vec![])
        .await
        .expect("register");

    // One task in each open status.
    let pending = fleet
        .scheduler
        .schedule(&agent.id, "r", "index", serde_json::json!({}), 0, None)
        .await
        .expect("schedule");
    let assigned = fleet
        .scheduler
        .schedule(&agent.id, "r", "index", serde_json::json!({}), 0, None)
        .await
        .expect("schedule");
    fleet.scheduler.assign(&assigned.id).await.expect("assign");
    let in_progress = fleet
        .scheduler
        .schedule(&agent.id, "r", "index", serde_json::json!({}), 0, None)
        .await
        .expect("schedule");
    fleet.scheduler.assign(&in_progress.id).await.expect("assign");
    fleet
        .scheduler
        .start(&in_progress.id, &agent.id)
        .await
        .expect("start");

    // One finished task that must survive untouched.
    let completed = fleet
        .scheduler
        .schedule(&agent.id, "r", "index", serde_json::json!({}), 0, None)
        .await
        .expect("schedule");
    fleet.scheduler.assign(&completed.id).await.expect("assign");
    fleet
        .scheduler
        .submit_result(
            &completed.id,
            &agent.id,
            TaskOutcome::Success(serde_json::json!({ "ok": true })),
        )
        .await
        .expect("submit");

    let (_, cancelled) = fleet
        .lifecycle
        .deactivate(&agent.id, "decommissioned", "ops-1")
        .await
        .expect("deactivate");
    assert_eq!(cancelled, 3);

    for id in [&pending.id, &assigned.id, &in_progress.id] {
        let task = fleet
            .scheduler
            .list_tasks(&agent.id, None)
            .await
            .expect("list")
            .into_iter()
            .find(|t| &t.id == id)
            .expect("present");
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.cancel_reason.as_deref(), Some("agent deactivated"));
        assert!(task.completed_at.is_some());
    }

    let kept = fleet
        .scheduler
        .list_tasks(&agent.id, Some(TaskStatus::Completed))
        .await
        .expect("list");
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].id, completed.id);
    assert_eq!(kept[0].result, Some(serde_json::json!({ "ok": true })));

    let stats = fleet
        .scheduler
        .statistics(Some(&agent.id))
        .await
        .expect("statistics");
    assert_eq!(stats.cancelled, 3);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.open(), 0);
}

#[tokio::test]
async fn cascade_does_not_cross_agent_boundaries() {
    let fleet = FleetHarness::start().await;
    let doomed = fleet
        .lifecycle
        .register("owner-1".into(), "doomed".into(), vec![])
        .await
        .expect("register");
    let bystander = fleet
        .lifecycle
        .register("owner-1".into(), "bystander".into(), vec![])
        .await
        .expect("register");

    fleet
        .scheduler
        .schedule(&doomed.id, "r", "index", serde_json::json!({}), 0, None)
        .await
        .expect("schedule");
    let other_task = fleet
        .scheduler
        .schedule(&bystander.id, "r", "index", serde_json::json!({}), 0, None)
        .await
        .expect("schedule");

    let (_, cancelled) = fleet
        .lifecycle
        .deactivate(&doomed.id, "decommissioned", "ops-1")
        .await
        .expect("deactivate");
    assert_eq!(cancelled, 1);

    let listed = fleet
        .scheduler
        .list_tasks(&bystander.id, None)
        .await
        .expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, other_task.id);
    assert_eq!(listed[0].status, TaskStatus::Pending);
}
