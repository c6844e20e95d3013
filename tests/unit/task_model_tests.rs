//! Unit tests for the task model and status machine.

use fleet_warden::models::task::{Task, TaskStatus};

#[test]
fn terminal_statuses() {
    assert!(TaskStatus::Completed.is_terminal());
    assert!(TaskStatus::Failed.is_terminal());
    assert!(TaskStatus::Cancelled.is_terminal());
    assert!(!TaskStatus::Pending.is_terminal());
    assert!(!TaskStatus::Assigned.is_terminal());
    assert!(!TaskStatus::InProgress.is_terminal());
}

#[test]
fn new_task_starts_pending() {
    let task = Task::new(
        "agent-1".into(),
        "requester-1".into(),
        "index".into(),
        serde_json::json!({ "path": "/data" }),
        7,
        None,
    );

    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.priority, 7);
    assert!(task.completed_at.is_none());
    assert!(task.error.is_none());
    assert!(task.result.is_none());
    assert!(!task.id.is_empty());
}

#[test]
fn task_status_serializes_to_snake_case() {
    let json = serde_json::to_string(&TaskStatus::InProgress).expect("serialize");
    assert_eq!(json, "\"in_progress\"");

    let status: TaskStatus = serde_json::from_str("\"cancelled\"").expect("deserialize");
    assert_eq!(status, TaskStatus::Cancelled);
}

#[test]
fn task_status_invalid_string_fails_deserialization() {
    let result: Result<TaskStatus, _> = serde_json::from_str("\"paused\"");
    assert!(result.is_err(), "unknown status should fail to deserialize");
}
