//! Task model and status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status for a scheduled task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet handed to the agent.
    Pending,
    /// Handed to the agent, not yet started.
    Assigned,
    /// Agent reported it is working on the task.
    InProgress,
    /// Agent submitted a successful result.
    Completed,
    /// Agent submitted an error.
    Failed,
    /// Cancelled before completion (operator action or agent deactivation).
    Cancelled,
}

impl TaskStatus {
    /// Whether this status admits no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Result payload submitted by an agent when finishing a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Task finished successfully with a result document.
    Success(serde_json::Value),
    /// Task failed with an error description.
    Error(String),
}

/// Task domain entity persisted in `SQLite`.
///
/// Owned exclusively by the scheduler; the agent is a foreign reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    /// Unique record identifier.
    pub id: String,
    /// Agent the task is addressed to.
    pub agent_id: String,
    /// Principal that requested the work.
    pub requester_id: String,
    /// Free-form task classification tag.
    pub task_type: String,
    /// Higher values are dispatched first.
    pub priority: i64,
    /// Opaque structured work payload.
    pub payload: serde_json::Value,
    /// Current status. Terminal statuses never change again.
    pub status: TaskStatus,
    /// Creation timestamp; tie-breaker within a priority band.
    pub created_at: DateTime<Utc>,
    /// Optional completion deadline.
    pub deadline: Option<DateTime<Utc>>,
    /// Set when the task reaches a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Error description for failed tasks.
    pub error: Option<String>,
    /// Result document for completed tasks.
    pub result: Option<serde_json::Value>,
    /// Reason stamped when the task was cancelled.
    pub cancel_reason: Option<String>,
}

impl Task {
    /// Construct a new pending task with a generated identifier.
    #[must_use]
    pub fn new(
        agent_id: String,
        requester_id: String,
        task_type: String,
        payload: serde_json::Value,
        priority: i64,
        deadline: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id,
            requester_id,
            task_type,
            priority,
            payload,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            deadline,
            completed_at: None,
            error: None,
            result: None,
            cancel_reason: None,
        }
    }
}
