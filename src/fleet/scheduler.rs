//! Task scheduler: creation, assignment, querying, and finalization.
//!
//! Task machine: `Pending -> Assigned -> InProgress -> {Completed | Failed}`,
//! with `Cancelled` reachable from any non-terminal status. Terminal
//! statuses never change again; finalization races are resolved by the
//! conditional updates in [`TaskRepo`], so the losing writer observes a
//! terminal row instead of overwriting it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};

use crate::audit::{AuditEntry, AuditEventType, AuditLogger};
use crate::models::task::{Task, TaskOutcome, TaskStatus};
use crate::persistence::agent_repo::AgentRepo;
use crate::persistence::task_repo::TaskRepo;
use crate::{AppError, Result};

/// Aggregate task counts returned by [`TaskScheduler::statistics`].
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TaskStatistics {
    /// Tasks not yet handed to an agent.
    pub pending: u64,
    /// Tasks handed over but not started.
    pub assigned: u64,
    /// Tasks agents are working on.
    pub in_progress: u64,
    /// Successfully finished tasks.
    pub completed: u64,
    /// Tasks that ended in an error.
    pub failed: u64,
    /// Tasks cancelled before completion.
    pub cancelled: u64,
    /// Open tasks past their deadline.
    pub overdue: u64,
}

impl TaskStatistics {
    /// Total number of tasks counted.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.pending + self.assigned + self.in_progress + self.completed + self.failed
            + self.cancelled
    }

    /// Number of non-terminal tasks.
    #[must_use]
    pub fn open(&self) -> u64 {
        self.pending + self.assigned + self.in_progress
    }
}

/// Creates, assigns, queries, and finalizes tasks against agents.
pub struct TaskScheduler {
    agents: AgentRepo,
    tasks: TaskRepo,
    audit: Arc<dyn AuditLogger>,
}

impl TaskScheduler {
    /// Create a new scheduler over the given repositories.
    #[must_use]
    pub fn new(agents: AgentRepo, tasks: TaskRepo, audit: Arc<dyn AuditLogger>) -> Self {
        Self {
            agents,
            tasks,
            audit,
        }
    }

    /// Schedule a new task for an agent. The agent must exist but need not
    /// be `Active`: scheduling is decoupled from momentary availability,
    /// and assignment happens later.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown agents or `AppError::Db`
    /// on store failure.
    pub async fn schedule(
        &self,
        agent_id: &str,
        requester_id: &str,
        task_type: &str,
        payload: serde_json::Value,
        priority: i64,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<Task> {
        let span = info_span!("schedule", agent_id, task_type);
        async {
            if self.agents.get_by_id(agent_id).await?.is_none() {
                return Err(AppError::NotFound(format!("agent {agent_id}")));
            }

            let task = Task::new(
                agent_id.to_owned(),
                requester_id.to_owned(),
                task_type.to_owned(),
                payload,
                priority,
                deadline,
            );
            let created = self.tasks.create(&task).await?;

            info!(task_id = %created.id, agent_id, priority, "task scheduled");
            self.record_audit(
                AuditEntry::new(
                    AuditEventType::TaskScheduled,
                    "task",
                    created.id.clone(),
                    "schedule",
                )
                .with_actor(requester_id),
            );

            Ok(created)
        }
        .instrument(span)
        .await
    }

    /// List an agent's tasks ordered `(priority desc, created_at asc)`,
    /// optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_tasks(
        &self,
        agent_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>> {
        self.tasks.list_for_agent(agent_id, status).await
    }

    /// Hand a `Pending` task to its agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown tasks,
    /// `AppError::AlreadyFinalized` for terminal tasks, and
    /// `AppError::InvalidTransition` otherwise.
    pub async fn assign(&self, task_id: &str) -> Result<Task> {
        if self.tasks.mark_assigned(task_id).await? {
            return self.fetch(task_id).await;
        }
        Err(self.classify_failure(task_id, None).await?)
    }

    /// Mark an `Assigned` task `InProgress` on behalf of its agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound`, `AppError::NotOwned`,
    /// `AppError::AlreadyFinalized`, or `AppError::InvalidTransition`
    /// depending on why the precondition failed.
    pub async fn start(&self, task_id: &str, agent_id: &str) -> Result<Task> {
        if self.tasks.mark_in_progress(task_id, agent_id).await? {
            return self.fetch(task_id).await;
        }
        Err(self.classify_failure(task_id, Some(agent_id)).await?)
    }

    /// Submit the result of a task. Valid only when the task belongs to
    /// the calling agent and is `Assigned` or `InProgress`.
    ///
    /// Two racing submissions resolve to a single writer: the conditional
    /// update lets exactly one through, and the loser receives
    /// `AlreadyFinalized`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound`, `AppError::NotOwned`,
    /// `AppError::AlreadyFinalized`, or `AppError::InvalidTransition`.
    pub async fn submit_result(
        &self,
        task_id: &str,
        agent_id: &str,
        outcome: TaskOutcome,
    ) -> Result<Task> {
        let span = info_span!("submit_result", task_id, agent_id);
        async {
            let (status, result_doc, error) = match &outcome {
                TaskOutcome::Success(doc) => (TaskStatus::Completed, Some(doc), None),
                TaskOutcome::Error(msg) => (TaskStatus::Failed, None, Some(msg.as_str())),
            };

            if self
                .tasks
                .finalize(task_id, agent_id, status, result_doc, error)
                .await?
            {
                info!(task_id, ?status, "task finalized");
                self.record_audit(
                    AuditEntry::new(AuditEventType::TaskFinalized, "task", task_id, "finalize")
                        .with_actor(agent_id)
                        .with_metadata(serde_json::json!({
                            "status": match status {
                                TaskStatus::Completed => "completed",
                                _ => "failed",
                            }
                        })),
                );
                return self.fetch(task_id).await;
            }

            Err(self.classify_failure(task_id, Some(agent_id)).await?)
        }
        .instrument(span)
        .await
    }

    /// Cancel every open task for an agent, stamping the given reason.
    ///
    /// Invoked as a side effect of agent deactivation; idempotent, and
    /// terminal tasks are never touched. Returns the number cancelled.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn cancel_tasks_for_agent(&self, agent_id: &str, reason: &str) -> Result<u64> {
        let cancelled = self.tasks.cancel_for_agent(agent_id, reason).await?;

        if cancelled > 0 {
            info!(agent_id, cancelled, reason, "open tasks cancelled");
            self.record_audit(
                AuditEntry::new(
                    AuditEventType::TasksCancelled,
                    "agent",
                    agent_id,
                    "cancel_open_tasks",
                )
                .with_metadata(serde_json::json!({ "cancelled": cancelled, "reason": reason })),
            );
        }

        Ok(cancelled)
    }

    /// Aggregate task counts, optionally scoped to one agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if a query fails.
    pub async fn statistics(&self, agent_id: Option<&str>) -> Result<TaskStatistics> {
        let mut stats = TaskStatistics::default();
        for (status, count) in self.tasks.count_by_status(agent_id).await? {
            match status {
                TaskStatus::Pending => stats.pending = count,
                TaskStatus::Assigned => stats.assigned = count,
                TaskStatus::InProgress => stats.in_progress = count,
                TaskStatus::Completed => stats.completed = count,
                TaskStatus::Failed => stats.failed = count,
                TaskStatus::Cancelled => stats.cancelled = count,
            }
        }
        stats.overdue = self.tasks.count_overdue(agent_id).await?;
        Ok(stats)
    }

    /// Re-read a task after a successful conditional update.
    async fn fetch(&self, task_id: &str) -> Result<Task> {
        self.tasks
            .get_by_id(task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {task_id}")))
    }

    /// Explain why a conditional update touched zero rows.
    ///
    /// Always returns `Ok(error)`; the inner error is the classification,
    /// the outer `Result` carries store failures from the re-read.
    async fn classify_failure(
        &self,
        task_id: &str,
        caller_agent: Option<&str>,
    ) -> Result<AppError> {
        let Some(task) = self.tasks.get_by_id(task_id).await? else {
            return Ok(AppError::NotFound(format!("task {task_id}")));
        };

        if let Some(agent_id) = caller_agent {
            if task.agent_id != agent_id {
                return Ok(AppError::NotOwned(format!(
                    "task {task_id} belongs to agent {}",
                    task.agent_id
                )));
            }
        }

        if task.status.is_terminal() {
            return Ok(AppError::AlreadyFinalized(format!(
                "task {task_id} is already {:?}",
                task.status
            )));
        }

        Ok(AppError::InvalidTransition(format!(
            "task {task_id} is {:?}",
            task.status
        )))
    }

    /// Audit is fire-and-forget: a failed write is logged, never surfaced.
    fn record_audit(&self, entry: AuditEntry) {
        if let Err(err) = self.audit.record(entry) {
            warn!(%err, "audit record failed");
        }
    }
}
