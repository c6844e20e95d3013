//! Task repository for `SQLite` persistence.
//!
//! Terminal statuses are enforced in SQL: every mutating statement
//! carries the status precondition in its `WHERE` clause, so a lost race
//! shows up as zero affected rows rather than a silent overwrite.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::task::{Task, TaskStatus};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for task records.
#[derive(Clone)]
pub struct TaskRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    agent_id: String,
    requester_id: String,
    task_type: String,
    priority: i64,
    payload: String,
    status: String,
    created_at: String,
    deadline: Option<String>,
    completed_at: Option<String>,
    error: Option<String>,
    result: Option<String>,
    cancel_reason: Option<String>,
}

impl TaskRow {
    /// Convert a database row into the domain model.
    fn into_task(self) -> Result<Task> {
        let status = parse_task_status(&self.status)?;
        let payload: serde_json::Value = serde_json::from_str(&self.payload)
            .map_err(|e| AppError::Db(format!("invalid payload: {e}")))?;
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| AppError::Db(format!("invalid result: {e}")))?;

        Ok(Task {
            id: self.id,
            agent_id: self.agent_id,
            requester_id: self.requester_id,
            task_type: self.task_type,
            priority: self.priority,
            payload,
            status,
            created_at: parse_ts(&self.created_at, "created_at")?,
            deadline: parse_opt_ts(self.deadline.as_deref(), "deadline")?,
            completed_at: parse_opt_ts(self.completed_at.as_deref(), "completed_at")?,
            error: self.error,
            result,
            cancel_reason: self.cancel_reason,
        })
    }
}

fn parse_ts(raw: &str, field: &str) -> Result<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {field}: {e}")))
}

fn parse_opt_ts(raw: Option<&str>, field: &str) -> Result<Option<DateTime<Utc>>> {
    raw.map(|r| parse_ts(r, field)).transpose()
}

fn parse_task_status(s: &str) -> Result<TaskStatus> {
    match s {
        "pending" => Ok(TaskStatus::Pending),
        "assigned" => Ok(TaskStatus::Assigned),
        "in_progress" => Ok(TaskStatus::InProgress),
        "completed" => Ok(TaskStatus::Completed),
        "failed" => Ok(TaskStatus::Failed),
        "cancelled" => Ok(TaskStatus::Cancelled),
        other => Err(AppError::Db(format!("invalid task status: {other}"))),
    }
}

pub(crate) fn task_status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Assigned => "assigned",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "cancelled",
    }
}

impl TaskRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new task record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, task: &Task) -> Result<Task> {
        let payload = serde_json::to_string(&task.payload)
            .map_err(|e| AppError::Db(format!("serialize payload: {e}")))?;
        let result = task
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| AppError::Db(format!("serialize result: {e}")))?;

        sqlx::query(
            "INSERT INTO task (id, agent_id, requester_id, task_type, priority,
             payload, status, created_at, deadline, completed_at, error, result,
             cancel_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(&task.id)
        .bind(&task.agent_id)
        .bind(&task.requester_id)
        .bind(&task.task_type)
        .bind(task.priority)
        .bind(&payload)
        .bind(task_status_str(task.status))
        .bind(task.created_at.to_rfc3339())
        .bind(task.deadline.map(|t| t.to_rfc3339()))
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(&task.error)
        .bind(&result)
        .bind(&task.cancel_reason)
        .execute(self.db.as_ref())
        .await?;

        Ok(task.clone())
    }

    /// Retrieve a task by its ID.
    ///
    /// Returns `Ok(None)` if the task does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM task WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(TaskRow::into_task).transpose()
    }

    /// List tasks for an agent, optionally filtered by status, ordered by
    /// priority descending with FIFO tie-breaking on creation time.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_agent(
        &self,
        agent_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = if let Some(status) = status {
            sqlx::query_as(
                "SELECT * FROM task WHERE agent_id = ?1 AND status = ?2 \
                 ORDER BY priority DESC, created_at ASC",
            )
            .bind(agent_id)
            .bind(task_status_str(status))
            .fetch_all(self.db.as_ref())
            .await?
        } else {
            sqlx::query_as(
                "SELECT * FROM task WHERE agent_id = ?1 \
                 ORDER BY priority DESC, created_at ASC",
            )
            .bind(agent_id)
            .fetch_all(self.db.as_ref())
            .await?
        };

        rows.into_iter().map(TaskRow::into_task).collect()
    }

    /// Move a `pending` task to `assigned`. Returns `false` when the
    /// precondition did not hold.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_assigned(&self, id: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE task SET status = 'assigned' WHERE id = ?1 AND status = 'pending'")
                .bind(id)
                .execute(self.db.as_ref())
                .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Move an `assigned` task to `in_progress` on behalf of its agent.
    /// Returns `false` when the precondition did not hold.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_in_progress(&self, id: &str, agent_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE task SET status = 'in_progress' \
             WHERE id = ?1 AND agent_id = ?2 AND status = 'assigned'",
        )
        .bind(id)
        .bind(agent_id)
        .execute(self.db.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Finalize a task to `completed` or `failed` in a single conditional
    /// update. The `WHERE` clause carries ownership and non-terminal
    /// preconditions, so exactly one of two racing writers can win.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails, or if `status` is not a
    /// terminal result status.
    pub async fn finalize(
        &self,
        id: &str,
        agent_id: &str,
        status: TaskStatus,
        result_doc: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<bool> {
        if !matches!(status, TaskStatus::Completed | TaskStatus::Failed) {
            return Err(AppError::Db(format!(
                "finalize called with non-result status: {}",
                task_status_str(status)
            )));
        }

        let result_text = result_doc
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| AppError::Db(format!("serialize result: {e}")))?;

        let outcome = sqlx::query(
            "UPDATE task SET status = ?1, completed_at = ?2, result = ?3, error = ?4 \
             WHERE id = ?5 AND agent_id = ?6 AND status IN ('assigned', 'in_progress')",
        )
        .bind(task_status_str(status))
        .bind(Utc::now().to_rfc3339())
        .bind(&result_text)
        .bind(error)
        .bind(id)
        .bind(agent_id)
        .execute(self.db.as_ref())
        .await?;

        Ok(outcome.rows_affected() == 1)
    }

    /// Cancel every open (`pending`, `assigned`, `in_progress`) task for an
    /// agent, stamping a reason and completion time. Terminal tasks are
    /// untouched; re-running is a no-op. Returns the number cancelled.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn cancel_for_agent(&self, agent_id: &str, reason: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE task SET status = 'cancelled', cancel_reason = ?1, completed_at = ?2 \
             WHERE agent_id = ?3 AND status IN ('pending', 'assigned', 'in_progress')",
        )
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .bind(agent_id)
        .execute(self.db.as_ref())
        .await?;

        Ok(result.rows_affected())
    }

    /// Count tasks grouped by status, optionally scoped to one agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_by_status(&self, agent_id: Option<&str>) -> Result<Vec<(TaskStatus, u64)>> {
        let rows: Vec<(String, i64)> = if let Some(agent_id) = agent_id {
            sqlx::query_as(
                "SELECT status, COUNT(*) FROM task WHERE agent_id = ?1 GROUP BY status",
            )
            .bind(agent_id)
            .fetch_all(self.db.as_ref())
            .await?
        } else {
            sqlx::query_as("SELECT status, COUNT(*) FROM task GROUP BY status")
                .fetch_all(self.db.as_ref())
                .await?
        };

        rows.into_iter()
            .map(|(status, count)| {
                Ok((
                    parse_task_status(&status)?,
                    u64::try_from(count).unwrap_or_default(),
                ))
            })
            .collect()
    }

    /// Count open tasks whose deadline has already passed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_overdue(&self, agent_id: Option<&str>) -> Result<u64> {
        let now = Utc::now().to_rfc3339();
        let count: (i64,) = if let Some(agent_id) = agent_id {
            sqlx::query_as(
                "SELECT COUNT(*) FROM task WHERE agent_id = ?1 AND deadline < ?2 \
                 AND status IN ('pending', 'assigned', 'in_progress')",
            )
            .bind(agent_id)
            .bind(&now)
            .fetch_one(self.db.as_ref())
            .await?
        } else {
            sqlx::query_as(
                "SELECT COUNT(*) FROM task WHERE deadline < ?1 \
                 AND status IN ('pending', 'assigned', 'in_progress')",
            )
            .bind(&now)
            .fetch_one(self.db.as_ref())
            .await?
        };

        Ok(u64::try_from(count.0).unwrap_or_default())
    }
}
