//! Agent registry repository for `SQLite` persistence.
//!
//! Pure data access: no transition legality lives here. The conditional
//! state updates expose the store's row-level atomicity so the lifecycle
//! controller can build a race-free compare-and-swap on top.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::agent::{Agent, AgentState};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for agent records.
#[derive(Clone)]
pub struct AgentRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct AgentRow {
    id: String,
    owner_id: String,
    display_name: String,
    capabilities: String,
    state: String,
    last_heartbeat_at: Option<String>,
    activated_at: Option<String>,
    deactivated_at: Option<String>,
    deactivated_by: Option<String>,
    deactivation_reason: Option<String>,
    reporting_exempt: i64,
    exemption_reason: Option<String>,
    created_at: String,
    updated_at: String,
}

impl AgentRow {
    /// Convert a database row into the domain model.
    fn into_agent(self) -> Result<Agent> {
        let state = parse_agent_state(&self.state)?;
        let capabilities: Vec<String> = serde_json::from_str(&self.capabilities)
            .map_err(|e| AppError::Db(format!("invalid capabilities: {e}")))?;

        Ok(Agent {
            id: self.id,
            owner_id: self.owner_id,
            display_name: self.display_name,
            capabilities,
            state,
            last_heartbeat_at: parse_opt_ts(self.last_heartbeat_at.as_deref(), "last_heartbeat_at")?,
            activated_at: parse_opt_ts(self.activated_at.as_deref(), "activated_at")?,
            deactivated_at: parse_opt_ts(self.deactivated_at.as_deref(), "deactivated_at")?,
            deactivated_by: self.deactivated_by,
            deactivation_reason: self.deactivation_reason,
            reporting_exempt: self.reporting_exempt != 0,
            exemption_reason: self.exemption_reason,
            created_at: parse_ts(&self.created_at, "created_at")?,
            updated_at: parse_ts(&self.updated_at, "updated_at")?,
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

fn parse_agent_state(s: &str) -> Result<AgentState> {
    match s {
        "active" => Ok(AgentState::Active),
        "inactive" => Ok(AgentState::Inactive),
        "suspended" => Ok(AgentState::Suspended),
        "frozen" => Ok(AgentState::Frozen),
        "deleted" => Ok(AgentState::Deleted),
        other => Err(AppError::Db(format!("invalid agent state: {other}"))),
    }
}

pub(crate) fn agent_state_str(state: AgentState) -> &'static str {
    match state {
        AgentState::Active => "active",
        AgentState::Inactive => "inactive",
        AgentState::Suspended => "suspended",
        AgentState::Frozen => "frozen",
        AgentState::Deleted => "deleted",
    }
}

impl AgentRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new agent record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, agent: &Agent) -> Result<Agent> {
        let capabilities = serde_json::to_string(&agent.capabilities)
            .map_err(|e| AppError::Db(format!("serialize capabilities: {e}")))?;

        sqlx::query(
            "INSERT INTO agent (id, owner_id, display_name, capabilities, state,
             last_heartbeat_at, activated_at, deactivated_at, deactivated_by,
             deactivation_reason, reporting_exempt, exemption_reason,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )
        .bind(&agent.id)
        .bind(&agent.owner_id)
        .bind(&agent.display_name)
        .bind(&capabilities)
        .bind(agent_state_str(agent.state))
        .bind(agent.last_heartbeat_at.map(|t| t.to_rfc3339()))
        .bind(agent.activated_at.map(|t| t.to_rfc3339()))
        .bind(agent.deactivated_at.map(|t| t.to_rfc3339()))
        .bind(&agent.deactivated_by)
        .bind(&agent.deactivation_reason)
        .bind(i64::from(agent.reporting_exempt))
        .bind(&agent.exemption_reason)
        .bind(agent.created_at.to_rfc3339())
        .bind(agent.updated_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;

        Ok(agent.clone())
    }

    /// Retrieve an agent by its ID.
    ///
    /// Returns `Ok(None)` if the agent does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Agent>> {
        let row: Option<AgentRow> = sqlx::query_as("SELECT * FROM agent WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(AgentRow::into_agent).transpose()
    }

    /// Conditionally swap the agent state.
    ///
    /// Issues a single `UPDATE ... WHERE id = ? AND state = ?`; returns
    /// `true` when exactly one row changed, `false` when the precondition
    /// did not hold (missing row or different state). The store's row
    /// atomicity makes this the race-resolution authority.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn swap_state(
        &self,
        id: &str,
        expected: AgentState,
        to: AgentState,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE agent SET state = ?1, updated_at = ?2 WHERE id = ?3 AND state = ?4",
        )
        .bind(agent_state_str(to))
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(agent_state_str(expected))
        .execute(self.db.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Conditionally activate an agent, stamping `activated_at`.
    ///
    /// Same contract as [`swap_state`](Self::swap_state).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn swap_to_active(&self, id: &str, expected: AgentState) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE agent SET state = 'active', activated_at = ?1, updated_at = ?1 \
             WHERE id = ?2 AND state = ?3",
        )
        .bind(&now)
        .bind(id)
        .bind(agent_state_str(expected))
        .execute(self.db.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Conditionally deactivate an `Active` agent, recording reason, actor,
    /// and timestamp in the same atomic update as the state swap.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn swap_to_inactive(&self, id: &str, reason: &str, actor_id: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE agent SET state = 'inactive', deactivated_at = ?1, \
             deactivated_by = ?2, deactivation_reason = ?3, updated_at = ?1 \
             WHERE id = ?4 AND state = 'active'",
        )
        .bind(&now)
        .bind(actor_id)
        .bind(reason)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Update reporting-exemption metadata; never touches `state`.
    ///
    /// Returns `false` when the agent does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_reporting_exemption(
        &self,
        id: &str,
        exempt: bool,
        reason: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE agent SET reporting_exempt = ?1, exemption_reason = ?2, updated_at = ?3 \
             WHERE id = ?4",
        )
        .bind(i64::from(exempt))
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a liveness signal at the given instant.
    ///
    /// Returns `false` when the agent does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_last_heartbeat(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE agent SET last_heartbeat_at = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// List agents the compliance sweep must examine: `active` and not
    /// reporting-exempt.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_compliance_candidates(&self) -> Result<Vec<Agent>> {
        let rows: Vec<AgentRow> = sqlx::query_as(
            "SELECT * FROM agent WHERE state = 'active' AND reporting_exempt = 0",
        )
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(AgentRow::into_agent).collect()
    }

    /// Count agents grouped by lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_by_state(&self) -> Result<Vec<(AgentState, u64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM agent GROUP BY state")
                .fetch_all(self.db.as_ref())
                .await?;

        rows.into_iter()
            .map(|(state, count)| {
                Ok((
                    parse_agent_state(&state)?,
                    u64::try_from(count).unwrap_or_default(),
                ))
            })
            .collect()
    }
}
