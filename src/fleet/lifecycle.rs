//! Lifecycle controller: policy over the agent registry.
//!
//! Every state mutation funnels through here. Legality is checked
//! against [`AgentState::can_transition_to`], and the swap itself is a
//! single conditional `UPDATE` in the registry, so the precondition and
//! the write share one atomicity boundary. Direct registry writes to
//! `state` from anywhere else are forbidden by convention.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, info_span, warn, Instrument};

use crate::audit::{AuditEntry, AuditEventType, AuditLogger};
use crate::models::agent::{Agent, AgentState, TransitionRecord};
use crate::persistence::agent_repo::AgentRepo;
use crate::{AppError, Result};

use super::scheduler::TaskScheduler;

/// Result of an [`activate`](LifecycleController::activate) call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivateOutcome {
    /// Agent transitioned to `Active`.
    Activated(TransitionRecord),
    /// Agent was already `Active`; idempotent success, no write issued.
    AlreadyActive,
}

/// Enforces legal lifecycle transitions against the agent registry.
pub struct LifecycleController {
    agents: AgentRepo,
    scheduler: Arc<TaskScheduler>,
    audit: Arc<dyn AuditLogger>,
}

impl LifecycleController {
    /// Create a new controller over the given registry.
    #[must_use]
    pub fn new(agents: AgentRepo, scheduler: Arc<TaskScheduler>, audit: Arc<dyn AuditLogger>) -> Self {
        Self {
            agents,
            scheduler,
            audit,
        }
    }

    /// Register a new agent. Initial state is `Active`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn register(
        &self,
        owner_id: String,
        display_name: String,
        capabilities: Vec<String>,
    ) -> Result<Agent> {
        let agent = Agent::new(owner_id, display_name, capabilities);
        let created = self.agents.create(&agent).await?;

        info!(agent_id = %created.id, owner_id = %created.owner_id, "agent registered");
        self.record_audit(
            AuditEntry::new(
                AuditEventType::AgentRegistered,
                "agent",
                created.id.clone(),
                "register",
            )
            .with_actor(created.owner_id.clone()),
        );

        Ok(created)
    }

    /// Fetch an agent, mapping a missing row to `NotFound`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the agent does not exist, or
    /// `AppError::Db` on query failure.
    pub async fn get_agent(&self, agent_id: &str) -> Result<Agent> {
        self.agents
            .get_by_id(agent_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("agent {agent_id}")))
    }

    /// Activate an agent from `Inactive` or `Suspended`.
    ///
    /// Whether a suspension window has elapsed is the caller's
    /// responsibility; this operation only enforces the state machine.
    /// Already-active agents yield an idempotent
    /// [`ActivateOutcome::AlreadyActive`] success.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown agents,
    /// `AppError::InvalidTransition` from `Frozen` or `Deleted`, and
    /// `AppError::StateMismatch` when a concurrent transition won the race.
    pub async fn activate(&self, agent_id: &str) -> Result<ActivateOutcome> {
        let span = info_span!("activate", agent_id);
        async {
            let agent = self.get_agent(agent_id).await?;
            let from = agent.state;

            match from {
                AgentState::Active => return Ok(ActivateOutcome::AlreadyActive),
                AgentState::Inactive | AgentState::Suspended => {}
                AgentState::Frozen | AgentState::Deleted => {
                    return Err(AppError::InvalidTransition(format!(
                        "agent {agent_id} cannot activate from {from:?}"
                    )));
                }
            }

            if !self.agents.swap_to_active(agent_id, from).await? {
                return Err(AppError::StateMismatch(format!(
                    "agent {agent_id} was no longer {from:?}"
                )));
            }

            info!(agent_id, ?from, "agent activated");
            self.record_audit(AuditEntry::new(
                AuditEventType::AgentTransition,
                "agent",
                agent_id,
                format!("activate from {from:?}"),
            ));

            Ok(ActivateOutcome::Activated(TransitionRecord {
                agent_id: agent_id.to_owned(),
                from,
                to: AgentState::Active,
                at: Utc::now(),
            }))
        }
        .instrument(span)
        .await
    }

    /// Deactivate an `Active` agent, recording reason, actor, and
    /// timestamp, then cancel its open tasks.
    ///
    /// Returns the transition record and the number of tasks cancelled.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown agents,
    /// `AppError::InvalidTransition` when the agent is not `Active`, and
    /// `AppError::StateMismatch` on a lost race.
    pub async fn deactivate(
        &self,
        agent_id: &str,
        reason: &str,
        actor_id: &str,
    ) -> Result<(TransitionRecord, u64)> {
        let span = info_span!("deactivate", agent_id, actor_id);
        async {
            let agent = self.get_agent(agent_id).await?;
            if agent.state != AgentState::Active {
                return Err(AppError::InvalidTransition(format!(
                    "agent {agent_id} cannot deactivate from {:?}",
                    agent.state
                )));
            }

            if !self.agents.swap_to_inactive(agent_id, reason, actor_id).await? {
                return Err(AppError::StateMismatch(format!(
                    "agent {agent_id} was no longer Active"
                )));
            }

            self.record_audit(
                AuditEntry::new(
                    AuditEventType::AgentTransition,
                    "agent",
                    agent_id,
                    "deactivate",
                )
                .with_actor(actor_id)
                .with_metadata(serde_json::json!({ "reason": reason })),
            );

            let cancelled = self
                .scheduler
                .cancel_tasks_for_agent(agent_id, "agent deactivated")
                .await?;

            info!(agent_id, cancelled, "agent deactivated; open tasks cancelled");

            Ok((
                TransitionRecord {
                    agent_id: agent_id.to_owned(),
                    from: AgentState::Active,
                    to: AgentState::Inactive,
                    at: Utc::now(),
                },
                cancelled,
            ))
        }
        .instrument(span)
        .await
    }

    /// Conditional compare-and-swap transition.
    ///
    /// Rejects edges the state machine forbids before touching the store;
    /// a legal edge whose precondition no longer holds in the registry
    /// fails with `StateMismatch`, protecting against racing escalations
    /// and administrative actions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` for illegal edges,
    /// `AppError::NotFound` for unknown agents, and
    /// `AppError::StateMismatch` when the actual state differs from
    /// `expected_from`.
    pub async fn transition(
        &self,
        agent_id: &str,
        expected_from: AgentState,
        to: AgentState,
    ) -> Result<TransitionRecord> {
        let span = info_span!("transition", agent_id, ?expected_from, ?to);
        async {
            if !expected_from.can_transition_to(to) {
                return Err(AppError::InvalidTransition(format!(
                    "edge {expected_from:?} -> {to:?} is not permitted"
                )));
            }

            if !self.agents.swap_state(agent_id, expected_from, to).await? {
                // Zero rows affected: re-read to distinguish a missing agent
                // from a lost race.
                return match self.agents.get_by_id(agent_id).await? {
                    None => Err(AppError::NotFound(format!("agent {agent_id}"))),
                    Some(actual) => Err(AppError::StateMismatch(format!(
                        "agent {agent_id} is {:?}, expected {expected_from:?}",
                        actual.state
                    ))),
                };
            }

            info!(agent_id, ?expected_from, ?to, "agent transitioned");
            self.record_audit(AuditEntry::new(
                AuditEventType::AgentTransition,
                "agent",
                agent_id,
                format!("transition {expected_from:?} -> {to:?}"),
            ));

            Ok(TransitionRecord {
                agent_id: agent_id.to_owned(),
                from: expected_from,
                to,
                at: Utc::now(),
            })
        }
        .instrument(span)
        .await
    }

    /// Update reporting-exemption metadata. Never changes `state`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown agents or `AppError::Db`
    /// on store failure.
    pub async fn set_reporting_exemption(
        &self,
        agent_id: &str,
        exempt: bool,
        reason: Option<&str>,
        actor_id: &str,
    ) -> Result<()> {
        if !self
            .agents
            .set_reporting_exemption(agent_id, exempt, reason)
            .await?
        {
            return Err(AppError::NotFound(format!("agent {agent_id}")));
        }

        info!(agent_id, exempt, actor_id, "reporting exemption updated");
        self.record_audit(
            AuditEntry::new(
                AuditEventType::ExemptionChanged,
                "agent",
                agent_id,
                if exempt { "exempt" } else { "unexempt" },
            )
            .with_actor(actor_id)
            .with_metadata(serde_json::json!({ "reason": reason })),
        );

        Ok(())
    }

    /// Record a single liveness signal for an agent.
    ///
    /// This is the direct registry write the compliance monitor reads.
    /// High-volume ingestion goes through
    /// [`HeartbeatIngest`](crate::fleet::heartbeat::HeartbeatIngest),
    /// which batches the same write.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown agents or `AppError::Db`
    /// on store failure.
    pub async fn record_heartbeat(&self, agent_id: &str) -> Result<()> {
        if !self.agents.set_last_heartbeat(agent_id, Utc::now()).await? {
            return Err(AppError::NotFound(format!("agent {agent_id}")));
        }
        Ok(())
    }

    /// Audit is fire-and-forget: a failed write is logged, never surfaced.
    fn record_audit(&self, entry: AuditEntry) {
        if let Err(err) = self.audit.record(entry) {
            warn!(%err, "audit record failed");
        }
    }
}
