//! Agent model and lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state for a registered agent.
///
/// `Deleted` is terminal; `Frozen` admits no in-core edges — clearing a
/// freeze is a privileged administrative action outside this crate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Agent is live and eligible for work and compliance checks.
    Active,
    /// Agent deactivated by an operator; may be re-activated.
    Inactive,
    /// Agent isolated for a bounded window after missed heartbeats.
    Suspended,
    /// Agent isolated indefinitely; requires administrator intervention.
    Frozen,
    /// Soft-deleted; row retained for audit history, never re-activated.
    Deleted,
}

impl AgentState {
    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: AgentState) -> bool {
        matches!(
            (self, next),
            (
                AgentState::Active,
                AgentState::Inactive
                    | AgentState::Suspended
                    | AgentState::Frozen
                    | AgentState::Deleted
            ) | (AgentState::Inactive, AgentState::Active | AgentState::Deleted)
                | (
                    AgentState::Suspended,
                    AgentState::Active | AgentState::Frozen | AgentState::Deleted
                )
        )
    }

    /// Whether no further transitions are permitted from this state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentState::Frozen | AgentState::Deleted)
    }
}

/// Agent domain entity persisted in `SQLite`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Agent {
    /// Unique record identifier.
    pub id: String,
    /// Owning principal; immutable after registration.
    pub owner_id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Capability tags advertised by the agent.
    pub capabilities: Vec<String>,
    /// Current lifecycle state. Mutated only through the lifecycle controller.
    pub state: AgentState,
    /// Most recent liveness signal, if any was ever recorded.
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Timestamp of the most recent activation.
    pub activated_at: Option<DateTime<Utc>>,
    /// Timestamp of the most recent deactivation.
    pub deactivated_at: Option<DateTime<Utc>>,
    /// Actor who performed the most recent deactivation.
    pub deactivated_by: Option<String>,
    /// Reason recorded at the most recent deactivation.
    pub deactivation_reason: Option<String>,
    /// Whether the agent is exempt from heartbeat compliance checks.
    pub reporting_exempt: bool,
    /// Reason for the reporting exemption, when set.
    pub exemption_reason: Option<String>,
    /// Registration timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Construct a newly registered agent in the `Active` state.
    #[must_use]
    pub fn new(owner_id: String, display_name: String, capabilities: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id,
            display_name,
            capabilities,
            state: AgentState::Active,
            last_heartbeat_at: None,
            activated_at: Some(now),
            deactivated_at: None,
            deactivated_by: None,
            deactivation_reason: None,
            reporting_exempt: false,
            exemption_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Record returned from a successful conditional state swap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TransitionRecord {
    /// Agent the transition applied to.
    pub agent_id: String,
    /// State the swap was conditioned on.
    pub from: AgentState,
    /// State the agent now holds.
    pub to: AgentState,
    /// When the swap was applied.
    pub at: DateTime<Utc>,
}
