//! Structured audit logging for fleet lifecycle and task events.
//!
//! Provides the [`AuditLogger`] trait and associated types. The primary
//! implementation, [`JsonlAuditWriter`], appends JSONL records to
//! per-resource-type, daily-rotating files. Recording is
//! fire-and-forget at every call site: a failed write is logged and
//! never blocks the triggering operation.

pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type classification for audit log entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Agent registered into the fleet.
    AgentRegistered,
    /// Agent lifecycle state changed.
    AgentTransition,
    /// Agent reporting-exemption metadata changed.
    ExemptionChanged,
    /// Task created by a requester.
    TaskScheduled,
    /// Task reached a terminal status.
    TaskFinalized,
    /// Open tasks cancelled as a lifecycle side effect.
    TasksCancelled,
    /// Compliance sweep took an escalation action.
    ComplianceAction,
}

/// A structured record of a fleet event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// ISO 8601 timestamp with timezone.
    pub timestamp: DateTime<Utc>,
    /// Event classification.
    pub event_type: AuditEventType,
    /// Kind of resource acted on (`agent` or `task`).
    pub resource_type: String,
    /// Identifier of the resource acted on.
    pub resource_id: String,
    /// Brief description of the action taken.
    pub action: String,
    /// Principal that performed the action, when known.
    pub actor_id: Option<String>,
    /// Free-form structured context.
    pub metadata: Option<serde_json::Value>,
}

impl AuditEntry {
    /// Construct a minimal audit entry for the given event and resource.
    #[must_use]
    pub fn new(
        event_type: AuditEventType,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            action: action.into(),
            actor_id: None,
            metadata: None,
        }
    }

    /// Set the acting principal for this entry.
    #[must_use]
    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Attach structured context to this entry.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Writes structured audit entries to a persistent store.
///
/// Implementations must be [`Send`] and [`Sync`] to allow sharing across
/// async task boundaries via [`std::sync::Arc`].
pub trait AuditLogger: Send + Sync {
    /// Record a single audit entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write operation fails.
    fn record(&self, entry: AuditEntry) -> crate::Result<()>;
}

/// No-op audit logger for contexts where auditing is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditLogger;

impl AuditLogger for NullAuditLogger {
    fn record(&self, _entry: AuditEntry) -> crate::Result<()> {
        Ok(())
    }
}

pub use writer::JsonlAuditWriter;
