//! Compliance monitor: periodic heartbeat-staleness sweep.
//!
//! A single recurring sweep examines every `Active`, non-exempt agent,
//! computes how many expected heartbeat windows it has missed, and
//! applies the escalation ladder — warn, suspend, freeze — most severe
//! first, first match wins. Actions are isolated per agent: one failure
//! (typically a transition race lost to an administrative action) is
//! logged and the sweep continues.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::audit::{AuditEntry, AuditEventType, AuditLogger};
use crate::config::ComplianceConfig;
use crate::models::agent::{Agent, AgentState};
use crate::notify::{Notification, NotificationKind, NotificationPriority, Notifier};
use crate::persistence::agent_repo::AgentRepo;
use crate::Result;

use super::lifecycle::LifecycleController;

/// Outcome counts for one sweep run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SweepReport {
    /// Agents examined (active, non-exempt).
    pub examined: u64,
    /// Agents skipped because no heartbeat was ever recorded.
    pub never_reported: u64,
    /// Warning notifications emitted.
    pub warned: u64,
    /// Agents suspended.
    pub suspended: u64,
    /// Agents frozen.
    pub frozen: u64,
    /// Per-agent actions that failed (lost races, store errors).
    pub failures: u64,
}

/// Point-in-time fleet compliance overview.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ComplianceSummary {
    /// Agent counts by lifecycle state.
    pub active: u64,
    /// Deactivated agents.
    pub inactive: u64,
    /// Suspended agents.
    pub suspended: u64,
    /// Frozen agents awaiting administrator action.
    pub frozen: u64,
    /// Soft-deleted agents.
    pub deleted: u64,
    /// Active agents subject to compliance checks.
    pub monitored: u64,
    /// Monitored agents with no heartbeat ever recorded.
    pub never_reported: u64,
    /// Monitored agents currently in the warning band.
    pub warning: u64,
    /// When the periodic sweep last completed, if it has run.
    pub last_sweep_at: Option<DateTime<Utc>>,
}

/// Escalation action chosen by the ladder for one agent.
enum Rung {
    Freeze,
    Suspend,
    Warn,
    None,
}

/// Periodic heartbeat compliance sweep over the agent fleet.
pub struct ComplianceMonitor {
    agents: AgentRepo,
    lifecycle: Arc<LifecycleController>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditLogger>,
    config: ComplianceConfig,
    admin_recipient: String,
    /// Ephemeral consecutive-missed-window counts; reset whenever a
    /// heartbeat is observed inside the expected window. Never persisted.
    missed_counters: Mutex<HashMap<String, u64>>,
    last_sweep_at: Mutex<Option<DateTime<Utc>>>,
}

impl ComplianceMonitor {
    /// Create a new monitor.
    #[must_use]
    pub fn new(
        agents: AgentRepo,
        lifecycle: Arc<LifecycleController>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditLogger>,
        config: ComplianceConfig,
        admin_recipient: String,
    ) -> Self {
        Self {
            agents,
            lifecycle,
            notifier,
            audit,
            config,
            admin_recipient,
            missed_counters: Mutex::new(HashMap::new()),
            last_sweep_at: Mutex::new(None),
        }
    }

    /// Run one compliance sweep immediately.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` only when the qualifying-agent query itself
    /// fails; per-agent action failures are counted in the report, not
    /// surfaced.
    pub async fn run_sweep_once(&self) -> Result<SweepReport> {
        let span = info_span!("compliance_sweep");
        self.sweep().instrument(span).await
    }

    async fn sweep(&self) -> Result<SweepReport> {
        let candidates = self.agents.list_compliance_candidates().await?;
        let now = Utc::now();
        let mut report = SweepReport::default();

        for agent in candidates {
            report.examined += 1;

            let Some(missed) = self.missed_windows(&agent, now) else {
                // Never heartbeated: treated as newly registered, not yet due.
                report.never_reported += 1;
                continue;
            };

            self.track_counter(&agent.id, missed);

            match self.rung_for(missed) {
                Rung::Freeze => match self.freeze(&agent, now, missed).await {
                    Ok(()) => {
                        report.frozen += 1;
                        self.forget_counter(&agent.id);
                    }
                    Err(err) => {
                        warn!(agent_id = %agent.id, %err, "freeze action failed; continuing sweep");
                        report.failures += 1;
                    }
                },
                Rung::Suspend => match self.suspend(&agent, missed).await {
                    Ok(()) => {
                        report.suspended += 1;
                        self.forget_counter(&agent.id);
                    }
                    Err(err) => {
                        warn!(agent_id = %agent.id, %err, "suspend action failed; continuing sweep");
                        report.failures += 1;
                    }
                },
                Rung::Warn => {
                    self.warn_admins(&agent, missed);
                    report.warned += 1;
                }
                Rung::None => {}
            }
        }

        if let Ok(mut last) = self.last_sweep_at.lock() {
            *last = Some(now);
        }

        info!(
            examined = report.examined,
            warned = report.warned,
            suspended = report.suspended,
            frozen = report.frozen,
            failures = report.failures,
            "compliance sweep completed"
        );

        Ok(report)
    }

    /// Point-in-time compliance overview for operators.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if a registry query fails.
    pub async fn compliance_summary(&self) -> Result<ComplianceSummary> {
        let mut summary = ComplianceSummary::default();

        for (state, count) in self.agents.count_by_state().await? {
            match state {
                AgentState::Active => summary.active = count,
                AgentState::Inactive => summary.inactive = count,
                AgentState::Suspended => summary.suspended = count,
                AgentState::Frozen => summary.frozen = count,
                AgentState::Deleted => summary.deleted = count,
            }
        }

        let now = Utc::now();
        for agent in self.agents.list_compliance_candidates().await? {
            summary.monitored += 1;
            match self.missed_windows(&agent, now) {
                None => summary.never_reported += 1,
                Some(missed) if missed >= self.config.warn_after_missed => summary.warning += 1,
                Some(_) => {}
            }
        }

        summary.last_sweep_at = self.last_sweep_at.lock().ok().and_then(|g| *g);
        Ok(summary)
    }

    /// Number of whole heartbeat windows elapsed since the last signal,
    /// or `None` when no heartbeat was ever recorded.
    fn missed_windows(&self, agent: &Agent, now: DateTime<Utc>) -> Option<u64> {
        let last = agent.last_heartbeat_at?;
        let elapsed = (now - last).num_seconds().max(0);
        let elapsed = u64::try_from(elapsed).unwrap_or_default();
        Some(elapsed / self.config.heartbeat_interval_seconds)
    }

    /// First matching rung, most severe first; not cumulative.
    fn rung_for(&self, missed: u64) -> Rung {
        if missed >= self.config.freeze_after_missed {
            Rung::Freeze
        } else if missed >= self.config.suspend_after_missed {
            Rung::Suspend
        } else if missed >= self.config.warn_after_missed {
            Rung::Warn
        } else {
            Rung::None
        }
    }

    async fn freeze(&self, agent: &Agent, now: DateTime<Utc>, missed: u64) -> Result<()> {
        let elapsed_seconds = agent
            .last_heartbeat_at
            .map_or(0, |last| (now - last).num_seconds().max(0));

        self.lifecycle
            .transition(&agent.id, AgentState::Active, AgentState::Frozen)
            .await?;

        warn!(agent_id = %agent.id, elapsed_seconds, missed, "agent frozen for heartbeat silence");
        self.record_audit(
            AuditEntry::new(AuditEventType::ComplianceAction, "agent", agent.id.as_str(), "freeze")
                .with_metadata(serde_json::json!({
                    "elapsed_seconds": elapsed_seconds,
                    "missed_windows": missed,
                })),
        );
        self.send(Notification {
            kind: NotificationKind::AgentFrozen,
            title: format!("Agent {} frozen", agent.display_name),
            message: format!(
                "Agent {} sent no heartbeat for {elapsed_seconds}s ({missed} missed windows) \
                 and has been frozen. Administrator action is required to clear it.",
                agent.id
            ),
            priority: NotificationPriority::Urgent,
            metadata: Some(serde_json::json!({ "agent_id": agent.id })),
        });

        Ok(())
    }

    async fn suspend(&self, agent: &Agent, missed: u64) -> Result<()> {
        self.lifecycle
            .transition(&agent.id, AgentState::Active, AgentState::Suspended)
            .await?;

        let window = self.config.suspension_seconds;
        warn!(agent_id = %agent.id, missed, window, "agent suspended for heartbeat silence");
        self.record_audit(
            AuditEntry::new(AuditEventType::ComplianceAction, "agent", agent.id.as_str(), "suspend")
                .with_metadata(serde_json::json!({
                    "missed_windows": missed,
                    "suspension_seconds": window,
                })),
        );
        self.send(Notification {
            kind: NotificationKind::AgentSuspended,
            title: format!("Agent {} suspended", agent.display_name),
            message: format!(
                "Agent {} missed {missed} heartbeat windows and has been suspended for \
                 {window}s. Re-activation after the window is an administrative action.",
                agent.id
            ),
            priority: NotificationPriority::High,
            metadata: Some(serde_json::json!({ "agent_id": agent.id })),
        });

        Ok(())
    }

    fn warn_admins(&self, agent: &Agent, missed: u64) {
        info!(agent_id = %agent.id, missed, "heartbeat warning");
        self.record_audit(
            AuditEntry::new(AuditEventType::ComplianceAction, "agent", agent.id.as_str(), "warn")
                .with_metadata(serde_json::json!({ "missed_windows": missed })),
        );
        self.send(Notification {
            kind: NotificationKind::ComplianceWarning,
            title: format!("Agent {} missing heartbeats", agent.display_name),
            message: format!(
                "Agent {} has missed {missed} heartbeat windows. No state change yet.",
                agent.id
            ),
            priority: NotificationPriority::Low,
            metadata: Some(serde_json::json!({ "agent_id": agent.id })),
        });
    }

    /// Update the ephemeral counter: remember consecutive missed windows,
    /// reset when a heartbeat landed inside the expected window.
    fn track_counter(&self, agent_id: &str, missed: u64) {
        if let Ok(mut counters) = self.missed_counters.lock() {
            if missed == 0 {
                counters.remove(agent_id);
            } else {
                counters.insert(agent_id.to_owned(), missed);
            }
        }
    }

    fn forget_counter(&self, agent_id: &str) {
        if let Ok(mut counters) = self.missed_counters.lock() {
            counters.remove(agent_id);
        }
    }

    /// Current consecutive-missed-window count for an agent (0 when the
    /// agent is not being tracked).
    #[must_use]
    pub fn missed_count(&self, agent_id: &str) -> u64 {
        self.missed_counters
            .lock()
            .ok()
            .and_then(|c| c.get(agent_id).copied())
            .unwrap_or(0)
    }

    /// Notification delivery is best-effort; failures are logged only.
    fn send(&self, notification: Notification) {
        if let Err(err) = self.notifier.notify(&self.admin_recipient, notification) {
            warn!(%err, "admin notification failed");
        }
    }

    /// Audit is fire-and-forget: a failed write is logged, never surfaced.
    fn record_audit(&self, entry: AuditEntry) {
        if let Err(err) = self.audit.record(entry) {
            warn!(%err, "audit record failed");
        }
    }
}

/// Spawn the periodic sweep background task.
///
/// The task ticks at the configured sweep period until the cancellation
/// token fires. Sweep failures are logged and the timer keeps running.
#[must_use]
pub fn spawn_sweep_task(
    monitor: Arc<ComplianceMonitor>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(monitor.config.sweep_period());
        // The first tick fires immediately; skip it so a newly started
        // server does not sweep before agents had a chance to report.
        interval.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("compliance sweep task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = monitor.run_sweep_once().await {
                        error!(?err, "compliance sweep failed");
                    }
                }
            }
        }
    })
}
