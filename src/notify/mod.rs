//! Administrator notification channel.
//!
//! Provides the [`Notifier`] trait and associated types. Delivery is
//! best-effort and asynchronous: implementations enqueue without
//! blocking, and a failed delivery never fails the triggering
//! operation. The real transport (chat, email, pager) is an external
//! adapter; [`QueueNotifier`] owns the buffered hand-off to it.

pub mod queue;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::Result;

/// Classification of an administrator notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Agent missed enough heartbeat windows to warrant a warning.
    ComplianceWarning,
    /// Agent was suspended by the compliance sweep.
    AgentSuspended,
    /// Agent was frozen by the compliance sweep.
    AgentFrozen,
}

/// Urgency of a notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    /// Informational.
    Low,
    /// Needs attention soon.
    High,
    /// Needs immediate attention.
    Urgent,
}

/// A message addressed to an administrator or requester.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Classification of the event.
    pub kind: NotificationKind,
    /// Short headline.
    pub title: String,
    /// Full message body.
    pub message: String,
    /// Urgency.
    pub priority: NotificationPriority,
    /// Free-form structured context.
    pub metadata: Option<serde_json::Value>,
}

/// Delivers notifications to a recipient, best-effort.
///
/// Implementations must be [`Send`] and [`Sync`] to allow sharing across
/// async task boundaries via [`std::sync::Arc`].
pub trait Notifier: Send + Sync {
    /// Enqueue a notification for delivery without blocking the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification could not be enqueued (the
    /// caller is expected to log and continue, not abort).
    fn notify(&self, recipient: &str, notification: Notification) -> Result<()>;
}

/// Notifier that writes deliveries to the tracing log only.
///
/// Used when no delivery transport is configured, and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, recipient: &str, notification: Notification) -> Result<()> {
        info!(
            recipient,
            kind = ?notification.kind,
            title = %notification.title,
            "notification (log-only delivery)"
        );
        Ok(())
    }
}

pub use queue::{QueueNotifier, QueueNotifierRuntime};
