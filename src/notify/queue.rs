//! Buffered notification queue with a background delivery task.
//!
//! Mirrors the outgoing-message queue shape used for chat delivery: a
//! bounded `mpsc` channel accepts notifications without blocking the
//! caller, and a spawned consumer hands each one to the configured
//! delivery function until the channel closes or shutdown is requested.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Notification, Notifier};
use crate::{AppError, Result};

const QUEUE_CAPACITY: usize = 256;

/// Delivery function invoked by the background consumer for each
/// notification. The transport behind it is an external adapter.
pub type DeliverFn = dyn Fn(&str, &Notification) + Send + Sync;

/// A queued notification with its recipient.
#[derive(Debug, Clone)]
struct Outgoing {
    recipient: String,
    notification: Notification,
}

/// Notifier backed by a bounded queue and a background consumer task.
#[derive(Clone)]
pub struct QueueNotifier {
    queue_tx: mpsc::Sender<Outgoing>,
}

/// Join handle for the background delivery task.
pub struct QueueNotifierRuntime {
    handle: JoinHandle<()>,
}

impl QueueNotifierRuntime {
    /// Await the consumer's completion after the queue has been closed or
    /// the cancellation token fired.
    pub async fn await_completion(self) {
        let _ = self.handle.await;
    }
}

impl QueueNotifier {
    /// Start the queue and its background consumer.
    #[must_use]
    pub fn start(deliver: Arc<DeliverFn>, cancel: CancellationToken) -> (Self, QueueNotifierRuntime) {
        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);
        let handle = tokio::spawn(Self::run_queue(queue_rx, deliver, cancel));
        (Self { queue_tx }, QueueNotifierRuntime { handle })
    }

    /// Consumer loop: drain the queue until cancellation or close.
    async fn run_queue(
        mut queue_rx: mpsc::Receiver<Outgoing>,
        deliver: Arc<DeliverFn>,
        cancel: CancellationToken,
    ) {
        loop {
            let outgoing = tokio::select! {
                () = cancel.cancelled() => {
                    info!("notification queue shutting down");
                    break;
                }
                maybe = queue_rx.recv() => {
                    if let Some(o) = maybe { o } else {
                        info!("notification queue closed");
                        break;
                    }
                }
            };

            deliver(&outgoing.recipient, &outgoing.notification);
        }
    }
}

impl Notifier for QueueNotifier {
    fn notify(&self, recipient: &str, notification: Notification) -> Result<()> {
        let outgoing = Outgoing {
            recipient: recipient.to_owned(),
            notification,
        };

        // try_send keeps the caller non-blocking; a full queue drops the
        // notification rather than stalling lifecycle operations.
        self.queue_tx.try_send(outgoing).map_err(|err| {
            warn!(%err, "notification queue full or closed; dropping");
            AppError::Internal(format!("failed to enqueue notification: {err}"))
        })
    }
}
