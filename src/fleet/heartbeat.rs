//! Batched heartbeat ingestion.
//!
//! Heartbeats are the highest-volume write in the fleet: every active
//! agent reports once per interval, and reconnect storms arrive all at
//! once. [`HeartbeatIngest`] sits in front of the registry and coalesces
//! those writes through the batch dispatcher, so a burst costs one
//! short-lived batch per `batch_size` signals instead of one store
//! round-trip each.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::BoxFuture;

use crate::batch::{BatchDispatcher, BatchDispatcherRuntime, BatchSink};
use crate::config::BatchConfig;
use crate::persistence::agent_repo::AgentRepo;
use crate::{AppError, Result};

/// Sink that stamps one shared timestamp over a batch of agent ids.
///
/// Returns one bool per id, true when the agent exists. An unknown agent
/// therefore fails only its own caller, not the batch.
struct RegistrySink {
    agents: AgentRepo,
}

impl BatchSink<String, bool> for RegistrySink {
    fn dispatch(&self, items: Vec<String>) -> BoxFuture<'static, Result<Vec<bool>>> {
        let agents = self.agents.clone();
        Box::pin(async move {
            let now = Utc::now();
            let mut known = Vec::with_capacity(items.len());
            for agent_id in &items {
                known.push(agents.set_last_heartbeat(agent_id, now).await?);
            }
            Ok(known)
        })
    }
}

/// Admission layer for heartbeat writes.
///
/// Clone handles freely; all of them feed the same worker. Dropping the
/// last handle (after a final [`flush`](Self::flush)) lets the worker
/// drain and exit.
#[derive(Clone)]
pub struct HeartbeatIngest {
    dispatcher: BatchDispatcher<String, bool>,
}

impl HeartbeatIngest {
    /// Start the ingest worker over the agent registry.
    #[must_use]
    pub fn start(agents: AgentRepo, config: &BatchConfig) -> (Self, BatchDispatcherRuntime) {
        let sink: Arc<dyn BatchSink<String, bool>> = Arc::new(RegistrySink { agents });
        let (dispatcher, runtime) =
            BatchDispatcher::start(sink, config.batch_size, config.max_wait());
        (Self { dispatcher }, runtime)
    }

    /// Record a liveness signal, suspending until the batch it joined has
    /// been written.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown agents,
    /// `AppError::SinkFailure` when the batch write failed as a whole, or
    /// `AppError::Internal` when the ingest worker has shut down.
    pub async fn record(&self, agent_id: &str) -> Result<()> {
        if self.dispatcher.add(agent_id.to_owned()).await? {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("agent {agent_id}")))
        }
    }

    /// Force out whatever is queued; returns the number of signals written.
    ///
    /// Called at shutdown so in-flight heartbeats are not stranded.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` when the ingest worker has shut down.
    pub async fn flush(&self) -> Result<usize> {
        self.dispatcher.flush().await
    }
}
