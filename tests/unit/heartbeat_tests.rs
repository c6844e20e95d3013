//! Unit tests for the batched heartbeat ingest.
//!
//! Validates:
//! - A recorded signal lands in the registry
//! - An unknown agent fails only its own caller, not its batch
//! - Bursts coalesce into full batches with a flushed remainder

use std::sync::Arc;
use std::time::Duration;

use fleet_warden::config::BatchConfig;
use fleet_warden::errors::AppError;
use fleet_warden::fleet::heartbeat::HeartbeatIngest;
use fleet_warden::models::agent::Agent;
use fleet_warden::persistence::agent_repo::AgentRepo;
use fleet_warden::persistence::db;

fn batch_config(batch_size: usize, max_wait_ms: u64) -> BatchConfig {
    BatchConfig {
        batch_size,
        max_wait_ms,
    }
}

async fn repo() -> AgentRepo {
    let pool = db::connect_memory().await.expect("db");
    AgentRepo::new(Arc::new(pool))
}

async fn registered(repo: &AgentRepo, name: &str) -> Agent {
    let agent = Agent::new("owner-1".into(), name.into(), vec!["build".into()]);
    repo.create(&agent).await.expect("create");
    agent
}

#[tokio::test]
async fn recorded_signal_lands_in_the_registry() {
    let repo = repo().await;
    let agent = registered(&repo, "worker-a").await;

    let (ingest, runtime) = HeartbeatIngest::start(repo.clone(), &batch_config(1, 1_000));
    ingest.record(&agent.id).await.expect("heartbeat");

    let fetched = repo
        .get_by_id(&agent.id)
        .await
        .expect("query")
        .expect("exists");
    let at = fetched.last_heartbeat_at.expect("heartbeat stamped");
    assert!((chrono::Utc::now() - at).num_seconds().abs() < 5);

    drop(ingest);
    runtime.await_completion().await;
}

#[tokio::test]
async fn unknown_agent_fails_only_its_own_caller() {
    let repo = repo().await;
    let agent = registered(&repo, "worker-b").await;

    // Batch size two: both signals land in the same dispatch.
    let (ingest, runtime) = HeartbeatIngest::start(repo.clone(), &batch_config(2, 30_000));

    let known = ingest.clone();
    let known_id = agent.id.clone();
    let known = tokio::spawn(async move { known.record(&known_id).await });
    let missing = ingest.record("missing").await;

    assert!(matches!(missing, Err(AppError::NotFound(_))));
    known
        .await
        .expect("join")
        .expect("known agent heartbeat succeeds");

    let fetched = repo
        .get_by_id(&agent.id)
        .await
        .expect("query")
        .expect("exists");
    assert!(fetched.last_heartbeat_at.is_some());

    drop(ingest);
    runtime.await_completion().await;
}

#[tokio::test]
async fn burst_coalesces_with_a_flushed_remainder() {
    let repo = repo().await;
    let agent = registered(&repo, "worker-c").await;

    // Long wait budget so only batch size and flush trigger dispatches.
    let (ingest, runtime) = HeartbeatIngest::start(repo.clone(), &batch_config(10, 60_000));

    let mut waiters = Vec::new();
    for _ in 0..25 {
        let handle = ingest.clone();
        let id = agent.id.clone();
        waiters.push(tokio::spawn(async move { handle.record(&id).await }));
    }

    // Let the burst reach the worker: 20 signals dispatch as two full
    // batches, 5 stay queued until the flush below.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let flushed = ingest.flush().await.expect("flush");
    assert_eq!(flushed, 5);

    for waiter in waiters {
        waiter.await.expect("join").expect("heartbeat");
    }

    let fetched = repo
        .get_by_id(&agent.id)
        .await
        .expect("query")
        .expect("exists");
    assert!(fetched.last_heartbeat_at.is_some());

    drop(ingest);
    runtime.await_completion().await;
}
