#![forbid(unsafe_code)]

//! `fleet-warden` — agent fleet lifecycle controller binary.
//!
//! Bootstraps configuration, the `SQLite` store, the lifecycle
//! controller and task scheduler, the batched heartbeat ingest, and the
//! periodic heartbeat compliance sweep, then runs until a shutdown
//! signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use fleet_warden::audit::JsonlAuditWriter;
use fleet_warden::config::GlobalConfig;
use fleet_warden::fleet::heartbeat::HeartbeatIngest;
use fleet_warden::fleet::lifecycle::LifecycleController;
use fleet_warden::fleet::monitor::{self, ComplianceMonitor};
use fleet_warden::fleet::scheduler::TaskScheduler;
use fleet_warden::notify::{Notification, QueueNotifier};
use fleet_warden::persistence::agent_repo::AgentRepo;
use fleet_warden::persistence::db;
use fleet_warden::persistence::task_repo::TaskRepo;
use fleet_warden::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "fleet-warden", about = "Agent fleet lifecycle controller", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("fleet-warden server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = Arc::new(GlobalConfig::load_from_path(&args.config)?);
    info!("configuration loaded");

    // ── Initialize database ─────────────────────────────
    let db_path = config.db_path.to_string_lossy().to_string();
    let pool = Arc::new(db::connect(&db_path).await?);
    info!("database connected");

    // ── Audit and notification sinks ────────────────────
    let audit = Arc::new(JsonlAuditWriter::new(config.audit_log_dir.clone())?);

    let ct = CancellationToken::new();
    let (notifier, notifier_runtime) = QueueNotifier::start(
        Arc::new(|recipient: &str, n: &Notification| {
            // Delivery transport is an external adapter; log the hand-off.
            info!(recipient, kind = ?n.kind, title = %n.title, "notification delivered");
        }),
        ct.clone(),
    );

    // ── Wire fleet components ───────────────────────────
    let agents = AgentRepo::new(Arc::clone(&pool));
    let tasks = TaskRepo::new(Arc::clone(&pool));

    let scheduler = Arc::new(TaskScheduler::new(
        agents.clone(),
        tasks,
        Arc::clone(&audit) as Arc<dyn fleet_warden::audit::AuditLogger>,
    ));
    let lifecycle = Arc::new(LifecycleController::new(
        agents.clone(),
        Arc::clone(&scheduler),
        Arc::clone(&audit) as Arc<dyn fleet_warden::audit::AuditLogger>,
    ));
    let (heartbeats, heartbeat_runtime) = HeartbeatIngest::start(agents.clone(), &config.batch);
    let compliance = Arc::new(ComplianceMonitor::new(
        agents,
        Arc::clone(&lifecycle),
        Arc::new(notifier.clone()),
        Arc::clone(&audit) as Arc<dyn fleet_warden::audit::AuditLogger>,
        config.compliance.clone(),
        config.admin_recipient.clone(),
    ));

    // ── Start the compliance sweep timer ────────────────
    let sweep_handle = if config.compliance.enabled {
        Some(monitor::spawn_sweep_task(
            Arc::clone(&compliance),
            ct.clone(),
        ))
    } else {
        info!("compliance sweep disabled by configuration");
        None
    };

    info!("fleet-warden ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    if let Some(handle) = sweep_handle {
        if let Err(err) = handle.await {
            error!(%err, "sweep task join failed");
        }
    }
    if let Err(err) = heartbeats.flush().await {
        error!(%err, "heartbeat flush failed");
    }
    drop(heartbeats);
    heartbeat_runtime.await_completion().await;

    drop(notifier);
    notifier_runtime.await_completion().await;

    info!("fleet-warden shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
