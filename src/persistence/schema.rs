//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` — safe to
//! re-run on every server startup. Produces a convergent result.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// Creates both tables idempotently. Safe to call on every startup.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS agent (
    id                  TEXT PRIMARY KEY NOT NULL,
    owner_id            TEXT NOT NULL,
    display_name        TEXT NOT NULL,
    capabilities        TEXT NOT NULL,
    state               TEXT NOT NULL CHECK(state IN ('active','inactive','suspended','frozen','deleted')),
    last_heartbeat_at   TEXT,
    activated_at        TEXT,
    deactivated_at      TEXT,
    deactivated_by      TEXT,
    deactivation_reason TEXT,
    reporting_exempt    INTEGER NOT NULL DEFAULT 0,
    exemption_reason    TEXT,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS task (
    id              TEXT PRIMARY KEY NOT NULL,
    agent_id        TEXT NOT NULL,
    requester_id    TEXT NOT NULL,
    task_type       TEXT NOT NULL,
    priority        INTEGER NOT NULL DEFAULT 0,
    payload         TEXT NOT NULL,
    status          TEXT NOT NULL CHECK(status IN ('pending','assigned','in_progress','completed','failed','cancelled')),
    created_at      TEXT NOT NULL,
    deadline        TEXT,
    completed_at    TEXT,
    error           TEXT,
    result          TEXT,
    cancel_reason   TEXT
);

CREATE INDEX IF NOT EXISTS idx_agent_state ON agent(state);
CREATE INDEX IF NOT EXISTS idx_task_agent ON task(agent_id);
CREATE INDEX IF NOT EXISTS idx_task_agent_status ON task(agent_id, status);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
