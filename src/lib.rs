#![forbid(unsafe_code)]

//! Fleet lifecycle and task-dispatch control loop.
//!
//! Keeps a fleet of long-lived worker agents alive, enforces heartbeat
//! compliance with an escalating warn/suspend/freeze ladder, schedules
//! and tracks units of work against agents, and coalesces bursty writes
//! through a generic batch dispatcher.

pub mod audit;
pub mod batch;
pub mod config;
pub mod errors;
pub mod fleet;
pub mod models;
pub mod notify;
pub mod persistence;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
