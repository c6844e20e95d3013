//! Fleet control modules.
//!
//! Covers the lifecycle controller (policy over the agent registry),
//! the task scheduler, the periodic heartbeat compliance monitor, and
//! the batched heartbeat ingest in front of the registry.

pub mod heartbeat;
pub mod lifecycle;
pub mod monitor;
pub mod scheduler;
