//! Domain models persisted by the fleet controller.

pub mod agent;
pub mod task;
