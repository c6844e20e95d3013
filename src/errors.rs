//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Requested agent or task does not exist.
    NotFound(String),
    /// Lifecycle edge not permitted by the state machine.
    InvalidTransition(String),
    /// Conditional state swap lost a race; actual state differed from expected.
    StateMismatch(String),
    /// Task does not belong to the calling agent.
    NotOwned(String),
    /// Task already reached a terminal status.
    AlreadyFinalized(String),
    /// Batch sink failed; every waiter in the batch receives this.
    SinkFailure(String),
    /// Unexpected internal fault; originating cause preserved in the message.
    Internal(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
            Self::StateMismatch(msg) => write!(f, "state mismatch: {msg}"),
            Self::NotOwned(msg) => write!(f, "not owned by caller: {msg}"),
            Self::AlreadyFinalized(msg) => write!(f, "already finalized: {msg}"),
            Self::SinkFailure(msg) => write!(f, "sink failure: {msg}"),
            Self::Internal(msg) => write!(f, "internal: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}
