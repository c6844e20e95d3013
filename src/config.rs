//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Heartbeat compliance thresholds and sweep cadence.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ComplianceConfig {
    /// Whether the periodic sweep is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between sweep runs.
    #[serde(default = "default_sweep_period")]
    pub sweep_period_seconds: u64,
    /// Expected heartbeat period in seconds; staleness is measured in
    /// multiples of this interval.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    /// Missed windows before a warning notification is emitted.
    #[serde(default = "default_warn_after")]
    pub warn_after_missed: u64,
    /// Missed windows before the agent is suspended.
    #[serde(default = "default_suspend_after")]
    pub suspend_after_missed: u64,
    /// Missed windows before the agent is frozen.
    #[serde(default = "default_freeze_after")]
    pub freeze_after_missed: u64,
    /// Suspension window length in seconds, recorded for the operator.
    /// Re-activation after the window is an administrative action, never
    /// automatic.
    #[serde(default = "default_suspension_seconds")]
    pub suspension_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_sweep_period() -> u64 {
    60
}

fn default_heartbeat_interval() -> u64 {
    60
}

fn default_warn_after() -> u64 {
    3
}

fn default_suspend_after() -> u64 {
    5
}

fn default_freeze_after() -> u64 {
    10
}

fn default_suspension_seconds() -> u64 {
    3600
}

impl ComplianceConfig {
    /// Sweep cadence as a [`Duration`].
    #[must_use]
    pub fn sweep_period(&self) -> Duration {
        Duration::from_secs(self.sweep_period_seconds)
    }
}

/// Batch dispatcher admission settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Queue length that forces a dispatch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Milliseconds the oldest queued item may wait before a dispatch is
    /// forced regardless of queue length.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

fn default_batch_size() -> usize {
    100
}

fn default_max_wait_ms() -> u64 {
    500
}

impl BatchConfig {
    /// Wait budget as a [`Duration`].
    #[must_use]
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Path to the `SQLite` database file.
    pub db_path: PathBuf,
    /// Recipient identifier for administrator notifications.
    pub admin_recipient: String,
    /// Directory for JSONL audit logs.
    pub audit_log_dir: PathBuf,
    /// Compliance sweep thresholds.
    #[serde(default)]
    pub compliance: ComplianceConfig,
    /// Batch dispatcher admission settings.
    #[serde(default)]
    pub batch: BatchConfig,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_period_seconds: default_sweep_period(),
            heartbeat_interval_seconds: default_heartbeat_interval(),
            warn_after_missed: default_warn_after(),
            suspend_after_missed: default_suspend_after(),
            freeze_after_missed: default_freeze_after(),
            suspension_seconds: default_suspension_seconds(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.admin_recipient.is_empty() {
            return Err(AppError::Config("admin_recipient must not be empty".into()));
        }

        let c = &self.compliance;
        if c.heartbeat_interval_seconds == 0 {
            return Err(AppError::Config(
                "heartbeat_interval_seconds must be greater than zero".into(),
            ));
        }
        if c.sweep_period_seconds == 0 {
            return Err(AppError::Config(
                "sweep_period_seconds must be greater than zero".into(),
            ));
        }
        if !(c.warn_after_missed < c.suspend_after_missed
            && c.suspend_after_missed < c.freeze_after_missed)
        {
            return Err(AppError::Config(
                "escalation thresholds must satisfy warn < suspend < freeze".into(),
            ));
        }

        if self.batch.batch_size == 0 {
            return Err(AppError::Config(
                "batch_size must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
