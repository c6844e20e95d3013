//! Unit tests for `GlobalConfig` parsing and validation.

use fleet_warden::config::GlobalConfig;
use fleet_warden::AppError;

const MINIMAL: &str = r#"
db_path = "/tmp/fleet-warden/fleet.db"
admin_recipient = "ops-team"
audit_log_dir = "/tmp/fleet-warden/logs"
"#;

#[test]
fn minimal_config_applies_defaults() {
    let config = GlobalConfig::from_toml_str(MINIMAL).expect("parse");

    assert!(config.compliance.enabled);
    assert_eq!(config.compliance.sweep_period_seconds, 60);
    assert_eq!(config.compliance.heartbeat_interval_seconds, 60);
    assert_eq!(config.compliance.warn_after_missed, 3);
    assert_eq!(config.compliance.suspend_after_missed, 5);
    assert_eq!(config.compliance.freeze_after_missed, 10);
    assert_eq!(config.compliance.suspension_seconds, 3600);
    assert_eq!(config.batch.batch_size, 100);
    assert_eq!(config.batch.max_wait_ms, 500);
}

#[test]
fn explicit_sections_override_defaults() {
    let raw = format!(
        "{MINIMAL}
[compliance]
sweep_period_seconds = 30
heartbeat_interval_seconds = 15
warn_after_missed = 2
suspend_after_missed = 4
freeze_after_missed = 8

[batch]
batch_size = 32
max_wait_ms = 100
"
    );
    let config = GlobalConfig::from_toml_str(&raw).expect("parse");

    assert_eq!(config.compliance.sweep_period_seconds, 30);
    assert_eq!(config.compliance.heartbeat_interval_seconds, 15);
    assert_eq!(config.batch.batch_size, 32);
    assert_eq!(config.batch.max_wait_ms, 100);
}

#[test]
fn empty_admin_recipient_is_rejected() {
    let raw = r#"
db_path = "/tmp/fleet.db"
admin_recipient = ""
audit_log_dir = "/tmp/logs"
"#;
    let err = GlobalConfig::from_toml_str(raw).expect_err("should fail validation");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn unordered_escalation_thresholds_are_rejected() {
    let raw = format!(
        "{MINIMAL}
[compliance]
warn_after_missed = 5
suspend_after_missed = 5
freeze_after_missed = 10
"
    );
    let err = GlobalConfig::from_toml_str(&raw).expect_err("should fail validation");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn zero_heartbeat_interval_is_rejected() {
    let raw = format!(
        "{MINIMAL}
[compliance]
heartbeat_interval_seconds = 0
"
    );
    let err = GlobalConfig::from_toml_str(&raw).expect_err("should fail validation");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn zero_batch_size_is_rejected() {
    let raw = format!(
        "{MINIMAL}
[batch]
batch_size = 0
"
    );
    let err = GlobalConfig::from_toml_str(&raw).expect_err("should fail validation");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn invalid_toml_is_rejected() {
    let err = GlobalConfig::from_toml_str("not valid [toml").expect_err("should fail parse");
    assert!(matches!(err, AppError::Config(_)));
}
