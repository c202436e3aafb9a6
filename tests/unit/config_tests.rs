//! Unit tests for configuration parsing and validation.

use std::time::Duration;

use tether::config::{GlobalConfig, MAX_PERIOD_SECONDS};
use tether::AppError;

#[test]
fn empty_document_uses_defaults() {
    let config = GlobalConfig::from_toml_str("").expect("defaults are valid");

    assert_eq!(config.agent_addr().unwrap().to_string(), "0.0.0.0:9998");
    assert_eq!(config.bridge_addr().unwrap().to_string(), "127.0.0.1:9999");
    assert_eq!(config.sweep_interval(), Duration::from_secs(30));
    assert_eq!(config.liveness_timeout(), Duration::from_secs(30));
    assert_eq!(config.max_sessions(), Some(1024));
    assert_eq!(config.auto_update_interval(), Some(Duration::from_secs(300)));
    assert!(config.events.log_dir.is_none());
    assert!(!config.http.enabled);
    assert_eq!(config.http_addr().unwrap().to_string(), "127.0.0.1:8080");
}

#[test]
fn default_impl_matches_empty_document() {
    let parsed = GlobalConfig::from_toml_str("").unwrap();
    assert_eq!(parsed, GlobalConfig::default());
}

#[test]
fn overrides_are_applied() {
    let config = GlobalConfig::from_toml_str(
        r#"
[listen]
agent_host = "127.0.0.1"
agent_port = 7000
bridge_port = 7001

[heartbeat]
sweep_interval_seconds = 10
timeout_seconds = 20

[limits]
max_sessions = 0
send_timeout_ms = 250

[auto_update]
interval_seconds = 0

[events]
log_dir = "/tmp/tether-events"
"#,
    )
    .expect("valid config");

    assert_eq!(config.agent_addr().unwrap().to_string(), "127.0.0.1:7000");
    assert_eq!(config.bridge_addr().unwrap().port(), 7001);
    assert_eq!(config.sweep_interval(), Duration::from_secs(10));
    assert_eq!(config.liveness_timeout(), Duration::from_secs(20));
    assert_eq!(config.max_sessions(), None);
    assert_eq!(config.send_timeout(), Duration::from_millis(250));
    assert_eq!(config.auto_update_interval(), None);
    assert!(config.events.log_dir.is_some());
}

#[test]
fn timeout_shorter_than_three_pings_is_rejected() {
    let err = GlobalConfig::from_toml_str("[heartbeat]\ntimeout_seconds = 5\n").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("timeout_seconds")));
}

#[test]
fn zero_sweep_interval_is_rejected() {
    let err =
        GlobalConfig::from_toml_str("[heartbeat]\nsweep_interval_seconds = 0\n").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn periods_longer_than_a_day_are_rejected() {
    let cases = [
        "[heartbeat]\nsweep_interval_seconds = 86401\n",
        "[heartbeat]\nsweep_interval_seconds = 9223372036854775807\n",
        "[auto_update]\ninterval_seconds = 86401\n",
        "[auto_update]\ninterval_seconds = 9223372036854775807\n",
    ];
    for raw in cases {
        let err = GlobalConfig::from_toml_str(raw).unwrap_err();
        assert!(
            matches!(err, AppError::Config(ref msg) if msg.contains("at most")),
            "{raw} should be rejected"
        );
    }
}

#[test]
fn one_day_period_is_accepted() {
    let raw = format!(
        "[heartbeat]\nsweep_interval_seconds = {MAX_PERIOD_SECONDS}\ntimeout_seconds = {MAX_PERIOD_SECONDS}\n\n[auto_update]\ninterval_seconds = {MAX_PERIOD_SECONDS}\n"
    );
    let config = GlobalConfig::from_toml_str(&raw).expect("one day is allowed");
    assert_eq!(config.sweep_interval(), Duration::from_secs(86_400));
    assert_eq!(config.auto_update_interval(), Some(Duration::from_secs(86_400)));
}

#[test]
fn http_section_is_parsed_and_checked_when_enabled() {
    let config = GlobalConfig::from_toml_str(
        "[http]\nenabled = true\nhost = \"0.0.0.0\"\nport = 8181\n",
    )
    .expect("valid http section");
    assert!(config.http.enabled);
    assert_eq!(config.http_addr().unwrap().to_string(), "0.0.0.0:8181");

    // A disabled listener's host is never parsed.
    GlobalConfig::from_toml_str("[http]\nhost = \"web\"\n").expect("disabled http is not checked");
    let err = GlobalConfig::from_toml_str("[http]\nenabled = true\nhost = \"web\"\n").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("web")));
}

#[test]
fn zero_send_timeout_is_rejected() {
    let err = GlobalConfig::from_toml_str("[limits]\nsend_timeout_ms = 0\n").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn non_ip_host_is_rejected() {
    let err = GlobalConfig::from_toml_str("[listen]\nbridge_host = \"localhost\"\n").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("localhost")));
}

#[test]
fn malformed_toml_is_a_config_error() {
    let err = GlobalConfig::from_toml_str("[listen\nagent_port = ").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.starts_with("invalid config")));
}

#[test]
fn load_from_missing_path_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    let err = GlobalConfig::load_from_path(temp.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("failed to read config")));
}

#[test]
fn load_from_path_reads_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("tether.toml");
    std::fs::write(&path, "[listen]\nagent_port = 12000\n").expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("load");
    assert_eq!(config.listen.agent_port, 12000);
}
