//! Unit tests for agent target parsing and runtime settings validation.

use std::time::Duration;

use tether::agent::{AgentConfig, AgentTarget, DEFAULT_SERVER_PORT};
use tether::AppError;

#[test]
fn host_and_port_parse() {
    let target: AgentTarget = "192.168.1.20:7000".parse().unwrap();
    assert_eq!(target.host, "192.168.1.20");
    assert_eq!(target.port, 7000);
    assert_eq!(target.to_string(), "192.168.1.20:7000");
}

#[test]
fn bare_host_uses_default_port() {
    let target: AgentTarget = "server.lan".parse().unwrap();
    assert_eq!(target.host, "server.lan");
    assert_eq!(target.port, DEFAULT_SERVER_PORT);
}

#[test]
fn ipv6_forms_parse() {
    let bracketed: AgentTarget = "[::1]:7000".parse().unwrap();
    assert_eq!(bracketed.host, "::1");
    assert_eq!(bracketed.port, 7000);
    assert_eq!(bracketed.to_string(), "[::1]:7000");

    let bare: AgentTarget = "fe80::1".parse().unwrap();
    assert_eq!(bare.host, "fe80::1");
    assert_eq!(bare.port, DEFAULT_SERVER_PORT);

    let bracketed_no_port: AgentTarget = "[::1]".parse().unwrap();
    assert_eq!(bracketed_no_port.port, DEFAULT_SERVER_PORT);
}

#[test]
fn invalid_targets_are_rejected() {
    for raw in ["", "   ", "host:0", "host:abc", ":9998", "[::1", "[::1]x"] {
        let result = raw.parse::<AgentTarget>();
        assert!(
            matches!(result, Err(AppError::Config(_))),
            "expected rejection for {raw:?}"
        );
    }
}

#[test]
fn default_target_is_local_agent_port() {
    let target = AgentTarget::default();
    assert_eq!(target.to_string(), "127.0.0.1:9998");
}

#[test]
fn default_settings_are_valid() {
    let config = AgentConfig::new(AgentTarget::default());
    assert_eq!(config.ping_interval, Duration::from_secs(3));
    assert_eq!(config.reconnect_delay, Duration::from_secs(30));
    config.validate().expect("defaults valid");
}

#[test]
fn ping_interval_bounds_are_enforced() {
    let mut config = AgentConfig::new(AgentTarget::default());

    config.ping_interval = Duration::ZERO;
    assert!(config.validate().is_err());

    config.ping_interval = Duration::from_secs(11);
    config.idle_timeout = Duration::from_secs(60);
    assert!(config.validate().is_err(), "ping above a third of the timeout");

    config.ping_interval = Duration::from_secs(10);
    config.validate().expect("exactly a third is allowed");
}

#[test]
fn idle_timeout_must_exceed_ping() {
    let mut config = AgentConfig::new(AgentTarget::default());
    config.idle_timeout = config.ping_interval;
    assert!(config.validate().is_err());
}
