//! Global configuration parsing and validation.
//!
//! Every section is optional in the TOML file; missing keys fall back to
//! the deployment defaults (agent port 9998, bridge port 9999, 30 s sweep
//! and 30 s liveness timeout).

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::protocol::{DEFAULT_LIVENESS_TIMEOUT, DEFAULT_PING_INTERVAL};
use crate::{AppError, Result};

/// Minimum ratio between the liveness timeout and the agent ping interval.
///
/// With a ratio of three, an agent can lose two consecutive pings before
/// its session becomes eviction-eligible.
pub const MIN_TIMEOUT_TO_PING_RATIO: u32 = 3;

/// Longest accepted period for the sweep and auto-update timers: one day.
pub const MAX_PERIOD_SECONDS: u64 = 86_400;

/// Listener addresses for the agent-facing and bridge sockets.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct ListenConfig {
    /// Interface the agent listener binds to.
    pub agent_host: String,
    /// Agent listener port.
    pub agent_port: u16,
    /// Interface the bridge listener binds to.
    pub bridge_host: String,
    /// Bridge listener port.
    pub bridge_port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            agent_host: "0.0.0.0".into(),
            agent_port: 9998,
            bridge_host: "127.0.0.1".into(),
            bridge_port: 9999,
        }
    }
}

/// Heartbeat sweep cadence and liveness window.
///
/// The defaults evict a session as soon as it misses a single sweep
/// window. This is deliberately aggressive; agents ping every three
/// seconds, so a healthy agent is never close to the limit.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct HeartbeatConfig {
    /// Period between monitor sweeps.
    pub sweep_interval_seconds: u64,
    /// Silence after which a session is evicted.
    pub timeout_seconds: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: DEFAULT_LIVENESS_TIMEOUT.as_secs(),
            timeout_seconds: DEFAULT_LIVENESS_TIMEOUT.as_secs(),
        }
    }
}

/// Resource bounds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct LimitsConfig {
    /// Maximum concurrent agent sessions; 0 means unbounded.
    pub max_sessions: usize,
    /// Upper bound for a single outbound write to an agent.
    pub send_timeout_ms: u64,
    /// Grace period for connection tasks to finish during shutdown.
    pub shutdown_grace_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1024,
            send_timeout_ms: 5000,
            shutdown_grace_ms: 3000,
        }
    }
}

/// Periodic `AUTO_UPDATE_CHECK` broadcast.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct AutoUpdateConfig {
    /// Broadcast period; 0 disables the broadcaster.
    pub interval_seconds: u64,
}

impl Default for AutoUpdateConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
        }
    }
}

/// Optional HTTP operator API. Off unless `enabled` is set.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct HttpConfig {
    /// Start the HTTP listener.
    pub enabled: bool,
    /// Interface the HTTP listener binds to.
    pub host: String,
    /// HTTP listener port.
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

/// Event log sink settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct EventsConfig {
    /// Directory for daily JSONL event files. Events go to `tracing` only
    /// when unset.
    pub log_dir: Option<PathBuf>,
}

/// Global configuration parsed from `tether.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Listener addresses.
    pub listen: ListenConfig,
    /// Heartbeat monitor settings.
    pub heartbeat: HeartbeatConfig,
    /// Capacity and I/O bounds.
    pub limits: LimitsConfig,
    /// Auto-update broadcaster settings.
    pub auto_update: AutoUpdateConfig,
    /// Event log settings.
    pub events: EventsConfig,
    /// HTTP operator API settings.
    pub http: HttpConfig,
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

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Socket address for the agent listener.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if host and port do not form an address.
    pub fn agent_addr(&self) -> Result<SocketAddr> {
        parse_socket_addr(&self.listen.agent_host, self.listen.agent_port)
    }

    /// Socket address for the bridge listener.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if host and port do not form an address.
    pub fn bridge_addr(&self) -> Result<SocketAddr> {
        parse_socket_addr(&self.listen.bridge_host, self.listen.bridge_port)
    }

    /// Socket address for the HTTP operator API.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if host and port do not form an address.
    pub fn http_addr(&self) -> Result<SocketAddr> {
        parse_socket_addr(&self.http.host, self.http.port)
    }

    /// Period between heartbeat sweeps.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat.sweep_interval_seconds)
    }

    /// Silence after which a session is evicted.
    #[must_use]
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat.timeout_seconds)
    }

    /// Bound on a single outbound write.
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.limits.send_timeout_ms)
    }

    /// Grace period for connection tasks during shutdown.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.limits.shutdown_grace_ms)
    }

    /// Registry capacity, `None` when unbounded.
    #[must_use]
    pub fn max_sessions(&self) -> Option<usize> {
        (self.limits.max_sessions > 0).then_some(self.limits.max_sessions)
    }

    /// Auto-update broadcast period, `None` when disabled.
    #[must_use]
    pub fn auto_update_interval(&self) -> Option<Duration> {
        (self.auto_update.interval_seconds > 0)
            .then(|| Duration::from_secs(self.auto_update.interval_seconds))
    }

    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when a value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.sweep_interval_seconds == 0 {
            return Err(AppError::Config(
                "heartbeat.sweep_interval_seconds must be greater than zero".into(),
            ));
        }
        if self.heartbeat.sweep_interval_seconds > MAX_PERIOD_SECONDS {
            return Err(AppError::Config(format!(
                "heartbeat.sweep_interval_seconds must be at most {MAX_PERIOD_SECONDS}"
            )));
        }
        if self.auto_update.interval_seconds > MAX_PERIOD_SECONDS {
            return Err(AppError::Config(format!(
                "auto_update.interval_seconds must be at most {MAX_PERIOD_SECONDS}"
            )));
        }

        let min_timeout = DEFAULT_PING_INTERVAL * MIN_TIMEOUT_TO_PING_RATIO;
        if self.liveness_timeout() < min_timeout {
            return Err(AppError::Config(format!(
                "heartbeat.timeout_seconds must be at least {}s ({MIN_TIMEOUT_TO_PING_RATIO}x the agent ping interval)",
                min_timeout.as_secs()
            )));
        }

        if self.limits.send_timeout_ms == 0 {
            return Err(AppError::Config(
                "limits.send_timeout_ms must be greater than zero".into(),
            ));
        }

        self.agent_addr()?;
        self.bridge_addr()?;
        if self.http.enabled {
            self.http_addr()?;
        }

        Ok(())
    }
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr> {
    let ip: std::net::IpAddr = host
        .parse()
        .map_err(|err| AppError::Config(format!("invalid listen host '{host}': {err}")))?;
    Ok(SocketAddr::new(ip, port))
}
