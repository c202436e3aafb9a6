//! Headless agent runtime.
//!
//! Connects to the server, announces itself with `CLIENT_CONNECTED`, sends
//! `PING` on a fixed cadence, and reacts to server messages. A failed
//! connect is retried after a fixed delay; a lost session is retried after
//! a one-second pause. `KILL_SWITCH` ends the runtime for good, while
//! `SERVER_SHUTDOWN` only marks the agent disconnected.
//!
//! Presentation (tray icons, notifications) is left to the consumer of the
//! [`Notice`] channel.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::MIN_TIMEOUT_TO_PING_RATIO;
use crate::protocol::codec::WireCodec;
use crate::protocol::{AgentMessage, ServerMessage, DEFAULT_LIVENESS_TIMEOUT, DEFAULT_PING_INTERVAL};
use crate::{AppError, Result};

/// Agent port used when the target omits one.
pub const DEFAULT_SERVER_PORT: u16 = 9998;

/// Pause before reconnecting after an established session ends.
const SESSION_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Server address given as `host:port` or a bare `host`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTarget {
    /// Host name or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Default for AgentTarget {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_SERVER_PORT,
        }
    }
}

impl FromStr for AgentTarget {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AppError::Config("server address must not be empty".into()));
        }

        // Bracketed IPv6, with or without a port.
        if let Some(rest) = raw.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| AppError::Config(format!("unterminated IPv6 literal: {raw}")))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port)?,
                None if tail.is_empty() => DEFAULT_SERVER_PORT,
                None => return Err(AppError::Config(format!("invalid server address: {raw}"))),
            };
            return Ok(Self {
                host: host.to_owned(),
                port,
            });
        }

        match raw.rsplit_once(':') {
            // A bare IPv6 literal contains several colons and no port.
            Some((host, _)) if host.contains(':') => Ok(Self {
                host: raw.to_owned(),
                port: DEFAULT_SERVER_PORT,
            }),
            Some((host, port)) if !host.is_empty() => Ok(Self {
                host: host.to_owned(),
                port: parse_port(port)?,
            }),
            Some(_) => Err(AppError::Config(format!("missing host in {raw}"))),
            None => Ok(Self {
                host: raw.to_owned(),
                port: DEFAULT_SERVER_PORT,
            }),
        }
    }
}

impl Display for AgentTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn parse_port(raw: &str) -> Result<u16> {
    match raw.parse::<u16>() {
        Ok(0) | Err(_) => Err(AppError::Config(format!("invalid port: {raw}"))),
        Ok(port) => Ok(port),
    }
}

/// Agent runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Server to connect to.
    pub target: AgentTarget,
    /// Cadence of `PING` messages.
    pub ping_interval: Duration,
    /// Wait after a failed connection attempt.
    pub reconnect_delay: Duration,
    /// Bound on establishing the TCP connection and on each write.
    pub io_timeout: Duration,
    /// Silence from the server after which the session is considered lost.
    pub idle_timeout: Duration,
}

impl AgentConfig {
    /// Settings with the default cadence for `target`.
    #[must_use]
    pub fn new(target: AgentTarget) -> Self {
        Self {
            target,
            ping_interval: DEFAULT_PING_INTERVAL,
            reconnect_delay: Duration::from_secs(30),
            io_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(15),
        }
    }

    /// Check that the ping cadence keeps the session inside the server's
    /// default liveness window.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when an interval is zero or too long.
    pub fn validate(&self) -> Result<()> {
        if self.ping_interval.is_zero() {
            return Err(AppError::Config("ping interval must be greater than zero".into()));
        }
        let max_ping = DEFAULT_LIVENESS_TIMEOUT / MIN_TIMEOUT_TO_PING_RATIO;
        if self.ping_interval > max_ping {
            return Err(AppError::Config(format!(
                "ping interval must not exceed {}s (1/{MIN_TIMEOUT_TO_PING_RATIO} of the server liveness timeout)",
                max_ping.as_secs()
            )));
        }
        if self.idle_timeout <= self.ping_interval {
            return Err(AppError::Config(
                "idle timeout must be longer than the ping interval".into(),
            ));
        }
        if self.io_timeout.is_zero() {
            return Err(AppError::Config("io timeout must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Something the agent's presentation layer may want to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Session established.
    Connected,
    /// Session ended; the runtime will reconnect.
    Disconnected {
        /// Why the session ended.
        reason: String,
    },
    /// Operator message (`MSG:<text>`).
    Message(String),
    /// `AUTO_UPDATE_CHECK` received.
    UpdateCheck,
    /// `KILL_SWITCH` received; the runtime is terminating.
    KillSwitch,
}

/// How one connected session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Server ordered the agent to terminate.
    KillSwitch,
    /// Server announced it is going away.
    ServerShutdown,
    /// Connection failed or went silent.
    Lost(String),
    /// Local cancellation.
    Cancelled,
}

/// Run the agent until `KILL_SWITCH` or cancellation.
///
/// # Errors
///
/// Returns `AppError::Config` if `config` is invalid.
pub async fn run_agent(
    config: AgentConfig,
    notices: mpsc::Sender<Notice>,
    cancel: CancellationToken,
) -> Result<()> {
    config.validate()?;
    let span = info_span!("agent", server = %config.target);

    async move {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            info!("attempting to connect");
            match connect(&config).await {
                Ok(stream) => {
                    info!("connected");
                    match run_session(stream, &config, &notices, &cancel).await {
                        SessionEnd::KillSwitch => {
                            info!("kill switch received, terminating");
                            notify(&notices, Notice::KillSwitch);
                            return Ok(());
                        }
                        SessionEnd::Cancelled => return Ok(()),
                        SessionEnd::ServerShutdown => {
                            info!("server shutdown notification");
                            notify(
                                &notices,
                                Notice::Disconnected {
                                    reason: "server shutdown".into(),
                                },
                            );
                        }
                        SessionEnd::Lost(reason) => {
                            warn!(%reason, "session lost");
                            notify(&notices, Notice::Disconnected { reason });
                        }
                    }
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        () = tokio::time::sleep(SESSION_RETRY_PAUSE) => {}
                    }
                }
                Err(err) => {
                    warn!(
                        %err,
                        retry_secs = config.reconnect_delay.as_secs(),
                        "connection failed, retrying"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        () = tokio::time::sleep(config.reconnect_delay) => {}
                    }
                }
            }
        }
    }
    .instrument(span)
    .await
}

async fn connect(config: &AgentConfig) -> Result<TcpStream> {
    let address = (config.target.host.as_str(), config.target.port);
    match tokio::time::timeout(config.io_timeout, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(err)) => Err(AppError::Transport(format!("connect to {}: {err}", config.target))),
        Err(_) => Err(AppError::Transport(format!(
            "connect to {} timed out",
            config.target
        ))),
    }
}

/// Hand a notice to the consumer without waiting.
///
/// A slow or stalled consumer loses notices rather than holding up pings.
fn notify(notices: &mpsc::Sender<Notice>, notice: Notice) {
    match notices.try_send(notice) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(notice)) => {
            debug!(?notice, "notice channel full, dropping notice");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("notice channel closed");
        }
    }
}

/// Drive one connected session until it ends.
pub async fn run_session(
    stream: TcpStream,
    config: &AgentConfig,
    notices: &mpsc::Sender<Notice>,
    cancel: &CancellationToken,
) -> SessionEnd {
    let (reader, writer) = stream.into_split();
    let mut lines = FramedRead::new(reader, WireCodec::new());
    let mut out = FramedWrite::new(writer, WireCodec::new());

    let announce = out.send(AgentMessage::ClientConnected.encode());
    match tokio::time::timeout(config.io_timeout, announce).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return SessionEnd::Lost(format!("announce failed: {err}")),
        Err(_) => return SessionEnd::Lost("announce timed out".into()),
    }
    notify(notices, Notice::Connected);

    let mut ping = tokio::time::interval(config.ping_interval);
    let mut last_heard = Instant::now();

    loop {
        tokio::select! {
            () = cancel.cancelled() => return SessionEnd::Cancelled,
            _ = ping.tick() => {
                if last_heard.elapsed() > config.idle_timeout {
                    return SessionEnd::Lost("server went silent".into());
                }
                let send = out.send(AgentMessage::Ping.encode());
                match tokio::time::timeout(config.io_timeout, send).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => return SessionEnd::Lost(format!("ping failed: {err}")),
                    Err(_) => return SessionEnd::Lost("ping timed out".into()),
                }
            }
            frame = lines.next() => {
                let line = match frame {
                    None => return SessionEnd::Lost("server closed connection".into()),
                    Some(Err(err)) => return SessionEnd::Lost(format!("receive failed: {err}")),
                    Some(Ok(line)) => line,
                };
                last_heard = Instant::now();

                match ServerMessage::parse(&line) {
                    Some(ServerMessage::Pong) => {}
                    Some(ServerMessage::Msg(text)) => {
                        info!(%text, "server message");
                        notify(notices, Notice::Message(text));
                    }
                    Some(ServerMessage::KillSwitch) => return SessionEnd::KillSwitch,
                    Some(ServerMessage::ServerShutdown) => return SessionEnd::ServerShutdown,
                    Some(ServerMessage::AutoUpdateCheck) => {
                        debug!("auto-update check received");
                        notify(notices, Notice::UpdateCheck);
                    }
                    None => debug!(%line, "ignoring unknown server message"),
                }
            }
        }
    }
}
