//! Wire protocol for agent and bridge connections.
//!
//! ## Agent stream
//!
//! Agent → server:
//! ```text
//! PING
//! CLIENT_CONNECTED
//! <anything else, logged>
//! ```
//!
//! Server → agent:
//! ```text
//! PONG
//! MSG:<text>
//! KILL_SWITCH
//! SERVER_SHUTDOWN
//! AUTO_UPDATE_CHECK
//! ```
//!
//! ## Bridge stream
//!
//! One command line per request (see [`crate::command`]); the reply is a
//! single JSON line followed by the [`END_RESPONSE`] sentinel line.
//!
//! Every message on both streams is one `\n`-terminated line, framed by
//! [`codec::WireCodec`].

pub mod codec;

use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Sentinel line terminating every bridge response.
pub const END_RESPONSE: &str = "END_RESPONSE";

/// Interval at which agents send `PING`.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(3);

/// Silence after which the server evicts a session.
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Prefix of an operator message sent to an agent.
pub const MSG_PREFIX: &str = "MSG:";

/// Message received from an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentMessage {
    /// Liveness probe; answered with `PONG`.
    Ping,
    /// Announcement sent once after connecting.
    ClientConnected,
    /// Any other line.
    Text(String),
}

impl AgentMessage {
    /// Classify one inbound line.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "PING" => Self::Ping,
            "CLIENT_CONNECTED" => Self::ClientConnected,
            other => Self::Text(other.to_owned()),
        }
    }

    /// Wire form of the message.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Ping => "PING".into(),
            Self::ClientConnected => "CLIENT_CONNECTED".into(),
            Self::Text(text) => single_line(text),
        }
    }
}

/// Message sent by the server to an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Reply to `PING`.
    Pong,
    /// Operator message for the agent to display.
    Msg(String),
    /// The agent must terminate.
    KillSwitch,
    /// The server is going away; the agent should mark itself disconnected.
    ServerShutdown,
    /// Agent-defined update check; a no-op is acceptable.
    AutoUpdateCheck,
}

impl ServerMessage {
    /// Wire form of the message.
    ///
    /// Line breaks inside operator text are replaced with spaces so a
    /// message always occupies exactly one frame.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Pong => "PONG".into(),
            Self::Msg(text) => format!("{MSG_PREFIX}{}", single_line(text)),
            Self::KillSwitch => "KILL_SWITCH".into(),
            Self::ServerShutdown => "SERVER_SHUTDOWN".into(),
            Self::AutoUpdateCheck => "AUTO_UPDATE_CHECK".into(),
        }
    }

    /// Parse one line received from the server.
    ///
    /// Returns `None` for lines that are not part of the protocol.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end();
        if let Some(text) = line.strip_prefix(MSG_PREFIX) {
            return Some(Self::Msg(text.to_owned()));
        }
        match line {
            "PONG" => Some(Self::Pong),
            "KILL_SWITCH" => Some(Self::KillSwitch),
            "SERVER_SHUTDOWN" => Some(Self::ServerShutdown),
            "AUTO_UPDATE_CHECK" => Some(Self::AutoUpdateCheck),
            _ => None,
        }
    }
}

impl Display for ServerMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}
