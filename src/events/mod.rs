//! Event recording for connection and command activity.
//!
//! Provides the [`EventLog`] trait and associated types. The primary
//! implementation, [`JsonlEventWriter`], appends JSONL records to
//! daily-rotating files. [`TracingEventLog`] is used when no log directory
//! is configured. [`RecentEvents`] wraps either one and keeps the latest
//! entries in memory for the HTTP API.

pub mod recent;
pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Event classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A listener started accepting connections.
    ListenerStarted,
    /// An agent connected and was registered.
    Connected,
    /// An agent sent its `CLIENT_CONNECTED` announcement.
    Announced,
    /// An agent sent a line outside the protocol.
    AgentText,
    /// An agent connection closed or failed.
    Disconnected,
    /// An agent was evicted for missing the liveness window.
    TimedOut,
    /// A connection was refused because the registry is full.
    Rejected,
    /// A bridge client connected.
    BridgeConnected,
    /// A bridge client disconnected.
    BridgeDisconnected,
    /// An operator or bridge command was received.
    Command,
    /// A message was delivered to an agent.
    Sent,
    /// A write to an agent failed.
    SendFailed,
    /// An agent was disconnected by the kill switch.
    ForceDisconnected,
    /// The periodic update check was broadcast.
    AutoUpdate,
    /// The server stopped.
    Shutdown,
}

/// A structured record of one notable event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEntry {
    /// ISO 8601 timestamp.
    pub timestamp: DateTime<Utc>,
    /// Event classification.
    pub kind: EventKind,
    /// Remote address of the agent or bridge client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    /// Registry session identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u64>,
    /// Free-form detail (command text, error, message body).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl EventEntry {
    /// Construct a minimal entry for the given kind.
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            peer: None,
            session_id: None,
            detail: None,
        }
    }

    /// Attach the remote address.
    #[must_use]
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    /// Attach the session identifier.
    #[must_use]
    pub fn with_session(mut self, session_id: u64) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Attach free-form detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Sink for notable events.
///
/// Implementations must be [`Send`] and [`Sync`] to allow sharing across
/// async task boundaries via [`std::sync::Arc`].
pub trait EventLog: Send + Sync {
    /// Record a single event.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write operation fails.
    fn record(&self, entry: EventEntry) -> crate::Result<()>;
}

/// Event log that only emits `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn record(&self, entry: EventEntry) -> crate::Result<()> {
        info!(
            kind = ?entry.kind,
            peer = entry.peer.as_deref().unwrap_or("-"),
            session_id = entry.session_id,
            detail = entry.detail.as_deref().unwrap_or(""),
            "event"
        );
        Ok(())
    }
}

pub use recent::{RecentEvents, DEFAULT_RECENT_CAPACITY};
pub use writer::JsonlEventWriter;
