//! Command execution against the session registry.
//!
//! The [`Dispatcher`] is shared by the operator console and every bridge
//! connection. Batch operations iterate a snapshot of session handles and
//! write to each one outside the registry lock; a failed write marks that
//! session dead, evicts it, and the batch carries on.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::command::{Command, HELP_TEXT};
use crate::events::{EventEntry, EventKind, EventLog};
use crate::protocol::ServerMessage;
use crate::registry::{Registry, SessionHandle};

/// Result of a `message_single` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnicastOutcome {
    /// Session found and the message was written.
    Sent,
    /// Session found but the write failed; the session was evicted.
    SendFailed,
    /// No alive session for the address.
    NotFound,
}

/// Typed result of executing one [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// `message_all`: number of sessions written successfully.
    Broadcast {
        /// Successful writes.
        sent: usize,
        /// Failed writes (sessions evicted).
        failed: usize,
    },
    /// `message_single`.
    Unicast {
        /// Target address.
        target: String,
        /// Delivery result.
        result: UnicastOutcome,
    },
    /// `show_ips`.
    Enumerate {
        /// Alive session addresses in registration order.
        clients: Vec<String>,
    },
    /// `kill_switch`: sessions disconnected.
    KillSwitch {
        /// Number of sessions closed.
        disconnected: usize,
    },
    /// `stop`: sessions notified before shutdown.
    Shutdown {
        /// Number of sessions notified and closed.
        notified: usize,
    },
    /// `help`.
    Help,
    /// Protocol error: unknown or malformed command.
    Rejected(String),
}

impl Outcome {
    /// Whether the command succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        match self {
            Self::Unicast { result, .. } => *result == UnicastOutcome::Sent,
            Self::Rejected(_) => false,
            _ => true,
        }
    }

    /// Structured response for the bridge.
    #[must_use]
    pub fn to_response(&self) -> Response {
        match self {
            Self::Broadcast { sent, .. } => {
                Response::success(serde_json::json!({ "sent_clients": sent }))
            }
            Self::Unicast { target, result } => match result {
                UnicastOutcome::Sent => Response::success(
                    serde_json::json!({ "sent_to": target, "status": "success" }),
                ),
                UnicastOutcome::SendFailed => {
                    Response::error(format!("failed to send to {target}"))
                }
                UnicastOutcome::NotFound => {
                    Response::error(format!("client {target} not found or not connected"))
                }
            },
            Self::Enumerate { clients } => Response::success(
                serde_json::json!({ "clients": clients, "count": clients.len() }),
            ),
            Self::KillSwitch { disconnected } => {
                Response::success(serde_json::json!({ "disconnected_clients": disconnected }))
            }
            Self::Shutdown { notified } => Response::success(
                serde_json::json!({ "status": "server stopping", "notified_clients": notified }),
            ),
            Self::Help => Response::success(serde_json::json!({ "info": HELP_TEXT })),
            Self::Rejected(reason) => Response::error(reason.clone()),
        }
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Broadcast { sent, failed: 0 } => write!(f, "message sent to {sent} client(s)"),
            Self::Broadcast { sent, failed } => {
                write!(f, "message sent to {sent} client(s), {failed} failed")
            }
            Self::Unicast { target, result } => match result {
                UnicastOutcome::Sent => write!(f, "message sent to {target}"),
                UnicastOutcome::SendFailed => write!(f, "error: failed to send to {target}"),
                UnicastOutcome::NotFound => {
                    write!(f, "error: client {target} not found or not connected")
                }
            },
            Self::Enumerate { clients } => {
                writeln!(f, "connected clients: {}", clients.len())?;
                for addr in clients {
                    writeln!(f, "  {addr}")?;
                }
                Ok(())
            }
            Self::KillSwitch { disconnected } => {
                write!(f, "kill switch: disconnected {disconnected} client(s)")
            }
            Self::Shutdown { notified } => {
                write!(f, "server stopping, notified {notified} client(s)")
            }
            Self::Help => f.write_str(HELP_TEXT),
            Self::Rejected(reason) => write!(f, "error: {reason}"),
        }
    }
}

/// Bridge response payload, serialised as one JSON line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Compact single-line JSON form.
    #[must_use]
    pub fn to_line(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"ok":false,"error":"serialization failed"}"#.to_owned())
    }
}

/// Executes commands against the registry.
pub struct Dispatcher {
    registry: Arc<Registry>,
    events: Arc<dyn EventLog>,
    send_timeout: Duration,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Create a dispatcher. Cancelling `shutdown` is how `stop` ends the
    /// server.
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        events: Arc<dyn EventLog>,
        send_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            events,
            send_timeout,
            shutdown,
        }
    }

    /// Parse and execute one console or bridge line.
    pub async fn execute_line(&self, line: &str, source: &str) -> Outcome {
        self.record(
            EventEntry::new(EventKind::Command)
                .with_peer(source)
                .with_detail(line.trim()),
        );
        self.execute(Command::parse(line)).await
    }

    /// Execute a parsed command.
    pub async fn execute(&self, command: Command) -> Outcome {
        let span = info_span!("command", verb = command.verb());
        async move {
            match command {
                Command::BroadcastMessage(text) => {
                    let (sent, failed) = self.broadcast(&ServerMessage::Msg(text)).await;
                    Outcome::Broadcast { sent, failed }
                }
                Command::UnicastMessage { target, text } => {
                    let result = self.unicast(&target, &ServerMessage::Msg(text)).await;
                    Outcome::Unicast { target, result }
                }
                Command::Enumerate => Outcome::Enumerate {
                    clients: self
                        .registry
                        .snapshot()
                        .await
                        .into_iter()
                        .map(|summary| summary.addr)
                        .collect(),
                },
                Command::KillSwitch => Outcome::KillSwitch {
                    disconnected: self.kill_switch().await,
                },
                Command::Shutdown => Outcome::Shutdown {
                    notified: self.shutdown().await,
                },
                Command::Help => Outcome::Help,
                Command::Malformed { verb, reason } => {
                    Outcome::Rejected(format!("invalid {verb} command: {reason}"))
                }
                Command::Unrecognized(raw) => {
                    Outcome::Rejected(format!("unrecognized command: {raw}"))
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Send `message` to every alive session.
    ///
    /// Returns `(sent, failed)`. Failed sessions are evicted.
    pub async fn broadcast(&self, message: &ServerMessage) -> (usize, usize) {
        let mut sent = 0;
        let mut failed = 0;
        for handle in self.registry.alive_handles().await {
            if self.deliver(&handle, message).await {
                sent += 1;
            } else {
                failed += 1;
            }
        }
        info!(sent, failed, "broadcast complete");
        (sent, failed)
    }

    async fn unicast(&self, target: &str, message: &ServerMessage) -> UnicastOutcome {
        let Some(handle) = self.registry.find_by_addr(target).await else {
            warn!(addr = target, "unicast target not found");
            return UnicastOutcome::NotFound;
        };
        if self.deliver(&handle, message).await {
            UnicastOutcome::Sent
        } else {
            UnicastOutcome::SendFailed
        }
    }

    async fn kill_switch(&self) -> usize {
        let sessions = self.registry.drain().await;
        for handle in &sessions {
            if let Err(err) = handle.send(&ServerMessage::KillSwitch, self.send_timeout).await {
                warn!(addr = handle.addr(), %err, "kill switch notice not delivered");
            }
            handle.close().await;
            self.record(
                EventEntry::new(EventKind::ForceDisconnected)
                    .with_peer(handle.addr())
                    .with_session(handle.id().0),
            );
        }
        info!(disconnected = sessions.len(), "kill switch executed");
        sessions.len()
    }

    async fn shutdown(&self) -> usize {
        let sessions = self.registry.drain().await;
        for handle in &sessions {
            if let Err(err) = handle
                .send(&ServerMessage::ServerShutdown, self.send_timeout)
                .await
            {
                warn!(addr = handle.addr(), %err, "shutdown notice not delivered");
            }
            handle.close().await;
        }
        self.record(
            EventEntry::new(EventKind::Shutdown)
                .with_detail(format!("notified {} client(s)", sessions.len())),
        );
        info!(notified = sessions.len(), "server stop requested");
        self.shutdown.cancel();
        sessions.len()
    }

    /// Write one message; on failure mark the session dead and evict it.
    async fn deliver(&self, handle: &SessionHandle, message: &ServerMessage) -> bool {
        match handle.send(message, self.send_timeout).await {
            Ok(()) => {
                self.record(
                    EventEntry::new(EventKind::Sent)
                        .with_peer(handle.addr())
                        .with_session(handle.id().0)
                        .with_detail(message.encode()),
                );
                true
            }
            Err(err) => {
                warn!(addr = handle.addr(), %err, "send failed");
                self.registry.mark_dead(handle.id()).await;
                self.registry.evict(handle.id()).await;
                self.record(
                    EventEntry::new(EventKind::SendFailed)
                        .with_peer(handle.addr())
                        .with_session(handle.id().0)
                        .with_detail(err.to_string()),
                );
                false
            }
        }
    }

    fn record(&self, entry: EventEntry) {
        if let Err(err) = self.events.record(entry) {
            warn!(%err, "failed to record event");
        }
    }
}
