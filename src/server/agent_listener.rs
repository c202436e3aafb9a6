//! Agent-facing accept loop and per-connection handler.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, info_span, warn, Instrument};

use super::ServerContext;
use crate::events::{EventEntry, EventKind};
use crate::protocol::codec::WireCodec;
use crate::protocol::{AgentMessage, ServerMessage};

/// Spawn the agent accept loop on an already-bound listener.
///
/// Every accepted connection gets its own task on the server's tracker.
#[must_use]
pub fn spawn_agent_listener(listener: TcpListener, ctx: Arc<ServerContext>) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    () = ctx.shutdown.cancelled() => {
                        info!("agent listener shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, peer)) => {
                                ctx.tasks.spawn(handle_agent(stream, peer, Arc::clone(&ctx)));
                            }
                            Err(err) => {
                                warn!(%err, "agent accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(info_span!("agent_listener")),
    )
}

/// Serve one agent connection until it closes, fails, or is evicted.
async fn handle_agent(stream: TcpStream, peer: SocketAddr, ctx: Arc<ServerContext>) {
    let addr = peer.ip().to_string();
    let span = info_span!("agent_conn", %peer);
    async move {
        let (reader, writer) = stream.into_split();

        let handle = match ctx.registry.register(addr.clone(), Box::new(writer)).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(%err, "agent refused");
                ctx.record(
                    EventEntry::new(EventKind::Rejected)
                        .with_peer(&addr)
                        .with_detail(err.to_string()),
                );
                return;
            }
        };

        let session_id = handle.id();
        info!(%session_id, "agent connected");
        ctx.record(
            EventEntry::new(EventKind::Connected)
                .with_peer(&addr)
                .with_session(session_id.0),
        );

        let send_timeout = ctx.config.send_timeout();
        let mut lines = FramedRead::new(reader, WireCodec::new());

        let reason = loop {
            tokio::select! {
                () = handle.closed() => break "closed by server".to_owned(),
                () = ctx.shutdown.cancelled() => break "server stopping".to_owned(),
                frame = lines.next() => {
                    let line = match frame {
                        None => break "peer closed connection".to_owned(),
                        Some(Err(err)) => break format!("read failed: {err}"),
                        Some(Ok(line)) => line,
                    };

                    if !ctx.registry.touch(session_id).await {
                        break "session no longer registered".to_owned();
                    }

                    match AgentMessage::parse(&line) {
                        AgentMessage::Ping => {
                            if let Err(err) = handle.send(&ServerMessage::Pong, send_timeout).await {
                                ctx.registry.mark_dead(session_id).await;
                                break format!("pong failed: {err}");
                            }
                        }
                        AgentMessage::ClientConnected => {
                            debug!("client announcement");
                            ctx.record(
                                EventEntry::new(EventKind::Announced)
                                    .with_peer(&addr)
                                    .with_session(session_id.0),
                            );
                        }
                        AgentMessage::Text(text) => {
                            info!(text = %text, "received from agent");
                            ctx.record(
                                EventEntry::new(EventKind::AgentText)
                                    .with_peer(&addr)
                                    .with_session(session_id.0)
                                    .with_detail(text),
                            );
                        }
                    }
                }
            }
        };

        if ctx.registry.evict(session_id).await.is_some() {
            info!(%session_id, %reason, "agent disconnected");
            ctx.record(
                EventEntry::new(EventKind::Disconnected)
                    .with_peer(&addr)
                    .with_session(session_id.0)
                    .with_detail(reason),
            );
        } else {
            debug!(%session_id, %reason, "agent handler exiting");
        }
    }
    .instrument(span)
    .await;
}
