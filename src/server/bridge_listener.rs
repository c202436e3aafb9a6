//! Bridge accept loop: line-oriented command socket for local tooling.
//!
//! ## Protocol
//!
//! Request (one command per line, same grammar as the console):
//! ```text
//! message_all deploy finished
//! show_ips
//! ```
//!
//! Response (one JSON object per line, then the sentinel):
//! ```text
//! {"ok":true,"data":{"sent_clients":3}}
//! END_RESPONSE
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{info, info_span, warn, Instrument};

use super::ServerContext;
use crate::events::{EventEntry, EventKind};
use crate::protocol::codec::WireCodec;
use crate::protocol::END_RESPONSE;

/// Spawn the bridge accept loop on an already-bound listener.
#[must_use]
pub fn spawn_bridge_listener(listener: TcpListener, ctx: Arc<ServerContext>) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    () = ctx.shutdown.cancelled() => {
                        info!("bridge listener shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, peer)) => {
                                ctx.tasks.spawn(handle_bridge(stream, peer, Arc::clone(&ctx)));
                            }
                            Err(err) => {
                                warn!(%err, "bridge accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(info_span!("bridge_listener")),
    )
}

/// Serve one bridge client until it disconnects or the server stops.
async fn handle_bridge(stream: TcpStream, peer: SocketAddr, ctx: Arc<ServerContext>) {
    let span = info_span!("bridge_conn", %peer);
    async move {
        let source = peer.to_string();
        info!("bridge connected");
        ctx.record(EventEntry::new(EventKind::BridgeConnected).with_peer(&source));

        let (reader, writer) = stream.into_split();
        let mut lines = FramedRead::new(reader, WireCodec::new());
        let mut out = FramedWrite::new(writer, WireCodec::new());

        loop {
            let frame = tokio::select! {
                () = ctx.shutdown.cancelled() => break,
                frame = lines.next() => frame,
            };

            let line = match frame {
                None => break,
                Some(Err(err)) => {
                    warn!(%err, "bridge read error");
                    break;
                }
                Some(Ok(line)) => line,
            };

            // Blank lines are answered too; clients read up to `END_RESPONSE`.
            let outcome = ctx.dispatcher.execute_line(&line, &source).await;
            let response = outcome.to_response().to_line();

            if let Err(err) = out.send(response).await {
                warn!(%err, "failed to write bridge response");
                break;
            }
            if let Err(err) = out.send(END_RESPONSE.to_owned()).await {
                warn!(%err, "failed to write bridge sentinel");
                break;
            }
        }

        info!("bridge disconnected");
        ctx.record(EventEntry::new(EventKind::BridgeDisconnected).with_peer(&source));
    }
    .instrument(span)
    .await;
}
