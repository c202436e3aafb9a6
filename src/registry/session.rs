//! Per-session outbound handle.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

use crate::protocol::codec::WireCodec;
use crate::protocol::ServerMessage;
use crate::{AppError, Result};

/// Upper bound on flushing and shutting down a closed session's stream.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Boxed write half of an agent connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Registry identifier of a session; allocated in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cloneable handle to one agent connection.
///
/// The handle owns the write side of the connection. Sends serialise on a
/// per-session mutex, never on the registry lock, so a slow peer only
/// delays writes addressed to itself.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    addr: String,
    writer: Arc<Mutex<FramedWrite<BoxedWriter, WireCodec>>>,
    closed: CancellationToken,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub(crate) fn new(id: SessionId, addr: String, writer: BoxedWriter) -> Self {
        Self {
            id,
            addr,
            writer: Arc::new(Mutex::new(FramedWrite::new(writer, WireCodec::new()))),
            closed: CancellationToken::new(),
        }
    }

    /// Registry identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Remote address the session is keyed by.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Future that resolves once the session is closed by any component.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Write one message, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the session is closed, the write
    /// fails, or it does not complete within `timeout`.
    pub async fn send(&self, message: &ServerMessage, timeout: Duration) -> Result<()> {
        if self.is_closed() {
            return Err(AppError::Transport(format!("session {} is closed", self.id)));
        }

        let write = async {
            let mut writer = self.writer.lock().await;
            writer.send(message.encode()).await
        };

        match tokio::time::timeout(timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Transport(format!(
                "send to {} timed out after {}ms",
                self.addr,
                timeout.as_millis()
            ))),
        }
    }

    /// Close the session: wake its handler and shut down the write side.
    ///
    /// Idempotent; the shutdown is bounded by a short grace period so a
    /// wedged peer cannot stall the caller.
    pub async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();

        let shutdown = async {
            let mut writer = self.writer.lock().await;
            writer.close().await
        };
        match tokio::time::timeout(CLOSE_GRACE, shutdown).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(session_id = %self.id, %err, "session shutdown failed"),
            Err(_) => debug!(session_id = %self.id, "session shutdown timed out"),
        }
    }
}
