//! Periodic `AUTO_UPDATE_CHECK` broadcast.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::dispatch::Dispatcher;
use crate::events::{EventEntry, EventKind, EventLog};
use crate::protocol::ServerMessage;

/// Spawn the broadcaster. The first broadcast happens one period after start.
#[must_use]
pub fn spawn_auto_update(
    dispatcher: Arc<Dispatcher>,
    events: Arc<dyn EventLog>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("auto-update broadcaster shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let (sent, failed) = dispatcher.broadcast(&ServerMessage::AutoUpdateCheck).await;
                        let entry = EventEntry::new(EventKind::AutoUpdate)
                            .with_detail(format!("sent to {sent} client(s), {failed} failed"));
                        if let Err(err) = events.record(entry) {
                            warn!(%err, "failed to record auto-update event");
                        }
                    }
                }
            }
        }
        .instrument(info_span!("auto_update")),
    )
}
