//! Heartbeat monitor: periodic eviction of silent sessions.
//!
//! Every sweep evicts the sessions whose last liveness signal is older than
//! the timeout. With the default 30 s period and 30 s timeout a session that
//! misses one sweep window is gone on the next sweep; agents ping every 3 s,
//! which leaves room for several lost pings before that happens.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::events::{EventEntry, EventKind, EventLog};
use crate::registry::{ExpiredSession, Registry};

/// Periodic sweeper over the session registry.
pub struct HeartbeatMonitor {
    registry: Arc<Registry>,
    events: Arc<dyn EventLog>,
    sweep_interval: Duration,
    timeout: Duration,
}

impl HeartbeatMonitor {
    /// Construct a monitor (does not start it).
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        events: Arc<dyn EventLog>,
        sweep_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            events,
            sweep_interval,
            timeout,
        }
    }

    /// Run one sweep as of `now` and return the evicted sessions.
    pub async fn sweep_at(&self, now: Instant) -> Vec<ExpiredSession> {
        let expired = self.registry.expire(now, self.timeout).await;
        for session in &expired {
            let idle_secs = session.idle.as_secs();
            info!(
                addr = session.handle.addr(),
                session_id = %session.handle.id(),
                idle_secs,
                "session timed out"
            );
            let entry = EventEntry::new(EventKind::TimedOut)
                .with_peer(session.handle.addr())
                .with_session(session.handle.id().0)
                .with_detail(format!("no liveness signal for {idle_secs}s"));
            if let Err(err) = self.events.record(entry) {
                tracing::warn!(%err, "failed to record timeout event");
            }
        }
        expired
    }

    /// Spawn the sweep loop. The first sweep runs one period after start.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(
            async move {
                let start = tokio::time::Instant::now() + self.sweep_interval;
                let mut interval = tokio::time::interval_at(start, self.sweep_interval);
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            info!("heartbeat monitor shutting down");
                            break;
                        }
                        _ = interval.tick() => {
                            let evicted = self.sweep_at(Instant::now()).await;
                            debug!(evicted = evicted.len(), "heartbeat sweep complete");
                        }
                    }
                }
            }
            .instrument(info_span!("heartbeat_monitor")),
        )
    }
}
