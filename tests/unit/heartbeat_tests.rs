//! Unit tests for the heartbeat monitor.
//!
//! Sweeps are driven with explicit instants so timing is deterministic.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tether::events::{EventEntry, EventKind, EventLog};
use tether::heartbeat::HeartbeatMonitor;
use tether::registry::Registry;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingLog {
    entries: Mutex<Vec<EventEntry>>,
}

impl EventLog for RecordingLog {
    fn record(&self, entry: EventEntry) -> tether::Result<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

fn monitor(registry: &Arc<Registry>, log: &Arc<RecordingLog>) -> HeartbeatMonitor {
    HeartbeatMonitor::new(
        Arc::clone(registry),
        Arc::clone(log) as Arc<dyn EventLog>,
        Duration::from_secs(30),
        Duration::from_secs(30),
    )
}

#[tokio::test]
async fn sweep_evicts_silent_session_and_records_event() {
    let registry = Arc::new(Registry::default());
    let log = Arc::new(RecordingLog::default());
    let (writer, _peer) = tokio::io::duplex(64);
    let handle = registry.register("10.0.0.7", Box::new(writer)).await.unwrap();

    let evicted = monitor(&registry, &log)
        .sweep_at(Instant::now() + Duration::from_secs(31))
        .await;

    assert_eq!(evicted.len(), 1);
    assert!(handle.is_closed());
    assert!(registry.is_empty().await);

    let entries = log.entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, EventKind::TimedOut);
    assert_eq!(entries[0].peer.as_deref(), Some("10.0.0.7"));
    assert!(entries[0]
        .detail
        .as_deref()
        .unwrap()
        .starts_with("no liveness signal for"));
}

#[tokio::test]
async fn sweep_keeps_recently_touched_session() {
    let registry = Arc::new(Registry::default());
    let log = Arc::new(RecordingLog::default());
    let (writer, _peer) = tokio::io::duplex(64);
    let handle = registry.register("10.0.0.8", Box::new(writer)).await.unwrap();

    let later = Instant::now() + Duration::from_secs(45);
    registry
        .touch_at(handle.id(), later - Duration::from_secs(3))
        .await;

    let evicted = monitor(&registry, &log).sweep_at(later).await;
    assert!(evicted.is_empty());
    assert_eq!(registry.alive_count().await, 1);
    assert!(log.entries.lock().unwrap().is_empty());
}

#[tokio::test]
async fn spawned_monitor_stops_on_cancel() {
    let registry = Arc::new(Registry::default());
    let log = Arc::new(RecordingLog::default());
    let cancel = CancellationToken::new();

    let task = monitor(&registry, &log).spawn(cancel.clone());
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("monitor exits promptly")
        .expect("monitor task did not panic");
}
