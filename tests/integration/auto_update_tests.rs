//! Auto-update broadcaster tests over in-memory duplex sessions.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tether::dispatch::Dispatcher;
use tether::events::{EventKind, EventLog};
use tether::protocol::codec::WireCodec;
use tether::registry::Registry;
use tether::server::auto_update::spawn_auto_update;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{wait_until, RecordingLog, STEP_TIMEOUT};

fn dispatcher(registry: &Arc<Registry>, log: &Arc<RecordingLog>) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(
        Arc::clone(registry),
        Arc::clone(log) as Arc<dyn EventLog>,
        Duration::from_secs(1),
        CancellationToken::new(),
    ))
}

#[tokio::test]
async fn each_period_broadcasts_update_check() {
    let registry = Arc::new(Registry::default());
    let log = Arc::new(RecordingLog::default());
    let (ours, theirs) = tokio::io::duplex(4096);
    registry.register("10.0.0.1", Box::new(ours)).await.unwrap();
    let mut peer = FramedRead::new(theirs, WireCodec::new());

    let cancel = CancellationToken::new();
    let task = spawn_auto_update(
        dispatcher(&registry, &log),
        Arc::clone(&log) as Arc<dyn EventLog>,
        Duration::from_millis(50),
        cancel.clone(),
    );

    for _ in 0..2 {
        let frame = tokio::time::timeout(STEP_TIMEOUT, peer.next())
            .await
            .expect("broadcast within timeout")
            .expect("stream open")
            .expect("valid frame");
        assert_eq!(frame, "AUTO_UPDATE_CHECK");
    }

    wait_until(|| {
        let log = Arc::clone(&log);
        async move { log.of_kind(EventKind::AutoUpdate).len() >= 2 }
    })
    .await;
    let recorded = log.of_kind(EventKind::AutoUpdate);
    assert_eq!(
        recorded[0].detail.as_deref(),
        Some("sent to 1 client(s), 0 failed")
    );

    cancel.cancel();
    tokio::time::timeout(STEP_TIMEOUT, task)
        .await
        .expect("broadcaster stops on cancel")
        .expect("task did not panic");
}

#[tokio::test]
async fn cancel_before_first_period_sends_nothing() {
    let registry = Arc::new(Registry::default());
    let log = Arc::new(RecordingLog::default());

    let cancel = CancellationToken::new();
    let task = spawn_auto_update(
        dispatcher(&registry, &log),
        Arc::clone(&log) as Arc<dyn EventLog>,
        Duration::from_secs(3600),
        cancel.clone(),
    );
    cancel.cancel();

    tokio::time::timeout(STEP_TIMEOUT, task)
        .await
        .expect("broadcaster stops on cancel")
        .expect("task did not panic");
    assert!(log.of_kind(EventKind::AutoUpdate).is_empty());
}
