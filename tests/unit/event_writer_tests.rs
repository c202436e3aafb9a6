//! Unit tests for `JsonlEventWriter`.
//!
//! Validates directory creation, JSONL shape, optional-field omission,
//! concurrent write safety, appending to an existing day file, and the
//! in-memory recent-events tail.

use std::fs;
use std::sync::Arc;

use chrono::Utc;
use tether::events::{
    EventEntry, EventKind, EventLog, JsonlEventWriter, RecentEvents, TracingEventLog,
};

fn read_lines(writer: &JsonlEventWriter) -> Vec<serde_json::Value> {
    let path = writer.path_for_date(Utc::now().date_naive());
    fs::read_to_string(path)
        .expect("event file exists")
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid json line"))
        .collect()
}

#[test]
fn new_creates_directory_if_missing() {
    let temp = tempfile::tempdir().expect("tempdir");
    let log_dir = temp.path().join("nested").join("events");
    assert!(!log_dir.exists());

    let writer = JsonlEventWriter::new(log_dir.clone()).expect("writer");
    assert!(log_dir.is_dir());

    writer
        .record(EventEntry::new(EventKind::ListenerStarted))
        .expect("record");
    assert!(writer.path_for_date(Utc::now().date_naive()).exists());
}

#[test]
fn entries_are_written_as_snake_case_jsonl() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = JsonlEventWriter::new(temp.path().to_path_buf()).expect("writer");

    writer
        .record(
            EventEntry::new(EventKind::SendFailed)
                .with_peer("10.0.0.3")
                .with_session(4)
                .with_detail("broken pipe"),
        )
        .expect("record");
    writer
        .record(EventEntry::new(EventKind::Shutdown))
        .expect("record");

    let lines = read_lines(&writer);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["kind"], "send_failed");
    assert_eq!(lines[0]["peer"], "10.0.0.3");
    assert_eq!(lines[0]["session_id"], 4);
    assert_eq!(lines[0]["detail"], "broken pipe");
    assert!(lines[0]["timestamp"].is_string());

    assert_eq!(lines[1]["kind"], "shutdown");
    assert!(lines[1].get("peer").is_none(), "unset fields are omitted");
    assert!(lines[1].get("session_id").is_none());
}

#[test]
fn file_name_follows_date() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = JsonlEventWriter::new(temp.path().to_path_buf()).expect("writer");
    let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 9).expect("date");
    assert_eq!(
        writer.path_for_date(date),
        temp.path().join("events-2024-03-09.jsonl")
    );
}

#[test]
fn concurrent_writes_produce_valid_lines() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = Arc::new(JsonlEventWriter::new(temp.path().to_path_buf()).expect("writer"));

    let threads: Vec<_> = (0..8)
        .map(|i| {
            let writer = Arc::clone(&writer);
            std::thread::spawn(move || {
                for _ in 0..25 {
                    writer
                        .record(EventEntry::new(EventKind::Command).with_detail(format!("t{i}")))
                        .expect("record");
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().expect("thread");
    }

    assert_eq!(read_lines(&writer).len(), 200);
}

#[test]
fn tracing_log_never_fails() {
    TracingEventLog
        .record(EventEntry::new(EventKind::Connected).with_peer("10.0.0.1"))
        .expect("tracing sink accepts every entry");
}

#[test]
fn existing_day_file_is_appended_not_truncated() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = JsonlEventWriter::new(temp.path().to_path_buf()).expect("writer");
    let path = writer.path_for_date(Utc::now().date_naive());
    fs::write(&path, "{\"kind\":\"shutdown\"}\n").expect("seed file");

    writer
        .record(EventEntry::new(EventKind::ListenerStarted))
        .expect("record");
    writer
        .record(EventEntry::new(EventKind::Connected).with_peer("10.0.0.1"))
        .expect("record");

    let lines = read_lines(&writer);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["kind"], "shutdown");
    assert_eq!(lines[2]["peer"], "10.0.0.1");
}

#[test]
fn recent_events_keep_newest_and_forward_everything() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = Arc::new(JsonlEventWriter::new(temp.path().to_path_buf()).expect("writer"));
    let recent = RecentEvents::new(Arc::clone(&writer) as Arc<dyn EventLog>, 3);

    for i in 0..5 {
        recent
            .record(EventEntry::new(EventKind::Command).with_detail(format!("c{i}")))
            .expect("record");
    }

    let kept: Vec<_> = recent
        .latest(10)
        .into_iter()
        .map(|entry| entry.detail.unwrap())
        .collect();
    assert_eq!(kept, ["c2", "c3", "c4"]);
    assert_eq!(recent.latest(1)[0].detail.as_deref(), Some("c4"));
    assert_eq!(read_lines(&writer).len(), 5, "every entry reaches the file");
}
