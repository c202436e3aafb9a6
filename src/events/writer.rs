//! Event sink that appends to one JSONL file per UTC day.
//!
//! Files are named `events-YYYY-MM-DD.jsonl`. Each [`EventEntry`] is
//! serialized on its own line and flushed before `record` returns, so a
//! crash loses at most the entry being written.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use super::{EventEntry, EventLog};
use crate::{AppError, Result};

/// The file currently being appended to and the day it belongs to.
struct DayFile {
    day: NaiveDate,
    out: BufWriter<File>,
}

/// Event sink writing `events-<day>.jsonl` under a fixed directory.
///
/// The first record after UTC midnight switches to the next day's file.
/// Every entry is also mirrored to `tracing`.
pub struct JsonlEventWriter {
    log_dir: PathBuf,
    current: Mutex<Option<DayFile>>,
}

impl JsonlEventWriter {
    /// Sink rooted at `log_dir`, which is created if missing.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when `log_dir` cannot be created.
    pub fn new(log_dir: PathBuf) -> Result<Self> {
        if let Err(err) = fs::create_dir_all(&log_dir) {
            return Err(AppError::Config(format!(
                "cannot create event log directory {}: {err}",
                log_dir.display()
            )));
        }
        Ok(Self {
            log_dir,
            current: Mutex::new(None),
        })
    }

    /// File that holds the events recorded on `day`.
    #[must_use]
    pub fn path_for_date(&self, day: NaiveDate) -> PathBuf {
        self.log_dir.join(format!("events-{day}.jsonl"))
    }

    fn open_day(&self, day: NaiveDate) -> Result<DayFile> {
        let path = self.path_for_date(day);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| AppError::Io(format!("cannot open {}: {err}", path.display())))?;
        Ok(DayFile {
            day,
            out: BufWriter::new(file),
        })
    }
}

impl EventLog for JsonlEventWriter {
    fn record(&self, entry: EventEntry) -> Result<()> {
        info!(
            kind = ?entry.kind,
            peer = entry.peer.as_deref().unwrap_or("-"),
            session_id = entry.session_id,
            detail = entry.detail.as_deref().unwrap_or(""),
            "event"
        );

        let line = serde_json::to_string(&entry)
            .map_err(|err| AppError::Io(format!("cannot serialize event: {err}")))?;
        let today = Utc::now().date_naive();

        let mut current = self
            .current
            .lock()
            .map_err(|_| AppError::Io("event writer lock poisoned".into()))?;

        let file = match current.take() {
            Some(file) if file.day == today => file,
            _ => self.open_day(today)?,
        };
        let file = current.insert(file);

        writeln!(file.out, "{line}")
            .and_then(|()| file.out.flush())
            .map_err(|err| {
                warn!(%err, "event append failed");
                AppError::Io(format!("event append failed: {err}"))
            })
    }
}
