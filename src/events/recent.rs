//! In-memory tail of the event stream for the HTTP `/api/logs` route.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{EventEntry, EventLog};
use crate::{AppError, Result};

/// Number of events kept when no capacity is given.
pub const DEFAULT_RECENT_CAPACITY: usize = 100;

/// Event sink that keeps the last `capacity` entries and forwards every
/// entry to another sink.
pub struct RecentEvents {
    inner: Arc<dyn EventLog>,
    entries: Mutex<VecDeque<EventEntry>>,
    capacity: usize,
}

impl RecentEvents {
    /// Wrap `inner`, keeping at most `capacity` entries in memory.
    #[must_use]
    pub fn new(inner: Arc<dyn EventLog>, capacity: usize) -> Self {
        Self {
            inner,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Up to `limit` of the newest entries, oldest first.
    #[must_use]
    pub fn latest(&self, limit: usize) -> Vec<EventEntry> {
        let Ok(entries) = self.entries.lock() else {
            return Vec::new();
        };
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }
}

impl EventLog for RecentEvents {
    fn record(&self, entry: EventEntry) -> Result<()> {
        if self.capacity > 0 {
            let mut entries = self
                .entries
                .lock()
                .map_err(|_| AppError::Io("recent events lock poisoned".into()))?;
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }
        self.inner.record(entry)
    }
}
