//! In-memory registry of live agent sessions.
//!
//! All table mutations happen under one registry-wide lock. The lock guards
//! only the in-memory maps: every operation that touches the network
//! (closing an evicted session) runs after the guard is dropped, using a
//! [`SessionHandle`] captured inside the critical section.
//!
//! Every connection is its own session, even when several share a remote
//! address (agents behind one NAT, or a reconnect racing the old socket's
//! teardown). Address lookups resolve to the most recently registered
//! alive session for that address.
//!
//! A session whose `alive` flag is cleared is invisible to lookups and
//! snapshots from that moment on, even before it is physically removed.

pub mod session;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use crate::{AppError, Result};

pub use session::{BoxedWriter, SessionHandle, SessionId};

/// Alive address as reported by [`Registry::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Remote address.
    pub addr: String,
    /// Newest alive session for that address.
    pub id: SessionId,
}

/// Session removed by [`Registry::expire`].
#[derive(Debug, Clone)]
pub struct ExpiredSession {
    /// Handle of the evicted session (already closed).
    pub handle: SessionHandle,
    /// Time since the last liveness signal at sweep time.
    pub idle: Duration,
}

struct Entry {
    handle: SessionHandle,
    last_liveness: Instant,
    alive: bool,
}

#[derive(Default)]
struct Inner {
    sessions: BTreeMap<SessionId, Entry>,
    by_addr: HashMap<String, BTreeSet<SessionId>>,
    next_id: u64,
}

impl Inner {
    fn remove(&mut self, id: SessionId) -> Option<Entry> {
        let entry = self.sessions.remove(&id)?;
        let addr = entry.handle.addr();
        if let Some(ids) = self.by_addr.get_mut(addr) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_addr.remove(addr);
            }
        }
        Some(entry)
    }

    /// Newest alive entry for `addr`. Ids grow monotonically, so the
    /// highest id is the latest registration.
    fn latest_alive(&self, addr: &str) -> Option<&Entry> {
        self.by_addr
            .get(addr)?
            .iter()
            .rev()
            .filter_map(|id| self.sessions.get(id))
            .find(|entry| entry.alive)
    }
}

/// Concurrency-safe table of agent sessions, indexed by id and by remote
/// address.
pub struct Registry {
    inner: Mutex<Inner>,
    max_sessions: Option<usize>,
}

impl Registry {
    /// Create an empty registry. `max_sessions` of `None` means unbounded.
    #[must_use]
    pub fn new(max_sessions: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_sessions,
        }
    }

    /// Register a new session for `addr`.
    ///
    /// Sessions already registered under the same address are left alone;
    /// the new one becomes the target of address lookups.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Capacity` when the registry is full. The writer
    /// is dropped, which closes that side of the connection.
    pub async fn register(&self, addr: impl Into<String>, writer: BoxedWriter) -> Result<SessionHandle> {
        let addr = addr.into();
        let mut inner = self.inner.lock().await;

        if let Some(max) = self.max_sessions {
            if inner.sessions.len() >= max {
                return Err(AppError::Capacity(format!(
                    "registry full ({max} sessions), refusing {addr}"
                )));
            }
        }

        inner.next_id += 1;
        let id = SessionId(inner.next_id);
        let handle = SessionHandle::new(id, addr.clone(), writer);
        inner.sessions.insert(
            id,
            Entry {
                handle: handle.clone(),
                last_liveness: Instant::now(),
                alive: true,
            },
        );
        let shared = inner.by_addr.get(&addr).map_or(0, BTreeSet::len);
        inner.by_addr.entry(addr).or_default().insert(id);
        if shared > 0 {
            debug!(session_id = %id, addr = handle.addr(), shared, "address already has sessions");
        }

        Ok(handle)
    }

    /// Record a liveness signal. Returns `false` if the session is gone.
    pub async fn touch(&self, id: SessionId) -> bool {
        self.touch_at(id, Instant::now()).await
    }

    /// Record a liveness signal observed at `now`.
    pub async fn touch_at(&self, id: SessionId, now: Instant) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.sessions.get_mut(&id) {
            Some(entry) if entry.alive => {
                entry.last_liveness = now;
                true
            }
            _ => false,
        }
    }

    /// Clear the `alive` flag. Idempotent; returns `false` if the session
    /// was already dead or absent.
    pub async fn mark_dead(&self, id: SessionId) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.sessions.get_mut(&id) {
            Some(entry) if entry.alive => {
                entry.alive = false;
                true
            }
            _ => false,
        }
    }

    /// Remove a session and close its connection.
    ///
    /// Idempotent; returns the handle only on the call that removed it.
    pub async fn evict(&self, id: SessionId) -> Option<SessionHandle> {
        let entry = self.inner.lock().await.remove(id)?;
        debug!(session_id = %id, addr = entry.handle.addr(), "session evicted");
        entry.handle.close().await;
        Some(entry.handle)
    }

    /// One summary per address with an alive session, each naming the
    /// newest session for its address, ordered by that session's
    /// registration.
    pub async fn snapshot(&self) -> Vec<SessionSummary> {
        let inner = self.inner.lock().await;
        let mut seen = HashSet::new();
        let mut newest_first: Vec<SessionSummary> = inner
            .sessions
            .values()
            .rev()
            .filter(|entry| entry.alive && seen.insert(entry.handle.addr()))
            .map(|entry| SessionSummary {
                addr: entry.handle.addr().to_owned(),
                id: entry.handle.id(),
            })
            .collect();
        newest_first.reverse();
        newest_first
    }

    /// Handles of every alive session, including several per address,
    /// captured under the lock so the caller can write to them without
    /// holding it.
    pub async fn alive_handles(&self) -> Vec<SessionHandle> {
        let inner = self.inner.lock().await;
        inner
            .sessions
            .values()
            .filter(|entry| entry.alive)
            .map(|entry| entry.handle.clone())
            .collect()
    }

    /// Newest alive session registered under `addr`.
    ///
    /// Once that session is evicted or marked dead, the next newest alive
    /// one for the same address is returned.
    pub async fn find_by_addr(&self, addr: &str) -> Option<SessionHandle> {
        let inner = self.inner.lock().await;
        inner.latest_alive(addr).map(|entry| entry.handle.clone())
    }

    /// Evict every session silent for longer than `timeout` as of `now`.
    ///
    /// Sessions already marked dead are removed as well.
    pub async fn expire(&self, now: Instant, timeout: Duration) -> Vec<ExpiredSession> {
        let expired: Vec<ExpiredSession> = {
            let mut inner = self.inner.lock().await;
            let stale: Vec<(SessionId, Duration)> = inner
                .sessions
                .iter()
                .filter_map(|(id, entry)| {
                    let idle = now.saturating_duration_since(entry.last_liveness);
                    (!entry.alive || idle > timeout).then_some((*id, idle))
                })
                .collect();
            stale
                .into_iter()
                .filter_map(|(id, idle)| {
                    inner
                        .remove(id)
                        .map(|entry| ExpiredSession { handle: entry.handle, idle })
                })
                .collect()
        };

        for session in &expired {
            session.handle.close().await;
        }
        expired
    }

    /// Remove every session at once and return the alive ones.
    ///
    /// The handles are not closed so the caller can deliver a final message
    /// first; dead entries are closed here.
    pub async fn drain(&self) -> Vec<SessionHandle> {
        let entries: Vec<Entry> = {
            let mut inner = self.inner.lock().await;
            inner.by_addr.clear();
            std::mem::take(&mut inner.sessions).into_values().collect()
        };

        let mut alive = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.alive {
                alive.push(entry.handle);
            } else {
                entry.handle.close().await;
            }
        }
        alive
    }

    /// Number of alive sessions, counting each connection.
    pub async fn alive_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.sessions.values().filter(|entry| entry.alive).count()
    }

    /// Number of entries in the table, dead or alive.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    /// Whether the table is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.sessions.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(None)
    }
}
