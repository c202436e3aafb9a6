//! Server assembly: shared state, listeners, and supervised shutdown.
//!
//! Each listener (agent, bridge and the optional HTTP API), the heartbeat
//! monitor, and the auto-update broadcaster run as background tasks. Per-connection handlers are spawned on a
//! [`TaskTracker`] so shutdown can wait for them instead of relying on
//! closed sockets to unwind detached tasks.

pub mod agent_listener;
pub mod auto_update;
pub mod bridge_listener;
pub mod console;
pub mod http;

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::config::GlobalConfig;
use crate::dispatch::Dispatcher;
use crate::events::{EventEntry, EventKind, EventLog, RecentEvents, DEFAULT_RECENT_CAPACITY};
use crate::heartbeat::HeartbeatMonitor;
use crate::registry::Registry;
use crate::{AppError, Result};

/// State shared by every server task.
pub struct ServerContext {
    /// Validated configuration.
    pub config: Arc<GlobalConfig>,
    /// Live agent sessions.
    pub registry: Arc<Registry>,
    /// Command executor shared by the console and the bridge.
    pub dispatcher: Arc<Dispatcher>,
    /// Event sink. Every entry also lands in [`Self::recent`].
    pub events: Arc<dyn EventLog>,
    /// Latest events, served by the HTTP API.
    pub recent: Arc<RecentEvents>,
    /// When the context was built.
    pub started_at: DateTime<Utc>,
    /// Tracker for per-connection tasks.
    pub tasks: TaskTracker,
    /// Cancelled when the server stops.
    pub shutdown: CancellationToken,
}

impl ServerContext {
    /// Build the shared state from a validated configuration.
    #[must_use]
    pub fn new(config: GlobalConfig, events: Arc<dyn EventLog>) -> Arc<Self> {
        let recent = Arc::new(RecentEvents::new(events, DEFAULT_RECENT_CAPACITY));
        let events: Arc<dyn EventLog> = Arc::clone(&recent) as Arc<dyn EventLog>;
        let shutdown = CancellationToken::new();
        let registry = Arc::new(Registry::new(config.max_sessions()));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&events),
            config.send_timeout(),
            shutdown.clone(),
        ));
        Arc::new(Self {
            config: Arc::new(config),
            registry,
            dispatcher,
            events,
            recent,
            started_at: Utc::now(),
            tasks: TaskTracker::new(),
            shutdown,
        })
    }

    /// Record an event, logging (not propagating) sink failures.
    pub fn record(&self, entry: EventEntry) {
        if let Err(err) = self.events.record(entry) {
            warn!(%err, "failed to record event");
        }
    }
}

/// A started server.
pub struct RunningServer {
    ctx: Arc<ServerContext>,
    agent_addr: Option<SocketAddr>,
    bridge_addr: Option<SocketAddr>,
    http_addr: Option<SocketAddr>,
    background: Vec<JoinHandle<()>>,
}

impl RunningServer {
    /// Bind the listeners and start every background task.
    ///
    /// A listener that fails to bind is logged and skipped; the others
    /// keep running. The HTTP API is bound only when enabled.
    pub async fn start(ctx: Arc<ServerContext>) -> Self {
        let mut background = Vec::new();

        let agent_addr = match bind_listener("agent", ctx.config.agent_addr()).await {
            Ok((listener, addr)) => {
                ctx.record(
                    EventEntry::new(EventKind::ListenerStarted).with_detail(format!("agent {addr}")),
                );
                background.push(agent_listener::spawn_agent_listener(listener, Arc::clone(&ctx)));
                Some(addr)
            }
            Err(err) => {
                error!(%err, "agent listener unavailable");
                None
            }
        };

        let bridge_addr = match bind_listener("bridge", ctx.config.bridge_addr()).await {
            Ok((listener, addr)) => {
                ctx.record(
                    EventEntry::new(EventKind::ListenerStarted).with_detail(format!("bridge {addr}")),
                );
                background.push(bridge_listener::spawn_bridge_listener(listener, Arc::clone(&ctx)));
                Some(addr)
            }
            Err(err) => {
                error!(%err, "bridge listener unavailable");
                None
            }
        };

        let http_addr = if ctx.config.http.enabled {
            match bind_listener("http", ctx.config.http_addr()).await {
                Ok((listener, addr)) => {
                    ctx.record(
                        EventEntry::new(EventKind::ListenerStarted).with_detail(format!("http {addr}")),
                    );
                    background.push(http::spawn_http_listener(listener, Arc::clone(&ctx)));
                    Some(addr)
                }
                Err(err) => {
                    error!(%err, "http listener unavailable");
                    None
                }
            }
        } else {
            None
        };

        let monitor = HeartbeatMonitor::new(
            Arc::clone(&ctx.registry),
            Arc::clone(&ctx.events),
            ctx.config.sweep_interval(),
            ctx.config.liveness_timeout(),
        );
        background.push(monitor.spawn(ctx.shutdown.clone()));

        if let Some(period) = ctx.config.auto_update_interval() {
            background.push(auto_update::spawn_auto_update(
                Arc::clone(&ctx.dispatcher),
                Arc::clone(&ctx.events),
                period,
                ctx.shutdown.clone(),
            ));
        }

        Self {
            ctx,
            agent_addr,
            bridge_addr,
            http_addr,
            background,
        }
    }

    /// Bound agent listener address, if it started.
    #[must_use]
    pub fn agent_addr(&self) -> Option<SocketAddr> {
        self.agent_addr
    }

    /// Bound bridge listener address, if it started.
    #[must_use]
    pub fn bridge_addr(&self) -> Option<SocketAddr> {
        self.bridge_addr
    }

    /// Bound HTTP API address, if enabled and started.
    #[must_use]
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_addr
    }

    /// Shared state of this server.
    #[must_use]
    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Wait until the server is stopped, then wind down every task.
    ///
    /// Sessions registered after the stop notice are closed, connection
    /// tasks get the configured grace period to finish, and background
    /// tasks are joined.
    pub async fn wait(self) {
        self.ctx.shutdown.cancelled().await;
        info!("shutdown started");

        for handle in self.ctx.registry.drain().await {
            handle.close().await;
        }

        self.ctx.tasks.close();
        if tokio::time::timeout(self.ctx.config.shutdown_grace(), self.ctx.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.ctx.tasks.len(),
                "connection tasks still running after grace period"
            );
        }

        for task in self.background {
            if let Err(err) = task.await {
                warn!(%err, "background task ended abnormally");
            }
        }
        info!("server stopped");
    }
}

async fn bind_listener(
    role: &str,
    addr: Result<SocketAddr>,
) -> Result<(TcpListener, SocketAddr)> {
    let addr = addr?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Bind(format!("{role} listener on {addr}: {err}")))?;
    let local = listener
        .local_addr()
        .map_err(|err| AppError::Bind(format!("{role} listener address: {err}")))?;
    info!(role, addr = %local, "listening");
    Ok((listener, local))
}
