//! Optional HTTP operator API.
//!
//! Off by default; enabled with `[http] enabled = true`. Every route goes
//! through the same [`crate::dispatch::Dispatcher`] as the console and the
//! bridge, so responses carry the bridge's `{"ok","data","error"}` shape.
//!
//! | Method | Path | Effect |
//! |--------|------|--------|
//! | GET | `/api/clients` | `show_ips` |
//! | POST | `/api/message` | `{"message": "..."}` broadcasts; with `"target"` it is `message_single` |
//! | POST | `/api/command` | Plain-text body executed as one command line |
//! | GET | `/api/logs` | Most recent events, `?limit=N` (default 100) |
//! | GET | `/api/status` | Liveness, session counts and uptime |
//!
//! Any other method on these paths is answered with `405`.

use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, Instrument};

use super::ServerContext;
use crate::dispatch::{Outcome, Response, UnicastOutcome};
use crate::events::{EventEntry, DEFAULT_RECENT_CAPACITY};

/// Source recorded for commands that arrive over HTTP.
const HTTP_SOURCE: &str = "http";

/// Body of `POST /api/message`.
#[derive(Debug, Deserialize)]
struct MessageRequest {
    message: String,
    #[serde(default)]
    target: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct LogsBody {
    logs: Vec<EventEntry>,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    status: &'static str,
    clients: usize,
    sessions: usize,
    started_at: DateTime<Utc>,
    uptime_seconds: i64,
    timestamp: DateTime<Utc>,
}

/// Routes of the operator API bound to `ctx`.
pub fn router(ctx: Arc<ServerContext>) -> Router {
    Router::new()
        .route("/api/clients", get(clients))
        .route("/api/message", post(message))
        .route("/api/command", post(command))
        .route("/api/logs", get(logs))
        .route("/api/status", get(status))
        .layer(middleware::from_fn(allow_any_origin))
        .with_state(ctx)
}

/// Serve the operator API on an already-bound listener until shutdown.
#[must_use]
pub fn spawn_http_listener(listener: TcpListener, ctx: Arc<ServerContext>) -> JoinHandle<()> {
    let shutdown = ctx.shutdown.clone();
    let app = router(ctx);
    tokio::spawn(
        async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            match served {
                Ok(()) => info!("http listener shut down"),
                Err(err) => error!(%err, "http listener failed"),
            }
        }
        .instrument(info_span!("http_listener")),
    )
}

async fn clients(State(ctx): State<Arc<ServerContext>>) -> (StatusCode, Json<Response>) {
    reply(&ctx.dispatcher.execute_line("show_ips", HTTP_SOURCE).await)
}

async fn message(
    State(ctx): State<Arc<ServerContext>>,
    Json(request): Json<MessageRequest>,
) -> (StatusCode, Json<Response>) {
    let line = match request.target.as_deref().map(str::trim) {
        None => format!("message_all {}", request.message),
        Some(target) if target.is_empty() || target.contains(char::is_whitespace) => {
            return reply(&Outcome::Rejected(format!(
                "invalid message_single command: bad target '{target}'"
            )));
        }
        Some(target) => format!("message_single {target} {}", request.message),
    };
    reply(&ctx.dispatcher.execute_line(&line, HTTP_SOURCE).await)
}

async fn command(State(ctx): State<Arc<ServerContext>>, body: String) -> (StatusCode, Json<Response>) {
    reply(&ctx.dispatcher.execute_line(body.trim(), HTTP_SOURCE).await)
}

async fn logs(
    State(ctx): State<Arc<ServerContext>>,
    Query(query): Query<LogsQuery>,
) -> Json<LogsBody> {
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_CAPACITY);
    Json(LogsBody {
        logs: ctx.recent.latest(limit),
    })
}

async fn status(State(ctx): State<Arc<ServerContext>>) -> Json<StatusBody> {
    let now = Utc::now();
    Json(StatusBody {
        status: "running",
        clients: ctx.registry.snapshot().await.len(),
        sessions: ctx.registry.alive_count().await,
        started_at: ctx.started_at,
        uptime_seconds: (now - ctx.started_at).num_seconds(),
        timestamp: now,
    })
}

fn reply(outcome: &Outcome) -> (StatusCode, Json<Response>) {
    let code = match outcome {
        Outcome::Rejected(_) => StatusCode::BAD_REQUEST,
        Outcome::Unicast {
            result: UnicastOutcome::NotFound,
            ..
        } => StatusCode::NOT_FOUND,
        Outcome::Unicast {
            result: UnicastOutcome::SendFailed,
            ..
        } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::OK,
    };
    (code, Json(outcome.to_response()))
}

async fn allow_any_origin(request: Request, next: Next) -> axum::response::Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}
