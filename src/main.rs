#![forbid(unsafe_code)]

//! `tether` — control channel server binary.
//!
//! Loads configuration, starts the agent and bridge listeners, the
//! heartbeat monitor, and the operator console, then runs until `stop` or
//! a termination signal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use tether::command::Command;
use tether::config::GlobalConfig;
use tether::events::{EventLog, JsonlEventWriter, TracingEventLog};
use tether::server::{console, RunningServer, ServerContext};
use tether::{AppError, Result};

/// Time allowed for blocking work (the stdin reader) after the server stops.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "tether", about = "Agent control channel server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Run without the interactive stdin console.
    #[arg(long)]
    no_console: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("tether server bootstrap");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let result = runtime.block_on(run(args));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    result
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => {
            let config = GlobalConfig::default();
            config.validate()?;
            config
        }
    };
    info!("configuration loaded");

    // ── Event sink ──────────────────────────────────────
    let events: Arc<dyn EventLog> = match config.events.log_dir {
        Some(ref dir) => Arc::new(JsonlEventWriter::new(dir.clone())?),
        None => Arc::new(TracingEventLog),
    };

    // ── Start listeners and background tasks ────────────
    let ctx = ServerContext::new(config, events);
    let server = RunningServer::start(Arc::clone(&ctx)).await;

    if server.agent_addr().is_none() && server.bridge_addr().is_none() && args.no_console {
        return Err(AppError::Bind(
            "no listener could be bound and the console is disabled".into(),
        ));
    }

    let console_handle = (!args.no_console).then(|| {
        console::spawn_stdin_console(Arc::clone(&ctx.dispatcher), ctx.shutdown.clone())
    });

    // ── Stop on signal unless `stop` arrives first ──────
    let signal_ctx = Arc::clone(&ctx);
    tokio::spawn(async move {
        tokio::select! {
            () = shutdown_signal() => {
                info!("shutdown signal received");
                signal_ctx.dispatcher.execute(Command::Shutdown).await;
            }
            () = signal_ctx.shutdown.cancelled() => {}
        }
    });

    info!("tether server ready");
    server.wait().await;

    if let Some(handle) = console_handle {
        handle.abort();
    }
    info!("tether server shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
