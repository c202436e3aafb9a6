#![forbid(unsafe_code)]

//! `tether-agent` — headless agent for the tether control channel.
//!
//! Connects to the server, keeps the session alive with `PING`, prints
//! operator messages, and exits on `KILL_SWITCH`.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use tether::agent::{run_agent, AgentConfig, AgentTarget, Notice};
use tether::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "tether-agent", about = "Headless tether agent", version, long_about = None)]
struct Cli {
    /// Server address as `host:port` or bare `host`.
    #[arg(default_value = "127.0.0.1:9998")]
    server: AgentTarget,

    /// Seconds between `PING` messages.
    #[arg(long, default_value_t = 3)]
    ping_interval: u64,

    /// Seconds to wait after a failed connection attempt.
    #[arg(long, default_value_t = 30)]
    reconnect_delay: u64,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let mut config = AgentConfig::new(args.server);
    config.ping_interval = Duration::from_secs(args.ping_interval);
    config.reconnect_delay = Duration::from_secs(args.reconnect_delay);
    info!(server = %config.target, "agent initialized");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(config))
}

async fn run(config: AgentConfig) -> Result<()> {
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(64);

    let printer = tokio::spawn(async move {
        while let Some(notice) = rx.recv().await {
            match notice {
                Notice::Connected => println!("[connected]"),
                Notice::Disconnected { reason } => println!("[disconnected] {reason}"),
                Notice::Message(text) => println!("Server message: {text}"),
                Notice::UpdateCheck => println!("[auto-update check]"),
                Notice::KillSwitch => println!("[kill switch received]"),
            }
        }
    });

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    let result = run_agent(config, tx, cancel).await;
    let _ = printer.await;
    info!("agent stopped");
    result
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
