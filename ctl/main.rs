#![forbid(unsafe_code)]

//! `tether-ctl` — local CLI companion for the `tether` server.
//!
//! Connects to the bridge socket, sends one command line, and prints the
//! JSON response. Does not depend on the library crate.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use clap::{Parser, Subcommand};

/// Sentinel line that terminates every bridge response.
const END_RESPONSE: &str = "END_RESPONSE";

/// Bound on waiting for the server to answer.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(
    name = "tether-ctl",
    about = "Local CLI for the tether bridge socket",
    version,
    long_about = None
)]
struct Cli {
    /// Bridge host.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Bridge port.
    #[arg(long, default_value_t = 9999)]
    port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a message to every connected agent.
    MessageAll {
        /// Message text.
        text: Vec<String>,
    },

    /// Send a message to one agent by address.
    MessageSingle {
        /// Agent IP address.
        ip: String,
        /// Message text.
        text: Vec<String>,
    },

    /// List connected agent addresses.
    ShowIps,

    /// Order every agent to terminate.
    KillSwitch,

    /// Stop the server.
    Stop,

    /// Show the server's command summary.
    Help,
}

impl Command {
    fn to_line(&self) -> String {
        match self {
            Self::MessageAll { text } => format!("message_all {}", text.join(" ")),
            Self::MessageSingle { ip, text } => {
                format!("message_single {ip} {}", text.join(" "))
            }
            Self::ShowIps => "show_ips".into(),
            Self::KillSwitch => "kill_switch".into(),
            Self::Stop => "stop".into(),
            Self::Help => "help".into(),
        }
    }
}

fn main() {
    let args = Cli::parse();
    let line = args.command.to_line();

    match send_bridge_command(&args.host, args.port, &line) {
        Ok(responses) => {
            let mut failed = false;
            for response in responses {
                let ok = response
                    .get("ok")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if ok {
                    if let Some(data) = response.get("data") {
                        println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
                    } else {
                        println!("OK");
                    }
                } else {
                    let err_msg = response
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error");
                    eprintln!("Error: {err_msg}");
                    failed = true;
                }
            }
            if failed {
                std::process::exit(1);
            }
        }
        Err(err) => {
            eprintln!("Failed to talk to server: {err}");
            eprintln!("Is tether running with its bridge on {}:{}?", args.host, args.port);
            std::process::exit(1);
        }
    }
}

/// Send one command line and collect response objects up to the sentinel.
fn send_bridge_command(
    host: &str,
    port: u16,
    line: &str,
) -> std::result::Result<Vec<serde_json::Value>, Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect((host, port))?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let mut request_line = line.to_owned();
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut responses = Vec::new();
    loop {
        let mut response_line = String::new();
        if reader.read_line(&mut response_line)? == 0 {
            return Err("connection closed before END_RESPONSE".into());
        }
        let trimmed = response_line.trim();
        if trimmed == END_RESPONSE {
            break;
        }
        if trimmed.is_empty() {
            continue;
        }
        responses.push(serde_json::from_str(trimmed)?);
    }

    Ok(responses)
}
