//! Operator console: reads command lines and prints human-readable results.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::command::HELP_TEXT;
use crate::dispatch::Dispatcher;
use crate::Result;

/// Prompt printed before each command.
const PROMPT: &str = "> ";

/// Read commands from `input` until EOF or cancellation.
///
/// End of input stops the console but leaves the server running.
///
/// # Errors
///
/// Returns `AppError::Io` if writing to `output` or reading `input` fails.
pub async fn run_console<R, W>(
    input: R,
    mut output: W,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output
        .write_all(format!("Server started. {HELP_TEXT}\n").as_bytes())
        .await?;

    let mut lines = input.lines();
    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        let line = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            debug!("console input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let outcome = dispatcher.execute_line(&line, "console").await;
        let rendered = outcome.to_string();
        output
            .write_all(format!("{}\n", rendered.trim_end()).as_bytes())
            .await?;
    }

    output.flush().await?;
    Ok(())
}

/// Spawn the console on the process's stdin/stdout.
#[must_use]
pub fn spawn_stdin_console(
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        if let Err(err) = run_console(stdin, stdout, dispatcher, cancel).await {
            warn!(%err, "console stopped");
        }
    })
}
