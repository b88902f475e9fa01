//! syncwatch binary: wires standard input/output to the protocol engine.
//!
//! Diagnostics go to stderr; stdout carries the protocol. A fatal error is
//! reported to the driver as an `ERROR` line before exiting non-zero.

use anyhow::Result;
use std::io::Write;
use std::process::ExitCode;
use syncwatch::monitor::watcher::FsWatcher;
use syncwatch::proto::engine::Engine;
use syncwatch::proto::wire;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Bound on buffered filesystem events before the notifier blocks.
const EVENT_BUFFER: usize = 1024;
/// Bound on buffered driver lines before the reader task blocks.
const LINE_BUFFER: usize = 16;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // The driver learns about the failure in-band before the exit
            // status does.
            let message = err.to_string();
            let mut stdout = std::io::stdout();
            let _ = writeln!(stdout, "{}", wire::format_line("ERROR", &[message.as_str()]));
            let _ = stdout.flush();
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("syncwatch=warn"));
    let (filter, reload_handle) = tracing_subscriber::reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let (watcher, events) = FsWatcher::new(EVENT_BUFFER)?;
    let lines = spawn_stdin_reader();

    let mut engine = Engine::new(watcher, events, lines, tokio::io::stdout());
    engine.set_debug_hook(Box::new(move || {
        if let Err(err) = reload_handle.reload(EnvFilter::new("syncwatch=debug")) {
            tracing::warn!("failed to enable verbose diagnostics: {err}");
        }
    }));

    engine.run().await?;
    Ok(())
}

/// Reads driver lines in a parallel task so a blocked read cannot starve
/// event delivery. Channel closure signals end of input.
fn spawn_stdin_reader() -> mpsc::Receiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(Ok(line)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    break;
                }
            }
        }
    });
    rx
}
