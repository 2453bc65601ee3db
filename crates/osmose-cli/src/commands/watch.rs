//! Watch command implementation.
//!
//! Follows the console's event stream: status, buttons and telemetry as
//! they change, plus history refreshes when the history view is open.
//! Reconnection is handled by the console; this loop only renders.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use osmose_core::{Console, ConsoleEvent, View};
use osmose_types::HistoryRange;
use owo_colors::OwoColorize;
use tokio::sync::broadcast::error::RecvError;

use crate::cli::OutputFormat;
use crate::format::{
    FormatOptions, format_buttons, format_history_text, format_notice, format_status_line,
    format_telemetry,
};

/// Arguments for the watch command.
pub struct WatchArgs<'a> {
    pub history: bool,
    pub range: HistoryRange,
    pub format: OutputFormat,
    pub output: Option<&'a PathBuf>,
    pub quiet: bool,
    pub opts: &'a FormatOptions,
}

pub async fn cmd_watch(console: Console, args: WatchArgs<'_>) -> Result<()> {
    let WatchArgs {
        history,
        range,
        format,
        output,
        quiet,
        opts,
    } = args;

    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };

    let mut events = console.subscribe();

    if history {
        console.history().set_range(range);
        // A failed first load is reported as a notice; the timer retries.
        if let Err(e) = console.show(View::History).await {
            tracing::debug!("Initial history load failed: {}", e);
        }
    }

    console.connect()?;
    if !quiet {
        let header = format!("Watching {}", console.options().base_url);
        if opts.no_color {
            eprintln!("{}", header);
        } else {
            eprintln!("{}", header.green());
        }
        eprintln!("Press Ctrl+C to stop");
        eprintln!("{}", "-".repeat(50));
    }

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if !quiet {
                    eprintln!("\nShutting down...");
                }
                break;
            }
            event = events.recv() => event,
        };

        let event = match event {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Output fell behind, skipped {} events", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        if format == OutputFormat::Json {
            // One event per line for piping
            let line = serde_json::to_string(&event)?;
            writeln!(out, "{}", line)?;
            out.flush()?;
            continue;
        }

        match event {
            ConsoleEvent::Connected { url } => {
                if !quiet {
                    eprintln!("Connected to {}", url);
                }
            }
            ConsoleEvent::Disconnected { reconnect_in_ms } => {
                if !quiet {
                    eprintln!(
                        "Connection lost. Reconnecting in {:.1}s...",
                        reconnect_in_ms as f64 / 1000.0
                    );
                }
            }
            ConsoleEvent::Snapshot { .. } => {
                writeln!(out, "{}", format_telemetry(&console.display()))?;
            }
            ConsoleEvent::StatusChanged { .. } => {
                writeln!(out, "{}", format_status_line(&console.display(), opts))?;
            }
            ConsoleEvent::ButtonsChanged { buttons } => {
                writeln!(out, "{}", format_buttons(&buttons, opts))?;
            }
            ConsoleEvent::SeriesUpdated { .. } => {}
            ConsoleEvent::TableUpdated { .. } => {
                let pipeline = console.history();
                let text = format_history_text(
                    pipeline.range(),
                    pipeline.last_values().as_deref(),
                    &pipeline.rows(),
                    opts,
                );
                write!(out, "{}", text)?;
            }
            ConsoleEvent::Notice(notice) => {
                eprintln!("{}", format_notice(&notice, opts));
            }
            _ => {}
        }
        out.flush()?;
    }

    console.shutdown();
    Ok(())
}
