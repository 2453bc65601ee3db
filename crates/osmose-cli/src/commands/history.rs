//! History commands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use osmose_core::{Console, SeriesBuffer};
use osmose_types::{HistoryRange, HistoryRecord, HistorySeries};
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_history_text};
use crate::util::{confirm, write_output};

/// Arguments for the history command.
pub struct HistoryArgs<'a> {
    pub range: HistoryRange,
    pub format: OutputFormat,
    pub output: Option<&'a PathBuf>,
    pub opts: &'a FormatOptions,
}

#[derive(Serialize)]
struct HistoryJson<'a> {
    range: &'static str,
    summary: Option<String>,
    series: HistorySeries,
    runs: &'a [HistoryRecord],
}

pub async fn cmd_history(console: &Console, chart: &SeriesBuffer, args: HistoryArgs<'_>) -> Result<()> {
    let HistoryArgs {
        range,
        format,
        output,
        opts,
    } = args;

    // Loading the series also reloads the run table.
    console
        .set_range(range)
        .await
        .with_context(|| format!("Failed to load {} history", range.label()))?;

    let pipeline = console.history();
    let content = match format {
        OutputFormat::Json => {
            let runs = pipeline.records();
            opts.as_json(&HistoryJson {
                range: range.label(),
                summary: pipeline.last_values(),
                series: chart.series(),
                runs: &runs,
            })?
        }
        OutputFormat::Text => format_history_text(
            range,
            pipeline.last_values().as_deref(),
            &pipeline.rows(),
            opts,
        ),
    };
    write_output(output, &content)
}

pub async fn cmd_clear_history(console: &Console, yes: bool, quiet: bool) -> Result<()> {
    let confirmed = confirm("Delete all stored run history?", yes)?;
    let cleared = console
        .clear_history(|| confirmed)
        .await
        .context("Failed to clear history")?;

    if !quiet {
        if cleared {
            println!("History cleared.");
        } else {
            eprintln!("Cancelled.");
        }
    }
    Ok(())
}
