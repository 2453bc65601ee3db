//! Scan command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use osmose_core::Console;

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_networks_text};
use crate::util::write_output;

pub async fn cmd_scan(
    console: &Console,
    format: OutputFormat,
    output: Option<&PathBuf>,
    quiet: bool,
    opts: &FormatOptions,
) -> Result<()> {
    if !quiet && format == OutputFormat::Text {
        eprintln!("Waiting for the controller to finish scanning...");
    }

    let networks = console
        .scan_networks()
        .await
        .context("Failed to scan for networks")?;

    let content = match format {
        OutputFormat::Json => opts.as_json(&networks)?,
        OutputFormat::Text => format_networks_text(&networks, opts),
    };
    write_output(output, &content)
}
