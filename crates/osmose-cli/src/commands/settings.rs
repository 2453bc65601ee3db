//! Settings commands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use osmose_core::Console;
use owo_colors::OwoColorize;

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_settings_text};
use crate::util::write_output;

pub async fn cmd_settings_show(
    console: &Console,
    format: OutputFormat,
    output: Option<&PathBuf>,
    quiet: bool,
    opts: &FormatOptions,
) -> Result<()> {
    let loaded = console
        .load_settings()
        .await
        .context("Failed to load settings")?;
    if !loaded && !quiet {
        eprintln!("Controller has no stored settings; showing empty form.");
    }

    let content = match format {
        OutputFormat::Json => opts.as_json(&console.collect_settings().await)?,
        OutputFormat::Text => format_settings_text(&console.settings().form().await),
    };
    write_output(output, &content)
}

pub async fn cmd_settings_set(
    console: &Console,
    values: &[(String, String)],
    reboot: bool,
    quiet: bool,
    opts: &FormatOptions,
) -> Result<()> {
    // Start from the stored values so untouched controls are saved as-is.
    console
        .load_settings()
        .await
        .context("Failed to load settings")?;

    console
        .settings()
        .edit(|form| -> Result<()> {
            for (key, value) in values {
                form.set_from_str(key, value)
                    .with_context(|| format!("Cannot set {} to '{}'", key, value))?;
            }
            Ok(())
        })
        .await?;

    let outcome = if reboot {
        console.save_and_reboot().await
    } else {
        console.save_settings().await
    }
    .context("Failed to save settings")?;

    if !quiet {
        println!("Saved {} setting(s).", values.len());
        if reboot {
            println!("Controller is restarting.");
        }
    }
    if outcome.restart_required && !reboot {
        let warning = "Device name changed - restart required (osmose reboot)";
        if opts.no_color {
            eprintln!("{}", warning);
        } else {
            eprintln!("{}", warning.yellow());
        }
    }
    Ok(())
}
