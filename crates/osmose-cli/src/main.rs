//! Command-line console for osmose reverse-osmosis controllers.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `watch` | Follow status, buttons and telemetry live |
//! | `start` / `stop` | Send a run command |
//! | `settings show` / `settings set` | Read or change persisted settings |
//! | `history` | Series summary and run table |
//! | `clear-history` | Delete stored run history |
//! | `scan` | List Wi-Fi networks seen by the controller |
//! | `reboot` | Restart the controller |
//! | `config` | Manage CLI configuration |
//!
//! The controller address comes from `--device`, then `OSMOSE_DEVICE`, then
//! `device` in `<config_dir>/osmose/config.toml`, then `http://osmose.local`.

mod cli;
mod commands;
mod config;
mod format;
mod util;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use osmose_core::{Command, SeriesBuffer};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, SettingsAction};
use commands::*;
use config::{Config, resolve_device, resolve_range};
use format::FormatOptions;
use util::open_console;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let quiet = cli.quiet;
    let output = cli.output.as_ref();
    let opts = FormatOptions::new(cli.no_color, cli.compact);

    if let Commands::Config { action } = &cli.command {
        return cmd_config(action, quiet);
    }

    let config = Config::load();
    let mut options = config.console_options(&resolve_device(cli.device.clone(), &config));
    if let Commands::Scan {
        max_polls: Some(polls),
        ..
    } = cli.command
    {
        options = options.scan_max_polls(polls);
    }
    let chart = Arc::new(SeriesBuffer::new());
    let console = open_console(options, Arc::clone(&chart))?;

    match cli.command {
        Commands::Watch {
            history,
            range,
            format,
        } => {
            cmd_watch(
                console,
                WatchArgs {
                    history,
                    range: resolve_range(range, &config),
                    format,
                    output,
                    quiet,
                    opts: &opts,
                },
            )
            .await?;
        }
        Commands::Start { timeout } => {
            cmd_control(console, Command::Start, Duration::from_secs(timeout), quiet, &opts)
                .await?;
        }
        Commands::Stop { timeout } => {
            cmd_control(console, Command::Stop, Duration::from_secs(timeout), quiet, &opts)
                .await?;
        }
        Commands::Settings { action } => match action {
            SettingsAction::Show { format } => {
                cmd_settings_show(&console, format, output, quiet, &opts).await?;
            }
            SettingsAction::Set { values, reboot } => {
                cmd_settings_set(&console, &values, reboot, quiet, &opts).await?;
            }
        },
        Commands::History { range, format } => {
            cmd_history(
                &console,
                &chart,
                HistoryArgs {
                    range: resolve_range(range, &config),
                    format,
                    output,
                    opts: &opts,
                },
            )
            .await?;
        }
        Commands::ClearHistory { yes } => cmd_clear_history(&console, yes, quiet).await?,
        Commands::Scan { format, .. } => {
            cmd_scan(&console, format, output, quiet, &opts).await?;
        }
        Commands::Reboot { yes } => cmd_reboot(&console, yes, quiet).await?,
        Commands::Config { .. } => {}
    }

    Ok(())
}
