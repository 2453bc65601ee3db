//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use osmose_types::HistoryRange;

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "osmose")]
#[command(author, version, about = "Console for osmose reverse-osmosis controllers", long_about = None)]
pub struct Cli {
    /// Controller base URL, or use OSMOSE_DEVICE env var
    #[arg(short, long, global = true, env = "OSMOSE_DEVICE")]
    pub device: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Output compact JSON (no pretty-printing)
    #[arg(long, global = true)]
    pub compact: bool,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Follow live state until interrupted
    Watch {
        /// Keep the history view open and print each refresh
        #[arg(long)]
        history: bool,

        /// History range (10m, 1h, 6h, 24h)
        #[arg(short, long)]
        range: Option<HistoryRange>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Start a production run
    Start {
        /// Seconds to wait for the live channel
        #[arg(short = 'T', long, default_value = "10")]
        timeout: u64,
    },

    /// Stop the current run
    Stop {
        /// Seconds to wait for the live channel
        #[arg(short = 'T', long, default_value = "10")]
        timeout: u64,
    },

    /// Show or change persisted settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Show the series summary and run table
    History {
        /// History range (10m, 1h, 6h, 24h)
        #[arg(short, long)]
        range: Option<HistoryRange>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete all stored run history
    ClearHistory {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// List Wi-Fi networks seen by the controller
    Scan {
        /// Give up after this many polls
        #[arg(long)]
        max_polls: Option<u32>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Restart the controller
    Reboot {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Manage CLI configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Print every setting in display units
    Show {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Change settings by key (e.g. mqttPort=1883 serviceFlushIntervalSec=2)
    Set {
        /// KEY=VALUE pairs
        #[arg(required = true, value_parser = parse_assignment)]
        values: Vec<(String, String)>,

        /// Restart the controller after saving
        #[arg(long)]
        reboot: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the config file path
    Path,
    /// Print the current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Key (device, reconnect_delay_ms, history_refresh_secs, timeout_secs, default_range)
        key: String,
        /// Value
        value: String,
    },
    /// Remove a configuration value
    Unset {
        /// Key to remove
        key: String,
    },
}

/// Split `KEY=VALUE`; the value may be empty.
pub fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}
