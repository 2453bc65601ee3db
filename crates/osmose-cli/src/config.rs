//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use osmose_core::ConsoleOptions;
use osmose_core::options::DEFAULT_BASE_URL;
use osmose_types::HistoryRange;
use serde::{Deserialize, Serialize};

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Controller base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    /// Delay before reconnecting the live channel, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_delay_ms: Option<u64>,

    /// Period of the history refresh timer, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_refresh_secs: Option<u64>,

    /// HTTP request timeout, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// History range used when none is given (10m, 1h, 6h, 24h)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_range: Option<String>,
}

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("osmose")
            .join("config.toml")
    }

    /// Load config from the default path, or return default if not found
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load config from `path`. Unreadable or malformed files yield defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to parse config {}: {}", path.display(), e);
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config {}: {}", path.display(), e);
            }
        }
        Self::default()
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path())
    }

    /// Save config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Set a key from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "device" => self.device = Some(value.to_string()),
            "reconnect_delay_ms" => self.reconnect_delay_ms = Some(parse_positive(key, value)?),
            "history_refresh_secs" => {
                self.history_refresh_secs = Some(parse_positive(key, value)?)
            }
            "timeout_secs" => self.timeout_secs = Some(parse_positive(key, value)?),
            "default_range" => {
                let range: HistoryRange = value.parse()?;
                self.default_range = Some(range.label().to_string());
            }
            _ => bail!("Unknown config key '{}'", key),
        }
        Ok(())
    }

    /// Remove a key.
    pub fn unset(&mut self, key: &str) -> Result<()> {
        match key {
            "device" => self.device = None,
            "reconnect_delay_ms" => self.reconnect_delay_ms = None,
            "history_refresh_secs" => self.history_refresh_secs = None,
            "timeout_secs" => self.timeout_secs = None,
            "default_range" => self.default_range = None,
            _ => bail!("Unknown config key '{}'", key),
        }
        Ok(())
    }

    /// Build console options for `device`, layering the file over defaults.
    pub fn console_options(&self, device: &str) -> ConsoleOptions {
        let mut options = ConsoleOptions::new(device);
        if let Some(ms) = self.reconnect_delay_ms {
            options = options.reconnect_delay(Duration::from_millis(ms));
        }
        if let Some(secs) = self.history_refresh_secs {
            options = options.history_refresh(Duration::from_secs(secs));
        }
        if let Some(secs) = self.timeout_secs {
            options = options.request_timeout(Duration::from_secs(secs));
        }
        options
    }

    /// The configured default range; an invalid entry falls back to 1h.
    pub fn default_range(&self) -> HistoryRange {
        match self.default_range.as_deref().map(str::parse::<HistoryRange>) {
            Some(Ok(range)) => range,
            Some(Err(e)) => {
                tracing::warn!("Ignoring default_range: {}", e);
                HistoryRange::default()
            }
            None => HistoryRange::default(),
        }
    }
}

fn parse_positive(key: &str, value: &str) -> Result<u64> {
    let n: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("{} must be a whole number", key))?;
    if n == 0 {
        bail!("{} must be greater than zero", key);
    }
    Ok(n)
}

/// Resolve the controller URL.
///
/// The flag (which clap already fills from `OSMOSE_DEVICE`) wins over the
/// config file, which wins over the built-in default.
pub fn resolve_device(device: Option<String>, config: &Config) -> String {
    device
        .or_else(|| config.device.clone())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

/// Resolve the history range: explicit flag, then config.
pub fn resolve_range(range: Option<HistoryRange>, config: &Config) -> HistoryRange {
    range.unwrap_or_else(|| config.default_range())
}
