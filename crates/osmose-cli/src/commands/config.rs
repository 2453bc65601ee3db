//! Config command implementation.

use anyhow::{Context, Result};

use crate::cli::ConfigAction;
use crate::config::Config;

pub fn cmd_config(action: &ConfigAction, quiet: bool) -> Result<()> {
    let path = Config::path();
    match action {
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Show => {
            let config = Config::load();
            let content = toml::to_string_pretty(&config).context("Failed to serialize config")?;
            if content.trim().is_empty() {
                println!("# {} (defaults)", path.display());
            } else {
                print!("{}", content);
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load();
            config.set(key, value)?;
            config.save()?;
            if !quiet {
                println!("Set {} in {}", key, path.display());
            }
        }
        ConfigAction::Unset { key } => {
            let mut config = Config::load();
            config.unset(key)?;
            config.save()?;
            if !quiet {
                println!("Removed {} from {}", key, path.display());
            }
        }
    }
    Ok(())
}
