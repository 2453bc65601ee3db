//! Utility functions for CLI operations.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use dialoguer::{Confirm, theme::ColorfulTheme};
use osmose_core::{Console, ConsoleOptions, SeriesBuffer};

/// Build a console whose series land in `chart`.
pub fn open_console(options: ConsoleOptions, chart: Arc<SeriesBuffer>) -> Result<Console> {
    tracing::debug!("Using controller at {}", options.base_url);
    let url = options.base_url.clone();
    Console::new(options, chart).with_context(|| format!("Invalid controller address '{}'", url))
}

/// Ask a yes/no question; `assume_yes` skips the prompt.
///
/// Without a terminal there is nobody to ask, so the answer is an error
/// pointing at the flag.
pub fn confirm(prompt: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    if !io::stdin().is_terminal() || !io::stderr().is_terminal() {
        bail!("Cannot prompt for confirmation in non-interactive mode. Use --yes to skip it.");
    }
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Failed to read confirmation")
}

/// Write output to file or stdout.
pub fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirm_assume_yes() {
        assert!(confirm("Clear history?", true).unwrap());
    }

    #[test]
    fn test_open_console_rejects_bad_url() {
        let options = ConsoleOptions::new("ftp://tank");
        let err = open_console(options, Arc::new(SeriesBuffer::new())).unwrap_err();
        assert!(err.to_string().contains("ftp://tank"));
    }

    #[test]
    fn test_write_output_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_output(Some(&path), "hello\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }
}
