//! Reboot command implementation.

use anyhow::{Context, Result};
use osmose_core::Console;

use crate::util::confirm;

pub async fn cmd_reboot(console: &Console, yes: bool, quiet: bool) -> Result<()> {
    if !confirm("Restart the controller now?", yes)? {
        eprintln!("Cancelled.");
        return Ok(());
    }

    console
        .reboot()
        .await
        .context("Failed to request a reboot")?;
    if !quiet {
        println!("Controller is restarting.");
    }
    Ok(())
}
