//! Start and stop commands.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use osmose_core::{Command, Console, ConsoleEvent, EventReceiver};
use osmose_types::DeviceState;
use tokio::time::{Instant, timeout_at};

use crate::format::{FormatOptions, format_status_line};

/// How long to wait for the controller to report the effect of a command.
const ACK_WINDOW: Duration = Duration::from_secs(3);

pub async fn cmd_control(
    console: Console,
    command: Command,
    timeout: Duration,
    quiet: bool,
    opts: &FormatOptions,
) -> Result<()> {
    let mut events = console.subscribe();
    console.connect()?;
    console.wait_connected(timeout).await.with_context(|| {
        format!(
            "Controller at {} did not open the live channel within {}s",
            console.options().base_url,
            timeout.as_secs()
        )
    })?;

    // The controller greets every connection with its state; wait for it
    // so the greeting is not mistaken for the answer.
    let before = wait_for_state(&console, &mut events, ACK_WINDOW).await;

    if !console.send_command(command) {
        bail!("Live channel closed before '{}' could be sent", command);
    }

    // Commands are not acknowledged; the next state change is the answer.
    let deadline = Instant::now() + ACK_WINDOW;
    let mut acknowledged = false;
    while let Ok(Ok(event)) = timeout_at(deadline, events.recv()).await {
        if matches!(event, ConsoleEvent::StatusChanged { .. })
            && console.display().snapshot.state != before
        {
            acknowledged = true;
            break;
        }
    }

    if !quiet {
        if acknowledged {
            println!("{}", format_status_line(&console.display(), opts));
        } else {
            println!("Sent '{}'", command);
        }
    }

    console.shutdown();
    Ok(())
}

async fn wait_for_state(
    console: &Console,
    events: &mut EventReceiver,
    window: Duration,
) -> Option<DeviceState> {
    let deadline = Instant::now() + window;
    loop {
        if let Some(state) = console.display().snapshot.state {
            return Some(state);
        }
        match timeout_at(deadline, events.recv()).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => {
                tracing::debug!("No state report before sending the command");
                return None;
            }
        }
    }
}
