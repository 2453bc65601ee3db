//! Command implementations for the CLI.

mod config;
mod control;
mod history;
mod reboot;
mod scan;
mod settings;
mod watch;

pub use config::cmd_config;
pub use control::cmd_control;
pub use history::{HistoryArgs, cmd_clear_history, cmd_history};
pub use reboot::cmd_reboot;
pub use scan::cmd_scan;
pub use settings::{cmd_settings_set, cmd_settings_show};
pub use watch::{WatchArgs, cmd_watch};
