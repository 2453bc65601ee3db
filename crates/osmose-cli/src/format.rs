//! Output formatting for text and JSON output.

use anyhow::Result;
use osmose_core::{
    ButtonEnablement, DisplayState, HistoryRow, Notice, NoticeLevel, SettingsForm,
};
use osmose_types::{HistoryRange, NetworkEntry};
use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Formatting options for output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
    /// Use compact JSON output (no pretty-printing).
    pub compact: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool, compact: bool) -> Self {
        Self { no_color, compact }
    }

    /// Serialize value to JSON string, respecting compact option.
    pub fn as_json<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = if self.compact {
            serde_json::to_string(value)?
        } else {
            serde_json::to_string_pretty(value)?
        };
        Ok(json + "\n")
    }
}

/// Keys whose values are never echoed in text output.
const SECRET_KEYS: &[&str] = &["APPassWord", "wifiPassword"];

fn on_off(enabled: bool, opts: &FormatOptions) -> String {
    match (enabled, opts.no_color) {
        (true, true) => "enabled".to_string(),
        (false, true) => "disabled".to_string(),
        (true, false) => format!("{}", "enabled".green()),
        (false, false) => format!("{}", "disabled".dimmed()),
    }
}

/// Button enablement as `start: enabled  stop: disabled`.
#[must_use]
pub fn format_buttons(buttons: &ButtonEnablement, opts: &FormatOptions) -> String {
    format!(
        "start: {}  stop: {}",
        on_off(buttons.start, opts),
        on_off(buttons.stop, opts)
    )
}

/// The status line, or a placeholder before the first state report.
#[must_use]
pub fn format_status_line(display: &DisplayState, opts: &FormatOptions) -> String {
    let Some(line) = display.status_line.as_deref() else {
        return "waiting for controller state".to_string();
    };
    if opts.no_color {
        return line.to_string();
    }
    if display.snapshot.active_error().is_some() {
        format!("{}", line.red().bold())
    } else {
        format!("{}", line.cyan().bold())
    }
}

/// One line of telemetry for watch output.
#[must_use]
pub fn format_telemetry(display: &DisplayState) -> String {
    let labels = display.labels();
    format!(
        "TDS {} ppm | Liters {} | Flow {} l/min | In {} l/min | Left {} | Time left {}",
        labels.tds, labels.liters, labels.flow, labels.flow_in, labels.left, labels.time_left
    )
}

/// Full text block: status, buttons and telemetry.
#[must_use]
pub fn format_display_text(display: &DisplayState, opts: &FormatOptions) -> String {
    format!(
        "{}\n  {}\n  {}\n",
        format_status_line(display, opts),
        format_buttons(&display.buttons, opts),
        format_telemetry(display)
    )
}

/// A notice with its level as prefix.
#[must_use]
pub fn format_notice(notice: &Notice, opts: &FormatOptions) -> String {
    let text = &notice.message;
    let tag = match notice.level {
        NoticeLevel::Info => "info",
        NoticeLevel::Warning => "warning",
        NoticeLevel::Error => "error",
    };
    if opts.no_color {
        return format!("[{}] {}", tag, text);
    }
    match notice.level {
        NoticeLevel::Info => format!("[{}] {}", tag.blue(), text),
        NoticeLevel::Warning => format!("[{}] {}", tag.yellow(), text),
        NoticeLevel::Error => format!("[{}] {}", tag.red().bold(), text),
    }
}

/// Settings in schema order, with display units.
#[must_use]
pub fn format_settings_text(form: &SettingsForm) -> String {
    #[derive(Tabled)]
    struct SettingRow {
        #[tabled(rename = "Key")]
        key: &'static str,
        #[tabled(rename = "Setting")]
        label: &'static str,
        #[tabled(rename = "Value")]
        value: String,
    }

    let rows: Vec<SettingRow> = form
        .iter()
        .map(|(spec, value)| {
            let mut shown = value.to_string();
            if SECRET_KEYS.contains(&spec.key) && !shown.is_empty() {
                shown = "********".to_string();
            }
            SettingRow {
                key: spec.key,
                label: spec.label,
                value: shown,
            }
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    format!("{}\n", table)
}

/// Series summary plus the run table.
#[must_use]
pub fn format_history_text(
    range: HistoryRange,
    summary: Option<&str>,
    rows: &[HistoryRow],
    opts: &FormatOptions,
) -> String {
    #[derive(Tabled)]
    struct RunRow<'a> {
        #[tabled(rename = "Mode")]
        mode: &'a str,
        #[tabled(rename = "Start")]
        start: &'a str,
        #[tabled(rename = "End")]
        end: &'a str,
        #[tabled(rename = "Duration")]
        duration: &'a str,
        #[tabled(rename = "Liters")]
        liters: &'a str,
        #[tabled(rename = "Reason")]
        reason: &'a str,
    }

    let heading = format!("History ({})", range.label());
    let mut out = if opts.no_color {
        heading
    } else {
        format!("{}", heading.bold())
    };
    out.push('\n');
    out.push_str(summary.unwrap_or("No samples in range"));
    out.push_str("\n\n");

    if rows.is_empty() {
        out.push_str("No runs recorded.\n");
        return out;
    }

    let table_rows = rows.iter().map(|r| RunRow {
        mode: &r.mode,
        start: &r.start,
        end: &r.end,
        duration: &r.duration,
        liters: &r.liters,
        reason: &r.reason,
    });
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    out.push_str(&format!("{}\n", table));
    out
}

/// Networks with a coarse signal bar.
#[must_use]
pub fn format_networks_text(networks: &[NetworkEntry], opts: &FormatOptions) -> String {
    #[derive(Tabled)]
    struct NetworkRow {
        #[tabled(rename = "SSID")]
        ssid: String,
        #[tabled(rename = "Signal")]
        signal: String,
        #[tabled(rename = "RSSI")]
        rssi: i32,
    }

    if networks.is_empty() {
        return "No networks found.\n".to_string();
    }

    let rows: Vec<NetworkRow> = networks
        .iter()
        .map(|n| NetworkRow {
            ssid: n.ssid.clone(),
            signal: signal_bar(n.rssi, opts.no_color),
            rssi: n.rssi,
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    format!("Found {} network(s)\n\n{}\n", networks.len(), table)
}

/// Four-step bar for an RSSI in dBm.
fn signal_bar(rssi: i32, no_color: bool) -> String {
    let bars = match rssi {
        r if r >= -55 => 4,
        r if r >= -67 => 3,
        r if r >= -75 => 2,
        _ => 1,
    };
    let bar = format!("{}{}", "▮".repeat(bars), "▯".repeat(4 - bars));
    if no_color {
        return bar;
    }
    match bars {
        4 | 3 => format!("{}", bar.green()),
        2 => format!("{}", bar.yellow()),
        _ => format!("{}", bar.red()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osmose_core::Reconciler;
    use osmose_types::{DeviceSnapshot, DeviceState, Mode};

    const PLAIN: FormatOptions = FormatOptions {
        no_color: true,
        compact: false,
    };

    fn display(snapshot: DeviceSnapshot) -> DisplayState {
        let mut reconciler = Reconciler::new();
        reconciler.merge(&snapshot).display
    }

    #[test]
    fn test_status_placeholder_before_state() {
        let d = display(DeviceSnapshot {
            tds: Some(12.0),
            ..Default::default()
        });
        assert_eq!(format_status_line(&d, &PLAIN), "waiting for controller state");
    }

    #[test]
    fn test_display_text() {
        let d = display(DeviceSnapshot {
            state: Some(DeviceState::Idle),
            mode: Some(Mode::Manual),
            tds: Some(41.26),
            liters: Some(3.0),
            time_left: Some(245.0),
            ..Default::default()
        });
        let text = format_display_text(&d, &PLAIN);
        assert!(text.starts_with("MANUAL • IDLE\n"));
        assert!(text.contains("start: enabled  stop: disabled"));
        assert!(text.contains("TDS 41.3 ppm"));
        assert!(text.contains("Liters 3.00"));
        assert!(text.contains("Flow - l/min"));
        assert!(text.contains("Time left 4m05s"));
    }

    #[test]
    fn test_notice_plain() {
        let notice = Notice::warning("Device name changed - restart required");
        assert_eq!(
            format_notice(&notice, &PLAIN),
            "[warning] Device name changed - restart required"
        );
    }

    #[test]
    fn test_settings_mask_passwords() {
        let mut form = SettingsForm::new();
        form.set_from_str("wifiPassword", "hunter2").unwrap();
        form.set_from_str("wifiSSID", "home").unwrap();
        let text = format_settings_text(&form);
        assert!(!text.contains("hunter2"));
        assert!(text.contains("********"));
        assert!(text.contains("home"));
        assert!(text.contains("Service flush interval (h)"));
    }

    #[test]
    fn test_history_without_runs() {
        let text = format_history_text(HistoryRange::SixHours, None, &[], &PLAIN);
        assert_eq!(
            text,
            "History (6h)\nNo samples in range\n\nNo runs recorded.\n"
        );
    }

    #[test]
    fn test_networks_table() {
        let networks = vec![
            NetworkEntry {
                ssid: "home".to_string(),
                rssi: -50,
            },
            NetworkEntry {
                ssid: "garage".to_string(),
                rssi: -80,
            },
        ];
        let text = format_networks_text(&networks, &PLAIN);
        assert!(text.starts_with("Found 2 network(s)"));
        assert!(text.contains("▮▮▮▮"));
        assert!(text.contains("▮▯▯▯"));
        assert_eq!(format_networks_text(&[], &PLAIN), "No networks found.\n");
    }

    #[test]
    fn test_compact_json() {
        let opts = FormatOptions::new(true, true);
        let json = opts.as_json(&serde_json::json!({"a": 1})).unwrap();
        assert_eq!(json, "{\"a\":1}\n");
    }
}
