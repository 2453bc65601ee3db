//! State reconciliation.
//!
//! The controller pushes sparse snapshots; the [`Reconciler`] folds them into
//! the held [`DisplayState`] and derives what the operator may do next.
//!
//! Derived values are only recomputed when a partial carries one of their
//! inputs:
//!
//! | Partial carries | Recomputed |
//! |-----------------|------------|
//! | `state`, `mode` or `autoBlocked` | [`ButtonEnablement`] |
//! | `state`, `mode` or `error` | status line |
//! | a `state` different from the held one | [`StateTransition`] |

use serde::{Deserialize, Serialize};

use osmose_types::{DeviceSnapshot, DeviceState, Mode};

use crate::util::{format_mmss_f64, or_dash};

/// Which control commands are currently meaningful.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonEnablement {
    /// The start button is enabled.
    pub start: bool,
    /// The stop button is enabled.
    pub stop: bool,
}

impl ButtonEnablement {
    /// Derive enablement from the control inputs.
    ///
    /// - start: at rest, mode not `OFF`, and not blocked in `AUTO`
    /// - stop: away from rest
    ///
    /// Until a state has been received both buttons stay disabled.
    #[must_use]
    pub fn derive(state: Option<&DeviceState>, mode: Option<Mode>, auto_blocked: bool) -> Self {
        let Some(state) = state else {
            return Self::default();
        };
        let at_rest = state.is_at_rest();
        let blocked = mode == Some(Mode::Auto) && auto_blocked;
        Self {
            start: at_rest && mode != Some(Mode::Off) && !blocked,
            stop: !at_rest,
        }
    }

    /// Derive enablement from a merged snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &DeviceSnapshot) -> Self {
        Self::derive(
            snapshot.state.as_ref(),
            snapshot.mode,
            snapshot.auto_blocked.unwrap_or(false),
        )
    }
}

/// An observed change of the controller's run state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    /// The held state before the change (`None` for the first report).
    pub from: Option<DeviceState>,
    /// The new state.
    pub to: DeviceState,
}

/// Everything a UI shell binds to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayState {
    /// Last known value of every field.
    pub snapshot: DeviceSnapshot,
    /// Derived button enablement.
    pub buttons: ButtonEnablement,
    /// `[MODE • ]STATE[ : error]`, once a state is known.
    pub status_line: Option<String>,
}

/// Telemetry rendered for display; `-` marks fields never received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryLabels {
    pub tds: String,
    pub liters: String,
    pub flow: String,
    pub flow_in: String,
    pub left: String,
    pub time_left: String,
    pub status: String,
    pub esp_version: String,
}

impl DisplayState {
    /// Render the telemetry fields.
    #[must_use]
    pub fn labels(&self) -> TelemetryLabels {
        let s = &self.snapshot;
        let two = |v: f64| format!("{:.2}", v);
        TelemetryLabels {
            tds: or_dash(s.tds, |v| format!("{:.1}", v)),
            liters: or_dash(s.liters, two),
            flow: or_dash(s.flow, two),
            flow_in: or_dash(s.flow_in, two),
            left: or_dash(s.left, two),
            time_left: or_dash(s.time_left, format_mmss_f64),
            status: or_dash(s.status.clone(), |v| v),
            esp_version: or_dash(s.esp_version.clone(), |v| v),
        }
    }
}

/// Compose the status line from the merged snapshot.
fn compose_status(snapshot: &DeviceSnapshot) -> Option<String> {
    let state = snapshot.state.as_ref()?;
    let mut line = match snapshot.mode {
        Some(mode) => format!("{} • {}", mode, state),
        None => state.to_string(),
    };
    if let Some(error) = snapshot.active_error() {
        line.push_str(" : ");
        line.push_str(error);
    }
    Some(line)
}

/// Result of merging one partial snapshot.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The display state after the merge.
    pub display: DisplayState,
    /// Set when the partial changed the run state.
    pub transition: Option<StateTransition>,
    /// Button enablement differs from before the merge.
    pub buttons_changed: bool,
    /// The status line differs from before the merge.
    pub status_changed: bool,
    /// The partial announced a change of the run table.
    pub history_push: bool,
}

/// Holds the display state and merges partial snapshots into it.
#[derive(Debug, Default)]
pub struct Reconciler {
    held: DisplayState,
}

impl Reconciler {
    /// Create a reconciler with nothing known.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current display state.
    pub fn display(&self) -> &DisplayState {
        &self.held
    }

    /// Forget everything received so far.
    pub fn reset(&mut self) {
        self.held = DisplayState::default();
    }

    /// Merge one partial snapshot.
    pub fn merge(&mut self, partial: &DeviceSnapshot) -> MergeOutcome {
        let transition = match &partial.state {
            Some(to) if self.held.snapshot.state.as_ref() != Some(to) => Some(StateTransition {
                from: self.held.snapshot.state.clone(),
                to: to.clone(),
            }),
            _ => None,
        };

        self.held.snapshot.merge(partial);

        let mut buttons_changed = false;
        if partial.touches_controls() {
            let buttons = ButtonEnablement::from_snapshot(&self.held.snapshot);
            buttons_changed = buttons != self.held.buttons;
            self.held.buttons = buttons;
        }

        let mut status_changed = false;
        if partial.touches_status() {
            let status = compose_status(&self.held.snapshot);
            status_changed = status != self.held.status_line;
            self.held.status_line = status;
        }

        MergeOutcome {
            display: self.held.clone(),
            transition,
            buttons_changed,
            status_changed,
            history_push: partial.hist_update,
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn state_strategy() -> impl Strategy<Value = DeviceState> {
        prop_oneof![
            Just(DeviceState::Idle),
            Just(DeviceState::Running),
            Just(DeviceState::Flushing),
            Just(DeviceState::Production),
            Just(DeviceState::Info),
            Just(DeviceState::Error),
            "[A-Z]{3,8}".prop_map(DeviceState::from),
        ]
    }

    fn mode_strategy() -> impl Strategy<Value = Mode> {
        prop_oneof![Just(Mode::Off), Just(Mode::Manual), Just(Mode::Auto)]
    }

    fn partial_strategy() -> impl Strategy<Value = DeviceSnapshot> {
        (
            proptest::option::of(state_strategy()),
            proptest::option::of(mode_strategy()),
            proptest::option::of(any::<bool>()),
            proptest::option::of(0.0f64..500.0),
            proptest::option::of(0.0f64..100.0),
            proptest::option::of("[a-z ]{0,12}"),
        )
            .prop_map(|(state, mode, auto_blocked, tds, liters, error)| DeviceSnapshot {
                state,
                mode,
                auto_blocked,
                tds,
                liters,
                error,
                ..Default::default()
            })
    }

    proptest! {
        /// Every field shows the value of the latest partial that carried it.
        #[test]
        fn merge_keeps_latest_present_value(partials in proptest::collection::vec(partial_strategy(), 0..20)) {
            let mut reconciler = Reconciler::new();
            for partial in &partials {
                reconciler.merge(partial);
            }
            let held = &reconciler.display().snapshot;

            let latest_state = partials.iter().rev().find_map(|p| p.state.clone());
            let latest_mode = partials.iter().rev().find_map(|p| p.mode);
            let latest_blocked = partials.iter().rev().find_map(|p| p.auto_blocked);
            let latest_tds = partials.iter().rev().find_map(|p| p.tds);
            let latest_liters = partials.iter().rev().find_map(|p| p.liters);
            let latest_error = partials.iter().rev().find_map(|p| p.error.clone());

            prop_assert_eq!(&held.state, &latest_state);
            prop_assert_eq!(held.mode, latest_mode);
            prop_assert_eq!(held.auto_blocked, latest_blocked);
            prop_assert_eq!(held.tds, latest_tds);
            prop_assert_eq!(held.liters, latest_liters);
            prop_assert_eq!(&held.error, &latest_error);

            // Held buttons always agree with the merged inputs
            prop_assert_eq!(reconciler.display().buttons, ButtonEnablement::from_snapshot(held));
        }

        /// Enablement follows the start/stop formulas for every combination.
        #[test]
        fn buttons_follow_formulas(state in state_strategy(), mode in mode_strategy(), blocked: bool) {
            let buttons = ButtonEnablement::derive(Some(&state), Some(mode), blocked);
            let at_rest = matches!(state, DeviceState::Idle | DeviceState::Error);

            prop_assert_eq!(
                buttons.start,
                at_rest && mode != Mode::Off && !(mode == Mode::Auto && blocked)
            );
            prop_assert_eq!(buttons.stop, !at_rest);
            prop_assert_eq!(buttons, ButtonEnablement::derive(Some(&state), Some(mode), blocked));
        }
    }
}
