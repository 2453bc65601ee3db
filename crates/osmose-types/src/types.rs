//! Core types for osmose controller data.

use core::fmt;
use std::collections::BTreeMap;
use std::str::FromStr;

use serde::de::{self, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ParseError, ParseResult};

/// Width of one aggregation bucket in a history series, in seconds.
pub const HISTORY_BUCKET_SECS: u32 = 30;

/// Momentary run state of the controller.
///
/// The controller names its states itself. Names this crate does not know
/// are kept verbatim in [`DeviceState::Other`] so they can still be shown.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceState {
    /// Waiting for a start request or an automatic trigger.
    Idle,
    /// Valves opening before a flush.
    Prepare,
    /// Membrane flush in progress.
    Flush,
    /// Producing permeate.
    Production,
    /// Generic running state used by some firmware revisions.
    Running,
    /// Generic flushing state used by some firmware revisions.
    Flushing,
    /// Informational hold (e.g. tank full).
    Info,
    /// Stopped on a fault.
    Error,
    /// A state name this crate does not know.
    Other(String),
}

impl DeviceState {
    /// The name the controller uses on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            DeviceState::Idle => "IDLE",
            DeviceState::Prepare => "PREPARE",
            DeviceState::Flush => "FLUSH",
            DeviceState::Production => "PRODUCTION",
            DeviceState::Running => "RUNNING",
            DeviceState::Flushing => "FLUSHING",
            DeviceState::Info => "INFO",
            DeviceState::Error => "ERROR",
            DeviceState::Other(name) => name,
        }
    }

    /// Whether the controller is at rest (`IDLE` or `ERROR`).
    ///
    /// A start command is only meaningful at rest and a stop command only
    /// away from it.
    #[must_use]
    pub fn is_at_rest(&self) -> bool {
        matches!(self, DeviceState::Idle | DeviceState::Error)
    }
}

impl From<&str> for DeviceState {
    fn from(name: &str) -> Self {
        match name {
            "IDLE" => DeviceState::Idle,
            "PREPARE" => DeviceState::Prepare,
            "FLUSH" => DeviceState::Flush,
            "PRODUCTION" => DeviceState::Production,
            "RUNNING" => DeviceState::Running,
            "FLUSHING" => DeviceState::Flushing,
            "INFO" => DeviceState::Info,
            "ERROR" => DeviceState::Error,
            other => DeviceState::Other(other.to_string()),
        }
    }
}

impl From<String> for DeviceState {
    fn from(name: String) -> Self {
        match DeviceState::from(name.as_str()) {
            DeviceState::Other(_) => DeviceState::Other(name),
            known => known,
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DeviceState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DeviceState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(DeviceState::from)
    }
}

/// Operating policy selected on the controller's mode switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    /// Switched off; nothing may start.
    Off,
    /// Runs only on explicit request.
    Manual,
    /// Starts on its own when the tank calls for water.
    Auto,
}

impl Mode {
    /// All modes in switch order.
    pub const ALL: [Mode; 3] = [Mode::Off, Mode::Manual, Mode::Auto];

    /// The name the controller uses on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Off => "OFF",
            Mode::Manual => "MANUAL",
            Mode::Auto => "AUTO",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OFF" => Ok(Mode::Off),
            "MANUAL" => Ok(Mode::Manual),
            "AUTO" => Ok(Mode::Auto),
            _ => Err(ParseError::InvalidValue(format!("unknown mode '{}'", s))),
        }
    }
}

/// A sparse telemetry report pushed by the controller.
///
/// Every field is optional: an absent field means "unchanged", never
/// "unknown". Use [`DeviceSnapshot::merge`] to fold a partial report into
/// the last known values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceSnapshot {
    /// Run state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<DeviceState>,
    /// Mode switch position.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    /// Device-reported fault text. An empty string clears a previous fault.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Automatic start suppressed by a protection limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_blocked: Option<bool>,
    /// Permeate conductivity in ppm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tds: Option<f64>,
    /// Liters produced in the current run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liters: Option<f64>,
    /// Permeate flow in liters per minute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<f64>,
    /// Feed flow in liters per minute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_in: Option<f64>,
    /// Liters left before the production limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<f64>,
    /// Seconds left before the runtime limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_left: Option<f64>,
    /// Free-text status line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Firmware version string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub esp_version: Option<String>,
    /// Set when the controller announces that its run table changed.
    ///
    /// This is an event marker, not a field: it is never merged.
    #[serde(
        rename = "histUpdate",
        deserialize_with = "deserialize_present",
        serialize_with = "serialize_present",
        skip_serializing_if = "is_false"
    )]
    pub hist_update: bool,
}

fn deserialize_present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    IgnoredAny::deserialize(deserializer)?;
    Ok(true)
}

fn serialize_present<S: Serializer>(_: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(1)
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl DeviceSnapshot {
    /// Overwrite every field present in `partial`, leaving the others as they are.
    pub fn merge(&mut self, partial: &DeviceSnapshot) {
        fn keep_latest<T: Clone>(held: &mut Option<T>, incoming: &Option<T>) {
            if let Some(value) = incoming {
                *held = Some(value.clone());
            }
        }

        keep_latest(&mut self.state, &partial.state);
        keep_latest(&mut self.mode, &partial.mode);
        keep_latest(&mut self.error, &partial.error);
        keep_latest(&mut self.auto_blocked, &partial.auto_blocked);
        keep_latest(&mut self.tds, &partial.tds);
        keep_latest(&mut self.liters, &partial.liters);
        keep_latest(&mut self.flow, &partial.flow);
        keep_latest(&mut self.flow_in, &partial.flow_in);
        keep_latest(&mut self.left, &partial.left);
        keep_latest(&mut self.time_left, &partial.time_left);
        keep_latest(&mut self.status, &partial.status);
        keep_latest(&mut self.esp_version, &partial.esp_version);
    }

    /// Whether this report carries any field that feeds the start/stop decision.
    #[must_use]
    pub fn touches_controls(&self) -> bool {
        self.state.is_some() || self.mode.is_some() || self.auto_blocked.is_some()
    }

    /// Whether this report carries any field shown in the status line.
    #[must_use]
    pub fn touches_status(&self) -> bool {
        self.state.is_some() || self.mode.is_some() || self.error.is_some()
    }

    /// The device-reported fault, treating an empty string as no fault.
    #[must_use]
    pub fn active_error(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.trim().is_empty())
    }
}

const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A single persisted setting value.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    /// Checkbox-like flag.
    Bool(bool),
    /// Numeric value. Integral values serialize as JSON integers.
    Number(f64),
    /// Verbatim text.
    Text(String),
    /// `null`, or a structured value no control can hold.
    Null,
}

impl SettingValue {
    /// Get the flag, if this is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the number, if this is numeric.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the text, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

fn is_integral(n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(b) => write!(f, "{}", b),
            SettingValue::Number(n) if is_integral(*n) => write!(f, "{}", *n as i64),
            SettingValue::Number(n) => write!(f, "{}", n),
            SettingValue::Text(s) => f.write_str(s),
            SettingValue::Null => Ok(()),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Bool(value)
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        SettingValue::Number(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::Text(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        SettingValue::Text(value)
    }
}

impl Serialize for SettingValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SettingValue::Bool(b) => serializer.serialize_bool(*b),
            SettingValue::Number(n) if is_integral(*n) => serializer.serialize_i64(*n as i64),
            SettingValue::Number(n) => serializer.serialize_f64(*n),
            SettingValue::Text(s) => serializer.serialize_str(s),
            SettingValue::Null => serializer.serialize_unit(),
        }
    }
}

struct SettingValueVisitor;

impl<'de> Visitor<'de> for SettingValueVisitor {
    type Value = SettingValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a boolean, number, string or null")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<SettingValue, E> {
        Ok(SettingValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<SettingValue, E> {
        Ok(SettingValue::Number(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<SettingValue, E> {
        Ok(SettingValue::Number(v as f64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<SettingValue, E> {
        Ok(SettingValue::Number(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<SettingValue, E> {
        Ok(SettingValue::Text(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<SettingValue, E> {
        Ok(SettingValue::Text(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<SettingValue, E> {
        Ok(SettingValue::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<SettingValue, E> {
        Ok(SettingValue::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<SettingValue, D::Error> {
        deserializer.deserialize_any(self)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<SettingValue, A::Error> {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(SettingValue::Null)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<SettingValue, A::Error> {
        while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
        Ok(SettingValue::Null)
    }
}

impl<'de> Deserialize<'de> for SettingValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(SettingValueVisitor)
    }
}

/// The controller's persisted configuration, keyed by setting name.
///
/// Stored values are in device units (e.g. seconds), never display units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsDocument(BTreeMap<String, SettingValue>);

impl SettingsDocument {
    /// Create an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.0.get(key)
    }

    /// Get a text value by key.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(SettingValue::as_str)
    }

    /// Get a numeric value by key.
    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(SettingValue::as_f64)
    }

    /// Get a boolean value by key.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(SettingValue::as_bool)
    }

    /// Insert or replace a value, returning the previous one.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<SettingValue>,
    ) -> Option<SettingValue> {
        self.0.insert(key.into(), value.into())
    }

    /// Remove a value.
    pub fn remove(&mut self, key: &str) -> Option<SettingValue> {
        self.0.remove(key)
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the document has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over keys and values in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, SettingValue)> for SettingsDocument {
    fn from_iter<I: IntoIterator<Item = (String, SettingValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Time window for an aggregated history series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryRange {
    /// Last 10 minutes.
    TenMinutes,
    /// Last hour.
    #[default]
    OneHour,
    /// Last 6 hours.
    SixHours,
    /// Last 24 hours (everything the controller keeps).
    Day,
}

impl HistoryRange {
    /// All ranges from shortest to longest.
    pub const ALL: [HistoryRange; 4] = [
        HistoryRange::TenMinutes,
        HistoryRange::OneHour,
        HistoryRange::SixHours,
        HistoryRange::Day,
    ];

    /// Window length in seconds, as sent in the `range` query parameter.
    #[must_use]
    pub fn as_secs(&self) -> u32 {
        match self {
            HistoryRange::TenMinutes => 600,
            HistoryRange::OneHour => 3_600,
            HistoryRange::SixHours => 21_600,
            HistoryRange::Day => 86_400,
        }
    }

    /// Number of buckets the controller returns for this window.
    #[must_use]
    pub fn expected_samples(&self) -> usize {
        (self.as_secs() / HISTORY_BUCKET_SECS) as usize
    }

    /// Short label, also accepted by [`FromStr`].
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            HistoryRange::TenMinutes => "10m",
            HistoryRange::OneHour => "1h",
            HistoryRange::SixHours => "6h",
            HistoryRange::Day => "24h",
        }
    }

    /// Find the range with exactly this many seconds.
    #[must_use]
    pub fn from_secs(secs: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_secs() == secs)
    }
}

impl fmt::Display for HistoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for HistoryRange {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        let trimmed = s.trim().to_ascii_lowercase();
        match trimmed.as_str() {
            "10m" | "10min" => return Ok(HistoryRange::TenMinutes),
            "1h" | "60m" => return Ok(HistoryRange::OneHour),
            "6h" => return Ok(HistoryRange::SixHours),
            "24h" | "1d" => return Ok(HistoryRange::Day),
            _ => {}
        }
        trimmed
            .parse::<u32>()
            .ok()
            .and_then(HistoryRange::from_secs)
            .ok_or_else(|| {
                ParseError::InvalidValue(format!(
                    "unknown history range '{}' (use 10m, 1h, 6h or 24h)",
                    s
                ))
            })
    }
}

/// Aggregated history: one sample per bucket for each of three datasets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySeries {
    /// Permeate TDS in ppm.
    pub tds: Vec<f64>,
    /// Permeate flow in liters per minute.
    pub flow: Vec<f64>,
    /// Cumulative production in liters.
    pub prod: Vec<f64>,
}

/// The values of one bucket across all datasets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// TDS in ppm.
    pub tds: f64,
    /// Flow in liters per minute.
    pub flow: f64,
    /// Production in liters.
    pub prod: f64,
}

impl HistorySeries {
    /// Check that the three datasets have the same length.
    pub fn validate(&self) -> ParseResult<()> {
        if self.tds.len() == self.flow.len() && self.tds.len() == self.prod.len() {
            Ok(())
        } else {
            Err(ParseError::SeriesLengthMismatch {
                tds: self.tds.len(),
                flow: self.flow.len(),
                prod: self.prod.len(),
            })
        }
    }

    /// Number of buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tds.len()
    }

    /// Whether the series has no buckets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tds.is_empty()
    }

    /// The newest bucket, if every dataset has one.
    #[must_use]
    pub fn last_sample(&self) -> Option<Sample> {
        Some(Sample {
            tds: *self.tds.last()?,
            flow: *self.flow.last()?,
            prod: *self.prod.last()?,
        })
    }
}

/// One production or flush run as recorded by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Mode the run was started in.
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_mode",
        skip_serializing_if = "Option::is_none"
    )]
    pub mode: Option<Mode>,
    /// Start time (Unix seconds).
    pub start: i64,
    /// End time (Unix seconds); `None` while the run is still open.
    #[serde(
        default,
        deserialize_with = "deserialize_nonzero",
        skip_serializing_if = "Option::is_none"
    )]
    pub end: Option<i64>,
    /// Run length in seconds, if the controller reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// Liters produced.
    #[serde(default)]
    pub liters: f64,
    /// Why the run stopped.
    #[serde(default)]
    pub reason: String,
}

fn deserialize_lenient_mode<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Mode>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.parse().ok()))
}

// The controller writes 0 for a run that has not ended yet.
fn deserialize_nonzero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let raw = Option::<i64>::deserialize(deserializer)?;
    Ok(raw.filter(|&ts| ts != 0))
}

impl HistoryRecord {
    /// Whether the run is still in progress.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Run length in seconds: the reported duration, else `end - start`.
    #[must_use]
    pub fn duration_secs(&self) -> Option<u64> {
        self.duration
            .or_else(|| self.end.map(|end| (end - self.start).max(0) as u64))
    }
}

/// A Wi-Fi network found by the controller's scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEntry {
    /// Network name.
    pub ssid: String,
    /// Signal strength in dBm.
    pub rssi: i32,
}
