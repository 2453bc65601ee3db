//! Settings synchronization.
//!
//! The controller persists a flat [`SettingsDocument`] in device units. The
//! console edits a [`SettingsForm`]: one typed control per known key, in
//! display units. [`SettingsForm::collect`] and [`SettingsForm::apply`] convert
//! between the two, applying each key's declared [`UnitTransform`].
//!
//! [`SettingsSync`] owns the form and performs the load/save round trips,
//! reporting outcomes as user notices.
//!
//! # Round Trip
//!
//! For every known key, `apply(doc)` followed by `collect()` yields `doc`
//! again. Seconds produced by the hours transform are rounded to whole
//! seconds, so the identity holds for integral stored values.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use osmose_types::{SettingValue, SettingsDocument};

use crate::error::{Error, Result};
use crate::events::{EventDispatcher, Notice};
use crate::traits::DeviceApi;

/// Key of the controller's network name.
pub const DEVICE_NAME_KEY: &str = "mDNSName";

/// How a setting is edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// On/off flag.
    Checkbox,
    /// Numeric field.
    Number,
    /// Free text.
    Text,
}

/// Conversion between stored and displayed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitTransform {
    /// Stored in seconds, shown in hours.
    SecondsAsHours,
}

impl UnitTransform {
    /// Stored value to display value.
    pub fn to_display(&self, stored: f64) -> f64 {
        match self {
            UnitTransform::SecondsAsHours => stored / 3600.0,
        }
    }

    /// Display value to stored value.
    pub fn to_stored(&self, display: f64) -> f64 {
        match self {
            UnitTransform::SecondsAsHours => (display * 3600.0).round(),
        }
    }

    /// Display unit suffix.
    pub fn unit(&self) -> &'static str {
        match self {
            UnitTransform::SecondsAsHours => "h",
        }
    }
}

/// One known setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingSpec {
    /// Key in the settings document.
    pub key: &'static str,
    /// Control kind.
    pub kind: ControlKind,
    /// Unit transform, if the display unit differs from the stored one.
    pub transform: Option<UnitTransform>,
    /// Human-readable label.
    pub label: &'static str,
}

const fn number(key: &'static str, label: &'static str) -> SettingSpec {
    SettingSpec {
        key,
        kind: ControlKind::Number,
        transform: None,
        label,
    }
}

const fn checkbox(key: &'static str, label: &'static str) -> SettingSpec {
    SettingSpec {
        key,
        kind: ControlKind::Checkbox,
        transform: None,
        label,
    }
}

const fn text(key: &'static str, label: &'static str) -> SettingSpec {
    SettingSpec {
        key,
        kind: ControlKind::Text,
        transform: None,
        label,
    }
}

/// Every setting the console knows, in form order.
pub const SCHEMA: &[SettingSpec] = &[
    number("pulsesPerLiterIn", "Feed flow pulses per liter"),
    number("pulsesPerLiterOut", "Permeate flow pulses per liter"),
    number("tdsLimit", "TDS limit (ppm)"),
    number("prepareTimeSec", "Prepare time (s)"),
    number("maxFlushTimeSec", "Max flush time (s)"),
    checkbox("autoFlushEnabled", "Auto flush"),
    number("autoFlushMinTimeSec", "Auto flush min time (s)"),
    checkbox("postFlushEnabled", "Post flush"),
    number("postFlushTimeSec", "Post flush time (s)"),
    number("maxRuntimeAutoSec", "Max runtime AUTO (s)"),
    number("maxRuntimeManualSec", "Max runtime MANUAL (s)"),
    number("maxProductionAutoLiters", "Max production AUTO (l)"),
    number("maxProductionManualLiters", "Max production MANUAL (l)"),
    checkbox("autoStart", "Auto start"),
    checkbox("serviceFlushEnabled", "Service flush"),
    number("serviceFlushTimeSec", "Service flush time (s)"),
    SettingSpec {
        key: "serviceFlushIntervalSec",
        kind: ControlKind::Number,
        transform: Some(UnitTransform::SecondsAsHours),
        label: "Service flush interval (h)",
    },
    text("mqttHost", "MQTT host"),
    number("mqttPort", "MQTT port"),
    text(DEVICE_NAME_KEY, "Device name"),
    text("APPassWord", "Access point password"),
    text("wifiSSID", "Wi-Fi SSID"),
    text("wifiPassword", "Wi-Fi password"),
];

/// Look up a known setting.
pub fn spec_for(key: &str) -> Option<&'static SettingSpec> {
    SCHEMA.iter().find(|spec| spec.key == key)
}

/// The value held by one form control, in display units.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlValue {
    /// Checkbox state.
    Checkbox(bool),
    /// Number field; `None` while empty.
    Number(Option<f64>),
    /// Text field.
    Text(String),
}

impl ControlValue {
    fn empty(kind: ControlKind) -> Self {
        match kind {
            ControlKind::Checkbox => ControlValue::Checkbox(false),
            ControlKind::Number => ControlValue::Number(None),
            ControlKind::Text => ControlValue::Text(String::new()),
        }
    }
}

impl fmt::Display for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlValue::Checkbox(b) => write!(f, "{}", b),
            ControlValue::Number(Some(n)) => write!(f, "{}", SettingValue::Number(*n)),
            ControlValue::Number(None) => Ok(()),
            ControlValue::Text(s) => f.write_str(s),
        }
    }
}

fn truthy(value: &SettingValue) -> bool {
    match value {
        SettingValue::Bool(b) => *b,
        SettingValue::Number(n) => *n != 0.0,
        SettingValue::Text(s) => !s.is_empty(),
        SettingValue::Null => false,
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Some(true),
        "false" | "0" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// One typed control per known setting.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsForm {
    controls: BTreeMap<&'static str, ControlValue>,
}

impl Default for SettingsForm {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsForm {
    /// A form with every control empty.
    pub fn new() -> Self {
        let controls = SCHEMA
            .iter()
            .map(|spec| (spec.key, ControlValue::empty(spec.kind)))
            .collect();
        Self { controls }
    }

    /// Get a control's value.
    pub fn get(&self, key: &str) -> Option<&ControlValue> {
        self.controls.get(key)
    }

    /// Iterate over controls in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static SettingSpec, &ControlValue)> + '_ {
        SCHEMA
            .iter()
            .filter_map(|spec| self.controls.get(spec.key).map(|value| (spec, value)))
    }

    /// The device name currently in the form.
    pub fn device_name(&self) -> Option<&str> {
        match self.controls.get(DEVICE_NAME_KEY) {
            Some(ControlValue::Text(name)) => Some(name),
            _ => None,
        }
    }

    /// Set a control, checking that the value fits the control kind.
    pub fn set(&mut self, key: &str, value: ControlValue) -> Result<()> {
        let control = self
            .controls
            .get_mut(key)
            .ok_or_else(|| Error::invalid_config(format!("unknown setting '{}'", key)))?;
        if std::mem::discriminant(control) != std::mem::discriminant(&value) {
            return Err(Error::invalid_config(format!(
                "setting '{}' cannot hold {:?}",
                key, value
            )));
        }
        *control = value;
        Ok(())
    }

    /// Set a control from user input in display units.
    ///
    /// Checkboxes accept `true/false`, `on/off`, `yes/no`, `1/0`. An empty
    /// string clears a number field.
    pub fn set_from_str(&mut self, key: &str, raw: &str) -> Result<()> {
        let spec =
            spec_for(key).ok_or_else(|| Error::invalid_config(format!("unknown setting '{}'", key)))?;
        let value = match spec.kind {
            ControlKind::Checkbox => ControlValue::Checkbox(parse_flag(raw).ok_or_else(|| {
                Error::invalid_config(format!("'{}' expects true or false, got '{}'", key, raw))
            })?),
            ControlKind::Number if raw.trim().is_empty() => ControlValue::Number(None),
            ControlKind::Number => {
                let n: f64 = raw.trim().parse().map_err(|_| {
                    Error::invalid_config(format!("'{}' expects a number, got '{}'", key, raw))
                })?;
                ControlValue::Number(Some(n))
            }
            ControlKind::Text => ControlValue::Text(raw.to_string()),
        };
        self.set(key, value)
    }

    /// Read every control into a document in device units.
    ///
    /// Empty number fields are left out.
    pub fn collect(&self) -> SettingsDocument {
        self.iter()
            .filter_map(|(spec, value)| {
                let stored = match value {
                    ControlValue::Checkbox(b) => SettingValue::Bool(*b),
                    ControlValue::Number(None) => return None,
                    ControlValue::Number(Some(n)) => SettingValue::Number(
                        spec.transform.map_or(*n, |t| t.to_stored(*n)),
                    ),
                    ControlValue::Text(s) => SettingValue::Text(s.clone()),
                };
                Some((spec.key.to_string(), stored))
            })
            .collect()
    }

    /// Write a document's values into the matching controls.
    ///
    /// Keys without a control are ignored.
    pub fn apply(&mut self, doc: &SettingsDocument) {
        for (key, value) in doc.iter() {
            let Some(spec) = spec_for(key) else {
                debug!("Ignoring unknown setting '{}'", key);
                continue;
            };
            let Some(control) = self.controls.get_mut(spec.key) else {
                continue;
            };

            match control {
                ControlValue::Checkbox(checked) => *checked = truthy(value),
                ControlValue::Number(field) => {
                    let stored = match value {
                        SettingValue::Number(n) => Some(*n),
                        SettingValue::Null => {
                            *field = None;
                            continue;
                        }
                        SettingValue::Text(s) => s.trim().parse::<f64>().ok(),
                        SettingValue::Bool(_) => None,
                    };
                    match stored {
                        Some(n) => *field = Some(spec.transform.map_or(n, |t| t.to_display(n))),
                        None => warn!("Setting '{}' is not numeric: {:?}", key, value),
                    }
                }
                ControlValue::Text(field) => *field = value.to_string(),
            }
        }
    }
}

/// Result of a successful save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    /// The device name differs from the one last loaded.
    pub restart_required: bool,
}

/// Owns the settings form and round-trips it with the controller.
pub struct SettingsSync {
    api: Arc<dyn DeviceApi>,
    events: EventDispatcher,
    form: RwLock<SettingsForm>,
    baseline_name: RwLock<Option<String>>,
}

impl fmt::Debug for SettingsSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsSync").finish_non_exhaustive()
    }
}

impl SettingsSync {
    /// Create a synchronizer with an empty form.
    pub fn new(api: Arc<dyn DeviceApi>, events: EventDispatcher) -> Self {
        Self {
            api,
            events,
            form: RwLock::new(SettingsForm::new()),
            baseline_name: RwLock::new(None),
        }
    }

    /// A copy of the form.
    pub async fn form(&self) -> SettingsForm {
        self.form.read().await.clone()
    }

    /// Edit the form in place.
    pub async fn edit<R>(&self, f: impl FnOnce(&mut SettingsForm) -> R) -> R {
        f(&mut *self.form.write().await)
    }

    /// The device name recorded by the last load.
    pub async fn baseline_name(&self) -> Option<String> {
        self.baseline_name.read().await.clone()
    }

    /// Read the form into a document in device units.
    pub async fn collect(&self) -> SettingsDocument {
        self.form.read().await.collect()
    }

    /// Write a document into the form.
    pub async fn apply(&self, doc: &SettingsDocument) {
        self.form.write().await.apply(doc);
    }

    /// Fetch the persisted settings into the form.
    ///
    /// Returns `false` when the controller has nothing stored yet; the form
    /// is left as it is. On success the loaded device name becomes the
    /// baseline for detecting renames.
    pub async fn load(&self) -> Result<bool> {
        debug!("Loading settings");
        let doc = match self.api.fetch_settings().await {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Failed to load settings: {}", e);
                self.events
                    .notify(Notice::error(format!("Loading settings failed: {}", e)));
                return Err(e);
            }
        };

        let Some(doc) = doc else {
            info!("No settings stored on the controller yet");
            return Ok(false);
        };

        let mut form = self.form.write().await;
        form.apply(&doc);
        *self.baseline_name.write().await = form.device_name().map(String::from);
        Ok(true)
    }

    /// Submit the form to the controller.
    ///
    /// Announces "Settings saved", plus a restart warning when the device
    /// name differs from the loaded baseline. A failure is announced and
    /// returned; it is not retried.
    pub async fn save(&self) -> Result<SaveOutcome> {
        let doc = self.collect().await;
        debug!("Saving {} settings", doc.len());

        if let Err(e) = self.api.store_settings(&doc).await {
            warn!("Failed to save settings: {}", e);
            self.events
                .notify(Notice::error(format!("Saving settings failed: {}", e)));
            return Err(e);
        }

        self.events.notify(Notice::info("Settings saved"));

        let baseline = self.baseline_name.read().await.clone();
        let restart_required = match baseline {
            Some(baseline) => doc.get_str(DEVICE_NAME_KEY) != Some(baseline.as_str()),
            None => false,
        };
        if restart_required {
            info!("Device name changed, restart required");
            self.events.notify(Notice::warning(
                "Device name changed - restart required",
            ));
        }

        Ok(SaveOutcome { restart_required })
    }

    /// Save, then request a reboot.
    ///
    /// A failed save skips the reboot request.
    pub async fn save_and_reboot(&self) -> Result<SaveOutcome> {
        let outcome = self.save().await?;

        if let Err(e) = self.api.reboot().await {
            warn!("Failed to request reboot: {}", e);
            self.events
                .notify(Notice::error(format!("Reboot request failed: {}", e)));
            return Err(e);
        }
        self.events.notify(Notice::info("Controller is restarting"));
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ConsoleEvent, NoticeLevel};
    use crate::mock::MockDeviceApi;

    fn notices(rx: &mut crate::events::EventReceiver) -> Vec<Notice> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ConsoleEvent::Notice(notice) = event {
                out.push(notice);
            }
        }
        out
    }

    #[test]
    fn test_schema_keys_are_unique() {
        for (i, spec) in SCHEMA.iter().enumerate() {
            assert!(
                SCHEMA[i + 1..].iter().all(|other| other.key != spec.key),
                "duplicate key {}",
                spec.key
            );
        }
        assert_eq!(spec_for(DEVICE_NAME_KEY).unwrap().kind, ControlKind::Text);
    }

    #[test]
    fn test_hours_transform() {
        let mut form = SettingsForm::new();
        let mut doc = SettingsDocument::new();
        doc.insert("serviceFlushIntervalSec", 7200.0);

        form.apply(&doc);
        assert_eq!(
            form.get("serviceFlushIntervalSec"),
            Some(&ControlValue::Number(Some(2.0)))
        );

        form.set_from_str("serviceFlushIntervalSec", "3").unwrap();
        assert_eq!(
            form.collect().get_f64("serviceFlushIntervalSec"),
            Some(10800.0)
        );

        form.set_from_str("serviceFlushIntervalSec", "0.3333").unwrap();
        assert_eq!(
            form.collect().get_f64("serviceFlushIntervalSec"),
            Some(1200.0)
        );
    }

    #[test]
    fn test_unknown_key_leaves_controls_untouched() {
        let mut form = SettingsForm::new();
        form.set_from_str("tdsLimit", "20").unwrap();
        let before = form.clone();

        let mut doc = SettingsDocument::new();
        doc.insert("futureFlag", true);
        form.apply(&doc);

        assert_eq!(form, before);
    }

    #[test]
    fn test_apply_coerces_by_control_kind() {
        let doc: SettingsDocument = serde_json::from_str(
            r#"{"autoStart": 1, "tdsLimit": "17.5", "mqttPort": 1883, "mqttHost": null,
                "pulsesPerLiterIn": "fast"}"#,
        )
        .unwrap();
        let mut form = SettingsForm::new();
        form.set_from_str("pulsesPerLiterIn", "1075").unwrap();

        form.apply(&doc);

        assert_eq!(form.get("autoStart"), Some(&ControlValue::Checkbox(true)));
        assert_eq!(form.get("tdsLimit"), Some(&ControlValue::Number(Some(17.5))));
        assert_eq!(form.get("mqttHost"), Some(&ControlValue::Text(String::new())));
        // Unparsable text leaves the previous number
        assert_eq!(
            form.get("pulsesPerLiterIn"),
            Some(&ControlValue::Number(Some(1075.0)))
        );
    }

    #[test]
    fn test_collect_skips_empty_numbers() {
        let mut form = SettingsForm::new();
        form.set_from_str("mqttPort", "1883").unwrap();

        let doc = form.collect();
        assert_eq!(doc.get_f64("mqttPort"), Some(1883.0));
        assert_eq!(doc.get("tdsLimit"), None);
        assert_eq!(doc.get_bool("autoStart"), Some(false));
        assert_eq!(doc.get_str("mqttHost"), Some(""));
    }

    #[test]
    fn test_set_from_str_rejects_bad_input() {
        let mut form = SettingsForm::new();
        assert!(form.set_from_str("nope", "1").is_err());
        assert!(form.set_from_str("autoStart", "maybe").is_err());
        assert!(form.set_from_str("tdsLimit", "abc").is_err());
        assert!(form.set_from_str("autoStart", "on").is_ok());
        assert!(
            form.set("autoStart", ControlValue::Text("x".into()))
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_load_missing_document_is_not_an_error() {
        let api = Arc::new(MockDeviceApi::new());
        let sync = SettingsSync::new(api, EventDispatcher::default());

        assert!(!sync.load().await.unwrap());
        assert_eq!(sync.baseline_name().await, None);
        assert_eq!(sync.form().await, SettingsForm::new());
    }

    #[tokio::test]
    async fn test_save_reports_rename() {
        let api = Arc::new(MockDeviceApi::builder().device_name("osmose").build());
        let events = EventDispatcher::default();
        let mut rx = events.subscribe();
        let sync = SettingsSync::new(api.clone(), events);

        assert!(sync.load().await.unwrap());
        assert_eq!(sync.baseline_name().await.as_deref(), Some("osmose"));

        let outcome = sync.save().await.unwrap();
        assert!(!outcome.restart_required);

        sync.edit(|form| form.set_from_str(DEVICE_NAME_KEY, "kitchen"))
            .await
            .unwrap();
        let outcome = sync.save().await.unwrap();
        assert!(outcome.restart_required);

        let stored = api.stored_settings().await.unwrap();
        assert_eq!(stored.get_str(DEVICE_NAME_KEY), Some("kitchen"));

        let notices = notices(&mut rx);
        assert_eq!(notices.len(), 3);
        assert_eq!(notices[0], Notice::info("Settings saved"));
        assert_eq!(notices[2].level, NoticeLevel::Warning);
    }

    #[tokio::test]
    async fn test_save_failure_is_reported() {
        let api = Arc::new(MockDeviceApi::new());
        api.set_should_fail(true, Some("timeout")).await;
        let events = EventDispatcher::default();
        let mut rx = events.subscribe();
        let sync = SettingsSync::new(api.clone(), events);

        assert!(sync.save().await.is_err());

        let notices = notices(&mut rx);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert!(notices[0].message.contains("timeout"));
        assert_eq!(api.call_count("store_settings").await, 1);
    }

    #[tokio::test]
    async fn test_save_and_reboot_order() {
        let api = Arc::new(MockDeviceApi::new());
        let sync = SettingsSync::new(api.clone(), EventDispatcher::default());

        sync.save_and_reboot().await.unwrap();

        assert_eq!(api.calls().await, vec!["store_settings", "reboot"]);
        assert_eq!(api.reboots(), 1);
    }

    #[tokio::test]
    async fn test_failed_save_skips_reboot() {
        let api = Arc::new(MockDeviceApi::new());
        api.set_transient_failures(1);
        let sync = SettingsSync::new(api.clone(), EventDispatcher::default());

        assert!(sync.save_and_reboot().await.is_err());
        assert_eq!(api.reboots(), 0);
        assert_eq!(api.calls().await, vec!["store_settings"]);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn value_for(spec: &SettingSpec) -> BoxedStrategy<SettingValue> {
        match (spec.kind, spec.transform) {
            (ControlKind::Checkbox, _) => any::<bool>().prop_map(SettingValue::Bool).boxed(),
            (ControlKind::Number, Some(_)) => (0u32..10_000_000)
                .prop_map(|s| SettingValue::Number(s as f64))
                .boxed(),
            (ControlKind::Number, None) => prop_oneof![
                (0u32..100_000).prop_map(|n| SettingValue::Number(n as f64)),
                (-1.0e6f64..1.0e6).prop_map(SettingValue::Number),
            ]
            .boxed(),
            (ControlKind::Text, _) => "[a-zA-Z0-9 ._-]{0,16}".prop_map(SettingValue::Text).boxed(),
        }
    }

    fn document_strategy() -> impl Strategy<Value = SettingsDocument> {
        let fields: Vec<_> = SCHEMA
            .iter()
            .map(|spec| value_for(spec).prop_map(move |v| (spec.key.to_string(), v)))
            .collect();
        fields.prop_map(|pairs| pairs.into_iter().collect())
    }

    proptest! {
        /// apply then collect reproduces every known key.
        #[test]
        fn apply_then_collect_is_identity(doc in document_strategy()) {
            let mut form = SettingsForm::new();
            form.apply(&doc);
            prop_assert_eq!(form.collect(), doc);
        }

        /// Serialized documents survive the JSON round trip to the controller.
        #[test]
        fn collected_document_survives_json(doc in document_strategy()) {
            let mut form = SettingsForm::new();
            form.apply(&doc);
            let json = serde_json::to_string(&form.collect()).unwrap();
            let back: SettingsDocument = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(back, doc);
        }
    }
}
