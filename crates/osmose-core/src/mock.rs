//! Mock controller implementation for testing.
//!
//! This module provides an in-memory [`DeviceApi`] that can be used for unit
//! testing the settings synchronizer and the history pipeline without a
//! controller on the network.
//!
//! # Features
//!
//! - **Failure injection**: Fail every request, or only the next few
//! - **Latency simulation**: Delay all requests, or series requests per range
//! - **Request log**: Record the order in which endpoints were called
//! - **Slow scans**: Report "not ready" for a number of polls

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use osmose_types::{HistoryRange, HistoryRecord, HistorySeries, NetworkEntry, SettingsDocument};

use crate::error::{Error, Result};
use crate::traits::DeviceApi;

/// An in-memory controller for testing.
///
/// # Example
///
/// ```
/// use osmose_core::{DeviceApi, MockDeviceApi};
///
/// #[tokio::main]
/// async fn main() {
///     let device = MockDeviceApi::builder().device_name("osmose-test").build();
///     let doc = device.fetch_settings().await.unwrap().unwrap();
///     assert_eq!(doc.get_str("mDNSName"), Some("osmose-test"));
/// }
/// ```
pub struct MockDeviceApi {
    settings: RwLock<Option<SettingsDocument>>,
    series: RwLock<HashMap<HistoryRange, HistorySeries>>,
    table: RwLock<Vec<HistoryRecord>>,
    networks: RwLock<Vec<NetworkEntry>>,
    calls: RwLock<Vec<String>>,
    should_fail: AtomicBool,
    fail_message: RwLock<String>,
    remaining_failures: AtomicU32,
    /// Simulated latency for every request in milliseconds (0 = no delay).
    latency_ms: AtomicU64,
    series_latency: RwLock<HashMap<HistoryRange, Duration>>,
    /// Polls answered with "not ready" before the networks are returned.
    scan_pending_polls: AtomicU32,
    scan_polls: AtomicU32,
    reboots: AtomicU32,
}

impl std::fmt::Debug for MockDeviceApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDeviceApi")
            .field("should_fail", &self.should_fail.load(Ordering::Relaxed))
            .field("reboots", &self.reboots.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MockDeviceApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDeviceApi {
    /// Create an empty mock: no settings stored, no history, no networks.
    pub fn new() -> Self {
        Self {
            settings: RwLock::new(None),
            series: RwLock::new(HashMap::new()),
            table: RwLock::new(Vec::new()),
            networks: RwLock::new(Vec::new()),
            calls: RwLock::new(Vec::new()),
            should_fail: AtomicBool::new(false),
            fail_message: RwLock::new("Mock failure".to_string()),
            remaining_failures: AtomicU32::new(0),
            latency_ms: AtomicU64::new(0),
            series_latency: RwLock::new(HashMap::new()),
            scan_pending_polls: AtomicU32::new(0),
            scan_polls: AtomicU32::new(0),
            reboots: AtomicU32::new(0),
        }
    }

    /// Start building a mock.
    pub fn builder() -> MockDeviceApiBuilder {
        MockDeviceApiBuilder::new()
    }

    /// A flat series of `len` buckets.
    pub fn flat_series(len: usize, tds: f64, flow: f64, prod: f64) -> HistorySeries {
        HistorySeries {
            tds: vec![tds; len],
            flow: vec![flow; len],
            prod: vec![prod; len],
        }
    }

    /// Replace the stored settings.
    pub async fn set_settings(&self, doc: Option<SettingsDocument>) {
        *self.settings.write().await = doc;
    }

    /// The settings as last stored.
    pub async fn stored_settings(&self) -> Option<SettingsDocument> {
        self.settings.read().await.clone()
    }

    /// Set the series returned for a range.
    pub async fn set_series(&self, range: HistoryRange, series: HistorySeries) {
        self.series.write().await.insert(range, series);
    }

    /// Replace the run table.
    pub async fn set_table(&self, records: Vec<HistoryRecord>) {
        *self.table.write().await = records;
    }

    /// Replace the scan result.
    pub async fn set_networks(&self, networks: Vec<NetworkEntry>) {
        *self.networks.write().await = networks;
    }

    /// Make every request fail (or succeed again).
    pub async fn set_should_fail(&self, fail: bool, message: Option<&str>) {
        self.should_fail.store(fail, Ordering::Relaxed);
        if let Some(msg) = message {
            *self.fail_message.write().await = msg.to_string();
        }
    }

    /// Fail the next `count` requests, then succeed.
    pub fn set_transient_failures(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::Relaxed);
    }

    /// Delay every request by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Delay series requests for one range.
    pub async fn set_series_latency(&self, range: HistoryRange, latency: Duration) {
        self.series_latency.write().await.insert(range, latency);
    }

    /// Answer the next `polls` scan polls with "not ready".
    pub fn set_scan_pending_polls(&self, polls: u32) {
        self.scan_pending_polls.store(polls, Ordering::Relaxed);
    }

    /// Endpoint calls in the order they were made.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }

    /// Number of calls whose name starts with `prefix`.
    pub async fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Forget the recorded calls.
    pub async fn reset_calls(&self) {
        self.calls.write().await.clear();
    }

    /// Number of scan polls answered.
    pub fn scan_polls(&self) -> u32 {
        self.scan_polls.load(Ordering::Relaxed)
    }

    /// Number of reboot requests received.
    pub fn reboots(&self) -> u32 {
        self.reboots.load(Ordering::Relaxed)
    }

    async fn enter(&self, call: String) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        self.calls.write().await.push(call);

        if self.remaining_failures.load(Ordering::Relaxed) > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(self.failure().await);
        }
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(self.failure().await);
        }
        Ok(())
    }

    async fn failure(&self) -> Error {
        Error::Api {
            status: 500,
            message: self.fail_message.read().await.clone(),
        }
    }
}

#[async_trait]
impl DeviceApi for MockDeviceApi {
    async fn fetch_settings(&self) -> Result<Option<SettingsDocument>> {
        self.enter("fetch_settings".into()).await?;
        Ok(self.settings.read().await.clone())
    }

    async fn store_settings(&self, doc: &SettingsDocument) -> Result<()> {
        self.enter("store_settings".into()).await?;
        *self.settings.write().await = Some(doc.clone());
        Ok(())
    }

    async fn fetch_series(&self, range: HistoryRange) -> Result<HistorySeries> {
        let latency = self.series_latency.read().await.get(&range).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.enter(format!("fetch_series:{}", range)).await?;
        Ok(self
            .series
            .read()
            .await
            .get(&range)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_table(&self) -> Result<Vec<HistoryRecord>> {
        self.enter("fetch_table".into()).await?;
        Ok(self.table.read().await.clone())
    }

    async fn clear_history(&self) -> Result<()> {
        self.enter("clear_history".into()).await?;
        self.table.write().await.clear();
        self.series.write().await.clear();
        Ok(())
    }

    async fn poll_scan(&self) -> Result<Option<Vec<NetworkEntry>>> {
        self.enter("poll_scan".into()).await?;
        self.scan_polls.fetch_add(1, Ordering::Relaxed);

        let pending = self.scan_pending_polls.load(Ordering::Relaxed);
        if pending > 0 {
            self.scan_pending_polls.store(pending - 1, Ordering::Relaxed);
            return Ok(None);
        }

        let networks = self.networks.read().await.clone();
        Ok(Some(networks).filter(|n| !n.is_empty()))
    }

    async fn reboot(&self) -> Result<()> {
        self.enter("reboot".into()).await?;
        self.reboots.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Builder for [`MockDeviceApi`].
#[derive(Debug, Default)]
pub struct MockDeviceApiBuilder {
    settings: Option<SettingsDocument>,
    series: HashMap<HistoryRange, HistorySeries>,
    table: Vec<HistoryRecord>,
    networks: Vec<NetworkEntry>,
    scan_pending_polls: u32,
}

impl MockDeviceApiBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a settings document.
    #[must_use]
    pub fn settings(mut self, doc: SettingsDocument) -> Self {
        self.settings = Some(doc);
        self
    }

    /// Store a device name, creating the settings document if needed.
    #[must_use]
    pub fn device_name(mut self, name: &str) -> Self {
        self.settings
            .get_or_insert_with(SettingsDocument::new)
            .insert("mDNSName", name);
        self
    }

    /// Set the series for a range.
    #[must_use]
    pub fn series(mut self, range: HistoryRange, series: HistorySeries) -> Self {
        self.series.insert(range, series);
        self
    }

    /// Set the run table.
    #[must_use]
    pub fn table(mut self, records: Vec<HistoryRecord>) -> Self {
        self.table = records;
        self
    }

    /// Set the networks a scan eventually returns.
    #[must_use]
    pub fn networks(mut self, networks: Vec<NetworkEntry>) -> Self {
        self.networks = networks;
        self
    }

    /// Answer the first `polls` scan polls with "not ready".
    #[must_use]
    pub fn scan_pending_polls(mut self, polls: u32) -> Self {
        self.scan_pending_polls = polls;
        self
    }

    /// Build the mock.
    #[must_use]
    pub fn build(self) -> MockDeviceApi {
        let mock = MockDeviceApi::new();
        MockDeviceApi {
            settings: RwLock::new(self.settings),
            series: RwLock::new(self.series),
            table: RwLock::new(self.table),
            networks: RwLock::new(self.networks),
            scan_pending_polls: AtomicU32::new(self.scan_pending_polls),
            ..mock
        }
    }
}
