//! Trait abstraction over the controller's REST endpoints.
//!
//! This module provides the [`DeviceApi`] trait that abstracts over the
//! real HTTP client and the in-memory mock used in tests.

use async_trait::async_trait;

use osmose_types::{HistoryRange, HistoryRecord, HistorySeries, NetworkEntry, SettingsDocument};

use crate::error::Result;

/// The one-shot requests a controller answers.
///
/// The live channel is not part of this trait; see
/// [`Connection`](crate::Connection).
///
/// # Example
///
/// ```ignore
/// use osmose_core::{DeviceApi, Result};
/// use osmose_types::HistoryRange;
///
/// async fn sample_count<D: DeviceApi>(device: &D) -> Result<usize> {
///     let series = device.fetch_series(HistoryRange::OneHour).await?;
///     Ok(series.len())
/// }
/// ```
#[async_trait]
pub trait DeviceApi: Send + Sync {
    // --- Settings ---

    /// Fetch the persisted settings.
    ///
    /// Returns `Ok(None)` when the controller has nothing stored yet.
    async fn fetch_settings(&self) -> Result<Option<SettingsDocument>>;

    /// Persist a settings document.
    async fn store_settings(&self, doc: &SettingsDocument) -> Result<()>;

    // --- History ---

    /// Fetch the aggregated series for a time window.
    async fn fetch_series(&self, range: HistoryRange) -> Result<HistorySeries>;

    /// Fetch the run table, newest first as the controller orders it.
    async fn fetch_table(&self) -> Result<Vec<HistoryRecord>>;

    /// Erase the production history on the controller.
    async fn clear_history(&self) -> Result<()>;

    // --- Network ---

    /// Poll the Wi-Fi scan once.
    ///
    /// Returns `Ok(None)` while the scan is still running.
    async fn poll_scan(&self) -> Result<Option<Vec<NetworkEntry>>>;

    // --- Device ---

    /// Ask the controller to restart.
    async fn reboot(&self) -> Result<()>;
}
