//! History pipeline.
//!
//! Fetches the aggregated series and the run table from the controller and
//! hands them to a [`ChartSink`] and a row list. Refreshes come from four
//! places:
//!
//! - the background timer (skipped while the history view is hidden)
//! - entering the history view (forced)
//! - changing the range (forced)
//! - a run state transition seen by the reconciler (only while visible)
//!
//! A successful series load always chains into a table load so both views
//! describe the same moment.
//!
//! Series requests are numbered. A response that arrives after a newer one
//! has been applied is discarded instead of overwriting it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use osmose_types::{HistoryRange, HistoryRecord, HistorySeries};

use crate::error::Result;
use crate::events::{ConsoleEvent, EventDispatcher, Notice};
use crate::traits::DeviceApi;
use crate::util::format_mmss;

/// Receives complete series replacements.
///
/// Implementations must replace, never append: after `replace` the sink
/// holds exactly the given datasets.
pub trait ChartSink: Send + Sync {
    /// Replace all three datasets.
    fn replace(&self, range: HistoryRange, series: &HistorySeries);
}

/// A [`ChartSink`] that keeps the latest series in memory.
#[derive(Debug, Default)]
pub struct SeriesBuffer {
    inner: RwLock<Option<(HistoryRange, HistorySeries)>>,
}

impl SeriesBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// The range of the series held, if any.
    pub fn range(&self) -> Option<HistoryRange> {
        self.read().as_ref().map(|(range, _)| *range)
    }

    /// A copy of the series held.
    pub fn series(&self) -> HistorySeries {
        self.read()
            .as_ref()
            .map(|(_, series)| series.clone())
            .unwrap_or_default()
    }

    /// Number of buckets held.
    pub fn len(&self) -> usize {
        self.read().as_ref().map_or(0, |(_, series)| series.len())
    }

    /// Whether nothing is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<(HistoryRange, HistorySeries)>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChartSink for SeriesBuffer {
    fn replace(&self, range: HistoryRange, series: &HistorySeries) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some((range, series.clone()));
    }
}

/// "TDS: x | Flow: y | Liter: z" for the newest bucket.
///
/// Returns `None` for an empty series.
pub fn summarize(series: &HistorySeries) -> Option<String> {
    let last = series.last_sample()?;
    Some(format!(
        "TDS: {:.1}  |  Flow: {:.2}  |  Liter: {:.2}",
        last.tds, last.flow, last.prod
    ))
}

/// One run record formatted for a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRow {
    pub mode: String,
    pub start: String,
    pub end: String,
    pub duration: String,
    pub liters: String,
    pub reason: String,
}

impl HistoryRow {
    /// Format a record in the local time zone.
    ///
    /// The offset is looked up for each timestamp, so a run that spans a
    /// daylight saving change shows both ends in their own local time.
    pub fn from_record(record: &HistoryRecord) -> Self {
        Self::with_offset_at(record, local_offset_at)
    }

    /// Format a record, resolving the UTC offset of each timestamp with
    /// `offset_at`.
    pub fn with_offset_at(
        record: &HistoryRecord,
        offset_at: impl Fn(OffsetDateTime) -> UtcOffset,
    ) -> Self {
        Self {
            mode: record
                .mode
                .map(|m| m.to_string())
                .unwrap_or_else(|| "-".to_string()),
            start: format_timestamp_at(record.start, &offset_at),
            end: record
                .end
                .map(|end| format_timestamp_at(end, &offset_at))
                .unwrap_or_else(|| "running".to_string()),
            duration: record
                .duration_secs()
                .map(format_mmss)
                .unwrap_or_else(|| "-".to_string()),
            liters: format!("{:.2}", record.liters),
            reason: record.reason.clone(),
        }
    }
}

// Falls back to UTC where the platform cannot determine the offset.
fn local_offset_at(dt: OffsetDateTime) -> UtcOffset {
    UtcOffset::local_offset_at(dt).unwrap_or(UtcOffset::UTC)
}

/// Format Unix seconds as local `YYYY-MM-DD hh:mm:ss`.
pub fn format_timestamp(secs: i64) -> String {
    format_timestamp_at(secs, &local_offset_at)
}

fn format_timestamp_at(secs: i64, offset_at: &impl Fn(OffsetDateTime) -> UtcOffset) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    OffsetDateTime::from_unix_timestamp(secs)
        .ok()
        .and_then(|t| t.to_offset(offset_at(t)).format(&format).ok())
        .unwrap_or_else(|| secs.to_string())
}

/// What became of one series request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesOutcome {
    /// The view is hidden and the request was not forced.
    Skipped,
    /// A newer response was already applied; this one was discarded.
    Stale,
    /// The series was applied and the table reloaded.
    Applied {
        /// Buckets in the applied series.
        samples: usize,
    },
}

/// Fetches history and feeds the chart and the table.
pub struct HistoryPipeline {
    api: Arc<dyn DeviceApi>,
    sink: Arc<dyn ChartSink>,
    events: EventDispatcher,
    visible: AtomicBool,
    range: RwLock<HistoryRange>,
    issued: AtomicU64,
    applied: Mutex<u64>,
    last_values: RwLock<Option<String>>,
    table: RwLock<Vec<HistoryRecord>>,
}

impl fmt::Debug for HistoryPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryPipeline")
            .field("visible", &self.is_visible())
            .field("range", &self.range())
            .field("issued", &self.issued.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl HistoryPipeline {
    /// Create a hidden pipeline on the default range.
    pub fn new(api: Arc<dyn DeviceApi>, sink: Arc<dyn ChartSink>, events: EventDispatcher) -> Self {
        Self {
            api,
            sink,
            events,
            visible: AtomicBool::new(false),
            range: RwLock::new(HistoryRange::default()),
            issued: AtomicU64::new(0),
            applied: Mutex::new(0),
            last_values: RwLock::new(None),
            table: RwLock::new(Vec::new()),
        }
    }

    /// Whether the history view is visible.
    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }

    /// Mark the history view visible or hidden.
    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Relaxed);
    }

    /// The selected range.
    pub fn range(&self) -> HistoryRange {
        *self.range.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Select a range. Does not fetch.
    pub fn set_range(&self, range: HistoryRange) {
        *self.range.write().unwrap_or_else(PoisonError::into_inner) = range;
    }

    /// Summary of the newest applied bucket.
    pub fn last_values(&self) -> Option<String> {
        self.last_values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The run table as last loaded.
    pub fn records(&self) -> Vec<HistoryRecord> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The run table formatted for display.
    pub fn rows(&self) -> Vec<HistoryRow> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(HistoryRow::from_record)
            .collect()
    }

    /// Fetch the series for `range` and hand it to the sink.
    ///
    /// Skipped unless the view is visible or `force` is set. On success the
    /// run table is reloaded as well.
    pub async fn load_series(&self, range: HistoryRange, force: bool) -> Result<SeriesOutcome> {
        if !force && !self.is_visible() {
            debug!("History view hidden, skipping series refresh");
            return Ok(SeriesOutcome::Skipped);
        }

        let seq = self.issued.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Fetching {} history series (request {})", range, seq);

        let series = match self.api.fetch_series(range).await {
            Ok(series) => series,
            Err(e) => {
                warn!("Failed to load history series: {}", e);
                self.events
                    .notify(Notice::error(format!("Loading history failed: {}", e)));
                return Err(e);
            }
        };
        series.validate()?;

        let samples = series.len();
        {
            let mut applied = self.applied.lock().await;
            if seq < *applied {
                debug!(
                    "Discarding {} history series: request {} superseded by {}",
                    range, seq, *applied
                );
                return Ok(SeriesOutcome::Stale);
            }
            *applied = seq;

            self.sink.replace(range, &series);
            *self.last_values.write().unwrap_or_else(PoisonError::into_inner) = summarize(&series);
        }
        self.events
            .send(ConsoleEvent::SeriesUpdated { range, samples });

        self.load_table().await?;
        Ok(SeriesOutcome::Applied { samples })
    }

    /// Fetch the run table and replace the held rows.
    pub async fn load_table(&self) -> Result<usize> {
        debug!("Fetching history table");
        let records = match self.api.fetch_table().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to load history table: {}", e);
                self.events
                    .notify(Notice::error(format!("Loading history table failed: {}", e)));
                return Err(e);
            }
        };

        let rows = records.len();
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = records;
        self.events.send(ConsoleEvent::TableUpdated { rows });
        Ok(rows)
    }

    /// Erase the controller's history after the user confirms.
    ///
    /// Returns `false` if `confirm` declined. The table is reloaded after a
    /// successful clear.
    pub async fn clear_history(&self, confirm: impl FnOnce() -> bool) -> Result<bool> {
        if !confirm() {
            debug!("History clear declined");
            return Ok(false);
        }

        if let Err(e) = self.api.clear_history().await {
            warn!("Failed to clear history: {}", e);
            self.events
                .notify(Notice::error(format!("Clearing history failed: {}", e)));
            return Err(e);
        }
        info!("History cleared");
        self.events.notify(Notice::info("History cleared"));

        self.load_table().await?;
        Ok(true)
    }

    /// Re-run [`load_series`](Self::load_series) on the selected range every
    /// `period`, until `cancel_token` fires.
    ///
    /// The first tick is one period from now. Ticks are not forced, so they
    /// do nothing while the view is hidden.
    pub fn spawn_refresh_timer(
        self: &Arc<Self>,
        period: Duration,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("History refresh timer stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let range = pipeline.range();
                        if let Err(e) = pipeline.load_series(range, false).await {
                            debug!("Periodic history refresh failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoticeLevel;
    use crate::mock::MockDeviceApi;
    use osmose_types::Mode;

    fn pipeline(api: Arc<MockDeviceApi>) -> (Arc<HistoryPipeline>, Arc<SeriesBuffer>) {
        let sink = Arc::new(SeriesBuffer::new());
        let pipeline = Arc::new(HistoryPipeline::new(
            api,
            sink.clone(),
            EventDispatcher::default(),
        ));
        (pipeline, sink)
    }

    fn record(start: i64, end: i64, liters: f64) -> HistoryRecord {
        HistoryRecord {
            mode: Some(Mode::Auto),
            start,
            end: Some(end).filter(|&e| e != 0),
            duration: None,
            liters,
            reason: "Tank full".to_string(),
        }
    }

    #[tokio::test]
    async fn test_hidden_view_skips_unforced_loads() {
        let api = Arc::new(MockDeviceApi::new());
        let (pipeline, _) = pipeline(api.clone());

        let outcome = pipeline.load_series(HistoryRange::OneHour, false).await.unwrap();
        assert_eq!(outcome, SeriesOutcome::Skipped);
        assert!(api.calls().await.is_empty());

        let outcome = pipeline.load_series(HistoryRange::OneHour, true).await.unwrap();
        assert_eq!(outcome, SeriesOutcome::Applied { samples: 0 });
    }

    #[tokio::test]
    async fn test_series_load_chains_table() {
        let api = Arc::new(
            MockDeviceApi::builder()
                .series(
                    HistoryRange::OneHour,
                    MockDeviceApi::flat_series(120, 11.04, 0.5, 3.256),
                )
                .table(vec![record(1_700_000_000, 1_700_000_125, 4.0)])
                .build(),
        );
        let (pipeline, sink) = pipeline(api.clone());
        pipeline.set_visible(true);

        let outcome = pipeline.load_series(HistoryRange::OneHour, false).await.unwrap();

        assert_eq!(outcome, SeriesOutcome::Applied { samples: 120 });
        assert_eq!(api.calls().await, vec!["fetch_series:1h", "fetch_table"]);
        assert_eq!(sink.len(), 120);
        assert_eq!(
            pipeline.last_values().as_deref(),
            Some("TDS: 11.0  |  Flow: 0.50  |  Liter: 3.26")
        );
        assert_eq!(pipeline.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_series_replaces_instead_of_appending() {
        let api = Arc::new(
            MockDeviceApi::builder()
                .series(
                    HistoryRange::Day,
                    MockDeviceApi::flat_series(2880, 9.0, 0.4, 1.0),
                )
                .series(
                    HistoryRange::TenMinutes,
                    MockDeviceApi::flat_series(20, 9.0, 0.4, 1.0),
                )
                .build(),
        );
        let (pipeline, sink) = pipeline(api);

        pipeline.load_series(HistoryRange::Day, true).await.unwrap();
        assert_eq!(sink.len(), 2880);

        pipeline.load_series(HistoryRange::TenMinutes, true).await.unwrap();
        assert_eq!(sink.len(), 20);
        assert_eq!(sink.range(), Some(HistoryRange::TenMinutes));
    }

    #[tokio::test]
    async fn test_empty_series_clears_summary() {
        let api = Arc::new(
            MockDeviceApi::builder()
                .series(
                    HistoryRange::OneHour,
                    MockDeviceApi::flat_series(3, 1.0, 1.0, 1.0),
                )
                .build(),
        );
        let (pipeline, _) = pipeline(api);

        pipeline.load_series(HistoryRange::OneHour, true).await.unwrap();
        assert!(pipeline.last_values().is_some());

        pipeline.load_series(HistoryRange::SixHours, true).await.unwrap();
        assert_eq!(pipeline.last_values(), None);
    }

    #[tokio::test]
    async fn test_malformed_series_is_rejected() {
        let api = Arc::new(
            MockDeviceApi::builder()
                .series(
                    HistoryRange::OneHour,
                    HistorySeries {
                        tds: vec![1.0, 2.0],
                        flow: vec![1.0],
                        prod: vec![1.0, 2.0],
                    },
                )
                .build(),
        );
        let (pipeline, sink) = pipeline(api);

        let err = pipeline
            .load_series(HistoryRange::OneHour, true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::FailureKind::MalformedPayload);
        assert!(sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_response_is_discarded() {
        let api = Arc::new(
            MockDeviceApi::builder()
                .series(
                    HistoryRange::Day,
                    MockDeviceApi::flat_series(2880, 1.0, 1.0, 1.0),
                )
                .series(
                    HistoryRange::TenMinutes,
                    MockDeviceApi::flat_series(20, 2.0, 2.0, 2.0),
                )
                .build(),
        );
        api.set_series_latency(HistoryRange::Day, Duration::from_secs(5))
            .await;
        let (pipeline, sink) = pipeline(api);

        let slow = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.load_series(HistoryRange::Day, true).await })
        };
        // Let the slow request take its sequence number first
        tokio::task::yield_now().await;

        let fast = pipeline
            .load_series(HistoryRange::TenMinutes, true)
            .await
            .unwrap();
        assert_eq!(fast, SeriesOutcome::Applied { samples: 20 });

        let slow = slow.await.unwrap().unwrap();
        assert_eq!(slow, SeriesOutcome::Stale);
        assert_eq!(sink.range(), Some(HistoryRange::TenMinutes));
        assert_eq!(sink.len(), 20);
    }

    #[tokio::test]
    async fn test_request_failure_is_reported() {
        let api = Arc::new(MockDeviceApi::new());
        api.set_should_fail(true, None).await;
        let sink = Arc::new(SeriesBuffer::new());
        let events = EventDispatcher::default();
        let mut rx = events.subscribe();
        let pipeline = HistoryPipeline::new(api, sink, events);

        assert!(pipeline.load_table().await.is_err());
        match rx.try_recv().unwrap() {
            ConsoleEvent::Notice(notice) => assert_eq!(notice.level, NoticeLevel::Error),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clear_history_requires_confirmation() {
        let api = Arc::new(
            MockDeviceApi::builder()
                .table(vec![record(1_700_000_000, 0, 1.5)])
                .build(),
        );
        let (pipeline, _) = pipeline(api.clone());
        pipeline.load_table().await.unwrap();

        assert!(!pipeline.clear_history(|| false).await.unwrap());
        assert_eq!(api.call_count("clear_history").await, 0);
        assert_eq!(pipeline.records().len(), 1);

        assert!(pipeline.clear_history(|| true).await.unwrap());
        assert_eq!(
            api.calls().await,
            vec!["fetch_table", "clear_history", "fetch_table"]
        );
        assert!(pipeline.records().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_timer_respects_visibility() {
        let api = Arc::new(MockDeviceApi::new());
        let (pipeline, _) = pipeline(api.clone());
        let token = CancellationToken::new();
        let handle = pipeline.spawn_refresh_timer(Duration::from_secs(30), token.clone());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(api.call_count("fetch_series").await, 0);

        pipeline.set_visible(true);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(api.call_count("fetch_series").await, 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(api.call_count("fetch_series:1h").await, 1);

        token.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_row_formatting() {
        let row = HistoryRow::with_offset_at(&record(1_700_000_000, 1_700_000_245, 4.0), |_| {
            UtcOffset::UTC
        });
        assert_eq!(row.mode, "AUTO");
        assert_eq!(row.start, "2023-11-14 22:13:20");
        assert_eq!(row.end, "2023-11-14 22:17:25");
        assert_eq!(row.duration, "4m05s");
        assert_eq!(row.liters, "4.00");

        let open = HistoryRow::with_offset_at(&record(1_700_000_000, 0, 0.5), |_| UtcOffset::UTC);
        assert_eq!(open.end, "running");
        assert_eq!(open.duration, "-");
    }

    /// Europe/Berlin for 2023: CEST from 26 March 01:00 UTC to 29 October 01:00 UTC.
    fn berlin_2023(dt: OffsetDateTime) -> UtcOffset {
        let summer = 1_679_792_400..1_698_541_200;
        let hours = if summer.contains(&dt.unix_timestamp()) { 2 } else { 1 };
        UtcOffset::from_hms(hours, 0, 0).unwrap()
    }

    #[test]
    fn test_row_offset_follows_daylight_saving() {
        let winter = HistoryRow::with_offset_at(&record(1_700_000_000, 1_700_000_245, 4.0), berlin_2023);
        assert_eq!(winter.start, "2023-11-14 23:13:20");

        let summer = HistoryRow::with_offset_at(&record(1_690_000_000, 1_690_000_060, 1.0), berlin_2023);
        assert_eq!(summer.start, "2023-07-22 06:26:40");

        // 02:30 CEST, then one hour later 02:30 CET
        let across = HistoryRow::with_offset_at(&record(1_698_539_400, 1_698_543_000, 9.0), berlin_2023);
        assert_eq!(across.start, "2023-10-29 02:30:00");
        assert_eq!(across.end, "2023-10-29 02:30:00");
        assert_eq!(across.duration, "60m00s");
    }

    #[test]
    fn test_summary_guards_empty_series() {
        assert_eq!(summarize(&HistorySeries::default()), None);
    }
}
