//! The console facade.
//!
//! [`Console`] owns one session with one controller: the live channel, the
//! held display state, the settings form and the history pipeline. A UI
//! shell constructs it once, calls [`Console::connect`], and binds to its
//! accessors and [`ConsoleEvent`]s.
//!
//! Inbound snapshots are processed by a single task, strictly in arrival
//! order, so a reconciliation never interleaves with another.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use osmose_types::{DeviceSnapshot, HistoryRange, NetworkEntry, SettingsDocument};

use crate::client::DeviceClient;
use crate::connection::{Command, Connection, ConnectionState, Inbound};
use crate::error::{Error, Result};
use crate::events::{ConsoleEvent, EventDispatcher, EventReceiver, Notice};
use crate::history::{ChartSink, HistoryPipeline, SeriesOutcome};
use crate::options::ConsoleOptions;
use crate::reconcile::{ButtonEnablement, DisplayState, MergeOutcome, Reconciler};
use crate::scan::{ScanOptions, scan_networks};
use crate::settings::{SaveOutcome, SettingsSync};
use crate::traits::DeviceApi;

/// Capacity of the queue between the live channel and the reconciler.
const INBOUND_QUEUE: usize = 64;

/// The console's navigation targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum View {
    /// Live status and controls.
    #[default]
    Home,
    /// Chart and run table.
    History,
    /// Settings form.
    Settings,
}

/// Side effects of one merged snapshot.
#[derive(Debug)]
pub struct SnapshotEffects {
    /// What the merge changed.
    pub outcome: MergeOutcome,
    /// The history refresh started by this snapshot, if any.
    pub refresh: Option<JoinHandle<()>>,
}

/// State shared with the inbound processing task.
struct Shared {
    reconciler: Mutex<Reconciler>,
    history: Arc<HistoryPipeline>,
    events: EventDispatcher,
}

impl Shared {
    fn handle_snapshot(&self, partial: &DeviceSnapshot) -> SnapshotEffects {
        let outcome = self
            .reconciler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .merge(partial);

        self.events.send(ConsoleEvent::Snapshot {
            snapshot: outcome.display.snapshot.clone(),
        });
        if outcome.buttons_changed {
            self.events.send(ConsoleEvent::ButtonsChanged {
                buttons: outcome.display.buttons,
            });
        }
        if outcome.status_changed
            && let Some(status) = &outcome.display.status_line
        {
            self.events.send(ConsoleEvent::StatusChanged {
                status: status.clone(),
            });
        }

        let refresh = if !self.history.is_visible() {
            None
        } else if let Some(transition) = &outcome.transition {
            info!(
                "State {} -> {}, refreshing history",
                transition
                    .from
                    .as_ref()
                    .map_or("-".to_string(), |s| s.to_string()),
                transition.to
            );
            let history = Arc::clone(&self.history);
            Some(tokio::spawn(async move {
                let range = history.range();
                if let Err(e) = history.load_series(range, false).await {
                    debug!("History refresh after state change failed: {}", e);
                }
            }))
        } else if outcome.history_push {
            debug!("Controller announced a history change");
            let history = Arc::clone(&self.history);
            Some(tokio::spawn(async move {
                if let Err(e) = history.load_table().await {
                    debug!("History table refresh failed: {}", e);
                }
            }))
        } else {
            None
        };

        SnapshotEffects { outcome, refresh }
    }

    fn handle_inbound(&self, inbound: Inbound) {
        match inbound {
            Ok(partial) => {
                self.handle_snapshot(&partial);
            }
            Err(e) => {
                error!("Dropping malformed controller message: {}", e);
                self.events
                    .notify(Notice::error(format!("Malformed controller message: {}", e)));
            }
        }
    }
}

/// A console session with one controller.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use osmose_core::{Command, Console, ConsoleOptions, SeriesBuffer, View};
///
/// # async fn example() -> osmose_core::Result<()> {
/// let chart = Arc::new(SeriesBuffer::new());
/// let console = Console::new(ConsoleOptions::new("http://osmose.local"), chart.clone())?;
///
/// console.connect()?;
/// console.load_settings().await?;
/// console.show(View::History).await?;
///
/// if console.buttons().start {
///     console.send_command(Command::Start);
/// }
/// println!("{:?} / {} samples", console.status_line(), chart.len());
/// # Ok(())
/// # }
/// ```
pub struct Console {
    options: ConsoleOptions,
    api: Arc<dyn DeviceApi>,
    shared: Arc<Shared>,
    settings: SettingsSync,
    view: Mutex<View>,
    connection: Mutex<Option<Connection>>,
    cancel_token: CancellationToken,
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("base_url", &self.options.base_url)
            .field("view", &self.view())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Console {
    /// Create a console that talks to the controller over HTTP.
    pub fn new(options: ConsoleOptions, sink: Arc<dyn ChartSink>) -> Result<Self> {
        options.validate()?;
        let client =
            DeviceClient::with_timeout(&options.normalized_base_url()?, options.request_timeout)?;
        Self::with_api(options, Arc::new(client), sink)
    }

    /// Create a console over any [`DeviceApi`].
    pub fn with_api(
        options: ConsoleOptions,
        api: Arc<dyn DeviceApi>,
        sink: Arc<dyn ChartSink>,
    ) -> Result<Self> {
        options.validate()?;
        let events = EventDispatcher::new(options.event_buffer);
        let history = Arc::new(HistoryPipeline::new(Arc::clone(&api), sink, events.clone()));
        let settings = SettingsSync::new(Arc::clone(&api), events.clone());

        Ok(Self {
            options,
            api,
            shared: Arc::new(Shared {
                reconciler: Mutex::new(Reconciler::new()),
                history,
                events,
            }),
            settings,
            view: Mutex::new(View::default()),
            connection: Mutex::new(None),
            cancel_token: CancellationToken::new(),
        })
    }

    /// The options this console was built with.
    pub fn options(&self) -> &ConsoleOptions {
        &self.options
    }

    /// Subscribe to console events.
    pub fn subscribe(&self) -> EventReceiver {
        self.shared.events.subscribe()
    }

    // --- Live channel ---

    /// Open the live channel and start the history timer.
    ///
    /// Calling this again while connected does nothing. Fails with
    /// [`Error::Cancelled`] once the console has been shut down.
    pub fn connect(&self) -> Result<()> {
        if self.cancel_token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if connection.is_some() {
            debug!("Console already connected");
            return Ok(());
        }

        let url = self.options.ws_url()?;
        let (tx, mut rx) = mpsc::channel::<Inbound>(INBOUND_QUEUE);
        *connection = Some(Connection::spawn(
            url,
            self.options.reconnect_delay,
            tx,
            self.shared.events.clone(),
        ));

        let shared = Arc::clone(&self.shared);
        let token = self.cancel_token.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    inbound = rx.recv() => match inbound {
                        Some(inbound) => shared.handle_inbound(inbound),
                        None => break,
                    },
                }
            }
            debug!("Inbound processing stopped");
        });

        self.shared
            .history
            .spawn_refresh_timer(self.options.history_refresh, self.cancel_token.child_token());
        Ok(())
    }

    /// Whether the live channel is open.
    pub fn is_connected(&self) -> bool {
        self.connection_state() == Some(ConnectionState::Open)
    }

    /// State of the live channel, or `None` before [`connect`](Self::connect).
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Connection::state)
    }

    /// Wait up to `timeout` for the live channel to open.
    ///
    /// On timeout the error of the last failed connection attempt is
    /// returned, or [`Error::NotConnected`] if no attempt has failed yet.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<()> {
        let mut state = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Connection::watch_state)
            .ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, state.wait_for(|s| *s == ConnectionState::Open)).await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(Error::Cancelled),
            Err(_) => Err(self
                .connection
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .and_then(Connection::take_last_error)
                .unwrap_or(Error::NotConnected)),
        }
    }

    /// Send a control command.
    ///
    /// Returns `false` if the channel is not open; the command is dropped.
    pub fn send_command(&self, command: Command) -> bool {
        match self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(connection) => connection.send_command(command),
            None => {
                debug!("Dropping '{}' command: not connected", command);
                false
            }
        }
    }

    // --- Display state ---

    /// Merge a snapshot as if it had arrived on the live channel.
    pub fn handle_snapshot(&self, partial: &DeviceSnapshot) -> SnapshotEffects {
        self.shared.handle_snapshot(partial)
    }

    /// The current display state.
    pub fn display(&self) -> DisplayState {
        self.shared
            .reconciler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .display()
            .clone()
    }

    /// Current start/stop enablement.
    pub fn buttons(&self) -> ButtonEnablement {
        self.display().buttons
    }

    /// Current status line, once a state is known.
    pub fn status_line(&self) -> Option<String> {
        self.display().status_line
    }

    // --- Settings ---

    /// The settings synchronizer, for editing the form.
    pub fn settings(&self) -> &SettingsSync {
        &self.settings
    }

    /// Read the settings form into a document.
    pub async fn collect_settings(&self) -> SettingsDocument {
        self.settings.collect().await
    }

    /// Save the settings form.
    pub async fn save_settings(&self) -> Result<SaveOutcome> {
        self.settings.save().await
    }

    /// Load the persisted settings into the form.
    pub async fn load_settings(&self) -> Result<bool> {
        self.settings.load().await
    }

    /// Save the settings form, then reboot the controller.
    pub async fn save_and_reboot(&self) -> Result<SaveOutcome> {
        self.settings.save_and_reboot().await
    }

    // --- History ---

    /// The history pipeline.
    pub fn history(&self) -> &Arc<HistoryPipeline> {
        &self.shared.history
    }

    /// Fetch the series for `range`.
    pub async fn load_history_series(
        &self,
        range: HistoryRange,
        force: bool,
    ) -> Result<SeriesOutcome> {
        self.shared.history.load_series(range, force).await
    }

    /// Fetch the run table.
    pub async fn load_history_table(&self) -> Result<usize> {
        self.shared.history.load_table().await
    }

    /// Erase the controller's history after `confirm` agrees.
    pub async fn clear_history(&self, confirm: impl FnOnce() -> bool) -> Result<bool> {
        self.shared.history.clear_history(confirm).await
    }

    /// The view currently shown.
    pub fn view(&self) -> View {
        *self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Navigate to a view.
    ///
    /// Entering the history view forces a series refresh; leaving it stops
    /// the periodic refresh from fetching.
    pub async fn show(&self, view: View) -> Result<Option<SeriesOutcome>> {
        let previous = std::mem::replace(
            &mut *self.view.lock().unwrap_or_else(PoisonError::into_inner),
            view,
        );
        let history = &self.shared.history;
        history.set_visible(view == View::History);

        if view == View::History && previous != View::History {
            let outcome = history.load_series(history.range(), true).await?;
            return Ok(Some(outcome));
        }
        Ok(None)
    }

    /// Select a history range and refresh immediately.
    pub async fn set_range(&self, range: HistoryRange) -> Result<SeriesOutcome> {
        let history = &self.shared.history;
        history.set_range(range);
        history.load_series(range, true).await
    }

    // --- Device ---

    /// Scan for Wi-Fi networks.
    pub async fn scan_networks(&self) -> Result<Vec<NetworkEntry>> {
        let options = ScanOptions {
            poll_interval: self.options.scan_poll_interval,
            max_polls: self.options.scan_max_polls,
        };
        scan_networks(self.api.as_ref(), &options).await.inspect_err(|e| {
            warn!("Network scan failed: {}", e);
            self.shared
                .events
                .notify(Notice::error(format!("Network scan failed: {}", e)));
        })
    }

    /// Ask the controller to restart.
    pub async fn reboot(&self) -> Result<()> {
        match self.api.reboot().await {
            Ok(()) => {
                self.shared
                    .events
                    .notify(Notice::info("Controller is restarting"));
                Ok(())
            }
            Err(e) => {
                warn!("Failed to request reboot: {}", e);
                self.shared
                    .events
                    .notify(Notice::error(format!("Reboot request failed: {}", e)));
                Err(e)
            }
        }
    }

    /// Close the live channel and stop all background tasks.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
        if let Some(connection) = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            connection.shutdown();
        }
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::SeriesBuffer;
    use crate::mock::MockDeviceApi;
    use osmose_types::DeviceState;

    fn console(api: Arc<MockDeviceApi>) -> (Console, Arc<SeriesBuffer>) {
        let sink = Arc::new(SeriesBuffer::new());
        let console = Console::with_api(ConsoleOptions::default(), api, sink.clone()).unwrap();
        (console, sink)
    }

    fn parse(json: &str) -> DeviceSnapshot {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_invalid_options_rejected() {
        let options = ConsoleOptions::new("osmose.local");
        let result = Console::with_api(
            options,
            Arc::new(MockDeviceApi::new()),
            Arc::new(SeriesBuffer::new()),
        );
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_transition_refreshes_visible_history() {
        let api = Arc::new(
            MockDeviceApi::builder()
                .series(
                    HistoryRange::OneHour,
                    MockDeviceApi::flat_series(120, 8.0, 0.4, 2.0),
                )
                .build(),
        );
        let (console, sink) = console(api.clone());
        console.show(View::History).await.unwrap();
        // The first state report counts as a transition too
        let first = console.handle_snapshot(&parse(r#"{"state":"RUNNING"}"#));
        first.refresh.expect("refresh spawned").await.unwrap();
        api.reset_calls().await;

        let started = tokio::time::Instant::now();
        let effects = console.handle_snapshot(&parse(r#"{"state":"IDLE"}"#));
        effects.refresh.expect("refresh spawned").await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(api.calls().await, vec!["fetch_series:1h", "fetch_table"]);
        assert_eq!(sink.len(), 120);
        assert_eq!(
            effects.outcome.transition.map(|t| t.to),
            Some(DeviceState::Idle)
        );
    }

    #[tokio::test]
    async fn test_hidden_history_is_not_refreshed_on_transition() {
        let api = Arc::new(MockDeviceApi::new());
        let (console, _) = console(api.clone());

        let effects = console.handle_snapshot(&parse(r#"{"state":"RUNNING"}"#));
        assert!(effects.refresh.is_none());
        let effects = console.handle_snapshot(&parse(r#"{"state":"IDLE"}"#));
        assert!(effects.refresh.is_none());
        assert!(api.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_history_push_reloads_table() {
        let api = Arc::new(MockDeviceApi::new());
        let (console, _) = console(api.clone());
        console.show(View::History).await.unwrap();
        api.reset_calls().await;

        let effects = console.handle_snapshot(&parse(r#"{"histUpdate":1}"#));
        effects.refresh.expect("table refresh spawned").await.unwrap();

        assert_eq!(api.calls().await, vec!["fetch_table"]);
    }

    #[tokio::test]
    async fn test_navigation_controls_visibility() {
        let api = Arc::new(MockDeviceApi::new());
        let (console, _) = console(api.clone());

        assert_eq!(console.show(View::Settings).await.unwrap(), None);
        assert!(!console.history().is_visible());

        let outcome = console.show(View::History).await.unwrap();
        assert_eq!(outcome, Some(SeriesOutcome::Applied { samples: 0 }));
        assert!(console.history().is_visible());

        // Staying in the view does not refetch
        assert_eq!(console.show(View::History).await.unwrap(), None);

        console.show(View::Home).await.unwrap();
        assert!(!console.history().is_visible());
        assert_eq!(api.call_count("fetch_series").await, 1);
    }

    #[tokio::test]
    async fn test_set_range_forces_refresh() {
        let api = Arc::new(MockDeviceApi::new());
        let (console, sink) = console(api.clone());

        let outcome = console.set_range(HistoryRange::SixHours).await.unwrap();

        assert_eq!(outcome, SeriesOutcome::Applied { samples: 0 });
        assert_eq!(console.history().range(), HistoryRange::SixHours);
        assert_eq!(sink.range(), Some(HistoryRange::SixHours));
    }

    #[tokio::test]
    async fn test_snapshot_events() {
        let api = Arc::new(MockDeviceApi::new());
        let (console, _) = console(api);
        let mut rx = console.subscribe();

        console.handle_snapshot(&parse(r#"{"state":"IDLE","mode":"MANUAL"}"#));

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                ConsoleEvent::Snapshot { .. } => "snapshot",
                ConsoleEvent::ButtonsChanged { buttons } => {
                    assert!(buttons.start);
                    assert!(!buttons.stop);
                    "buttons"
                }
                ConsoleEvent::StatusChanged { status } => {
                    assert_eq!(status, "MANUAL • IDLE");
                    "status"
                }
                other => panic!("unexpected event: {:?}", other),
            });
        }
        assert_eq!(kinds, vec!["snapshot", "buttons", "status"]);
        assert_eq!(console.status_line().as_deref(), Some("MANUAL • IDLE"));
    }

    #[tokio::test]
    async fn test_commands_dropped_before_connect() {
        let api = Arc::new(MockDeviceApi::new());
        let (console, _) = console(api);

        assert!(!console.send_command(Command::Start));
        assert_eq!(console.connection_state(), None);
        assert!(matches!(
            console.wait_connected(Duration::from_millis(10)).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_after_shutdown_is_cancelled() {
        let api = Arc::new(MockDeviceApi::new());
        let (fresh, _) = console(api.clone());
        fresh.shutdown();
        assert!(matches!(fresh.connect(), Err(Error::Cancelled)));
        assert_eq!(fresh.connection_state(), None);

        let (connected, _) = console(api);
        connected.connect().unwrap();
        connected.shutdown();
        assert!(matches!(connected.connect(), Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_wait_connected_reports_connect_failure() {
        let options = ConsoleOptions::new("http://127.0.0.1:9")
            .reconnect_delay(Duration::from_millis(20));
        let console = Console::with_api(
            options,
            Arc::new(MockDeviceApi::new()),
            Arc::new(SeriesBuffer::new()),
        )
        .unwrap();

        console.connect().unwrap();
        let err = console
            .wait_connected(Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WebSocket(_)), "unexpected error: {:?}", err);
        console.shutdown();
    }

    #[tokio::test]
    async fn test_malformed_inbound_becomes_notice() {
        let api = Arc::new(MockDeviceApi::new());
        let (console, _) = console(api);
        let mut rx = console.subscribe();

        console
            .shared
            .handle_inbound(Err(Error::malformed("expected value at line 1")));

        match rx.try_recv().unwrap() {
            ConsoleEvent::Notice(notice) => {
                assert_eq!(notice.level, crate::events::NoticeLevel::Error)
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reboot_notice() {
        let api = Arc::new(MockDeviceApi::new());
        let (console, _) = console(api.clone());

        console.reboot().await.unwrap();
        assert_eq!(api.reboots(), 1);
    }
}
