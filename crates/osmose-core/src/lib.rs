//! Client synchronization layer for osmose reverse-osmosis controllers.
//!
//! This crate keeps a local view of a controller consistent with its live
//! state, mediates control commands, round-trips the persisted settings and
//! loads run history.
//!
//! # Components
//!
//! | Component | Module | Role |
//! |-----------|--------|------|
//! | Connection Manager | [`connection`] | Self-healing WebSocket; fixed 1.5 s reconnect delay |
//! | State Reconciler | [`reconcile`] | Sparse snapshot merge, start/stop enablement, status line |
//! | Settings Synchronizer | [`settings`] | Typed form ↔ settings document, unit transforms |
//! | History Pipeline | [`history`] | Series and run table, timer and event-driven refresh |
//!
//! [`Console`] owns all four and is what a UI shell talks to. The REST
//! endpoints sit behind the [`DeviceApi`] trait, implemented by
//! [`DeviceClient`] over HTTP and by [`MockDeviceApi`] in memory.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use osmose_core::{Console, ConsoleEvent, ConsoleOptions, SeriesBuffer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let console = Console::new(
//!         ConsoleOptions::new("http://osmose.local"),
//!         Arc::new(SeriesBuffer::new()),
//!     )?;
//!     let mut events = console.subscribe();
//!     console.connect()?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let ConsoleEvent::StatusChanged { status } = event {
//!             println!("{}", status);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod connection;
pub mod console;
pub mod error;
pub mod events;
pub mod history;
pub mod mock;
pub mod options;
pub mod reconcile;
pub mod scan;
pub mod settings;
pub mod traits;
pub mod util;

// Core exports
pub use client::DeviceClient;
pub use connection::{Command, Connection, ConnectionState};
pub use console::{Console, SnapshotEffects, View};
pub use error::{Error, FailureKind, Result};
pub use events::{ConsoleEvent, EventDispatcher, EventReceiver, EventSender, Notice, NoticeLevel};
pub use history::{ChartSink, HistoryPipeline, HistoryRow, SeriesBuffer, SeriesOutcome};
pub use mock::{MockDeviceApi, MockDeviceApiBuilder};
pub use options::ConsoleOptions;
pub use reconcile::{
    ButtonEnablement, DisplayState, MergeOutcome, Reconciler, StateTransition, TelemetryLabels,
};
pub use scan::{ScanOptions, scan_networks};
pub use settings::{
    ControlKind, ControlValue, DEVICE_NAME_KEY, SCHEMA, SaveOutcome, SettingSpec, SettingsForm,
    SettingsSync, UnitTransform,
};
pub use traits::DeviceApi;

// Re-export from osmose-types
pub use osmose_types::{
    DeviceSnapshot, DeviceState, HistoryRange, HistoryRecord, HistorySeries, Mode, NetworkEntry,
    SettingValue, SettingsDocument,
};
