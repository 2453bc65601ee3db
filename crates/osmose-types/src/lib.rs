//! Wire and data types for osmose reverse-osmosis controllers.
//!
//! This crate holds the shapes exchanged with the controller: the sparse
//! telemetry snapshots pushed over the live channel, the persisted settings
//! document, and the history series and run records. It performs no I/O;
//! the client logic lives in `osmose-core`.
//!
//! # Example
//!
//! ```
//! use osmose_types::{DeviceSnapshot, DeviceState};
//!
//! let mut held = DeviceSnapshot::default();
//! let partial: DeviceSnapshot = serde_json::from_str(r#"{"state":"IDLE","tds":12.5}"#).unwrap();
//! held.merge(&partial);
//! assert_eq!(held.state, Some(DeviceState::Idle));
//! ```

pub mod error;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{
    DeviceSnapshot, DeviceState, HISTORY_BUCKET_SECS, HistoryRange, HistoryRecord, HistorySeries,
    Mode, NetworkEntry, Sample, SettingValue, SettingsDocument,
};
