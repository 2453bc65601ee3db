//! Error types for data parsing in osmose-types.

use thiserror::Error;

/// Errors that can occur when interpreting controller data.
///
/// This error type is transport-agnostic; network and channel errors
/// belong in osmose-core.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A string did not name a known value.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// A history series had datasets of different lengths.
    #[error("Series length mismatch: tds={tds}, flow={flow}, prod={prod}")]
    SeriesLengthMismatch {
        /// Number of TDS samples.
        tds: usize,
        /// Number of flow samples.
        flow: usize,
        /// Number of production samples.
        prod: usize,
    },
}

/// Result type alias using osmose-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
