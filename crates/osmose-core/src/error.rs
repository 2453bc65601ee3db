//! Error types for osmose-core.
//!
//! This module defines the errors that can occur while talking to an osmose
//! controller over its live channel and its REST endpoints.
//!
//! # Failure Classes
//!
//! Every error maps to one [`FailureKind`] via [`Error::kind`], and each
//! kind has a fixed recovery policy:
//!
//! | Kind | Errors | Recovery |
//! |------|--------|----------|
//! | [`FailureKind::TransportLoss`] | [`Error::WebSocket`], [`Error::NotConnected`] | Automatic: the connection manager reconnects after a fixed delay |
//! | [`FailureKind::RequestFailure`] | [`Error::NotReachable`], [`Error::Request`], [`Error::Api`], [`Error::ScanExhausted`] | Reported as a notice; the user re-invokes the action |
//! | [`FailureKind::MalformedPayload`] | [`Error::MalformedPayload`] | None: the controller is trusted, so the fault is surfaced, not hidden |
//! | [`FailureKind::Configuration`] | [`Error::InvalidUrl`], [`Error::InvalidConfig`], [`Error::Cancelled`] | Fix the caller |
//!
//! A fault reported *by the controller* (the `error` field of a snapshot)
//! is not a client error at all; it is shown in the status line.

use thiserror::Error;

/// Errors that can occur when synchronizing with an osmose controller.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The live channel failed.
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// The live channel is not open.
    #[error("Live channel is not open")]
    NotConnected,

    /// The controller did not answer an HTTP request.
    #[error("Controller not reachable at {url}: {source}")]
    NotReachable {
        /// The request URL.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// HTTP request failed after a response arrived.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The controller answered with a non-success status.
    #[error("Controller returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response text or status reason.
        message: String,
    },

    /// The controller sent data of an unexpected shape.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// The network scan never produced results.
    #[error("Network scan returned no results after {polls} polls")]
    ScanExhausted {
        /// Number of polls made.
        polls: u32,
    },

    /// Invalid base URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,
}

/// Failure classes with a shared recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The live channel dropped or could not be opened.
    TransportLoss,
    /// A one-shot request failed.
    RequestFailure,
    /// The controller sent something that does not parse.
    MalformedPayload,
    /// The caller supplied something invalid.
    Configuration,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::WebSocket(_) | Error::NotConnected => FailureKind::TransportLoss,
            Error::NotReachable { .. }
            | Error::Request(_)
            | Error::Api { .. }
            | Error::ScanExhausted { .. } => FailureKind::RequestFailure,
            Error::MalformedPayload(_) => FailureKind::MalformedPayload,
            Error::InvalidUrl(_) | Error::InvalidConfig(_) | Error::Cancelled => {
                FailureKind::Configuration
            }
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a malformed payload error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPayload(message.into())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::MalformedPayload(err.to_string())
    }
}

impl From<osmose_types::ParseError> for Error {
    fn from(err: osmose_types::ParseError) -> Self {
        Error::MalformedPayload(err.to_string())
    }
}

/// Result type alias using osmose-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotConnected;
        assert_eq!(err.to_string(), "Live channel is not open");

        let err = Error::Api {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Controller returned 500: boom");

        let err = Error::ScanExhausted { polls: 7 };
        assert!(err.to_string().contains("7 polls"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::NotConnected.kind(), FailureKind::TransportLoss);
        assert_eq!(
            Error::Api {
                status: 404,
                message: String::new()
            }
            .kind(),
            FailureKind::RequestFailure
        );
        assert_eq!(
            Error::malformed("bad").kind(),
            FailureKind::MalformedPayload
        );
        assert_eq!(
            Error::invalid_config("bad").kind(),
            FailureKind::Configuration
        );
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::MalformedPayload(_)));
    }

    #[test]
    fn test_parse_error_conversion() {
        let parse_err = osmose_types::ParseError::SeriesLengthMismatch {
            tds: 2,
            flow: 1,
            prod: 2,
        };
        let err: Error = parse_err.into();
        assert_eq!(err.kind(), FailureKind::MalformedPayload);
        assert!(err.to_string().contains("tds=2"));
    }

    #[test]
    fn test_websocket_error_conversion() {
        let ws_err = tokio_tungstenite::tungstenite::Error::ConnectionClosed;
        let err: Error = ws_err.into();
        assert_eq!(err.kind(), FailureKind::TransportLoss);
    }
}
