//! Console configuration.
//!
//! [`ConsoleOptions`] collects every knob of the synchronization layer:
//! where the controller lives, how fast to reconnect, how often to refresh
//! history and how patiently to wait for a network scan.

use std::time::Duration;

use crate::error::{Error, Result};

/// Base URL used when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "http://osmose.local";

/// Path of the controller's live channel.
pub const DEFAULT_WS_PATH: &str = "/ws";

/// Fixed delay between a channel loss and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1500);

/// Period of the background history refresh.
pub const DEFAULT_HISTORY_REFRESH: Duration = Duration::from_secs(30);

/// Options for a [`Console`](crate::Console) session.
#[derive(Debug, Clone)]
pub struct ConsoleOptions {
    /// Controller base URL (`http://` or `https://`).
    pub base_url: String,
    /// Path of the live channel, appended to the derived WebSocket URL.
    pub ws_path: String,
    /// Delay before each reconnection attempt. Never grows.
    pub reconnect_delay: Duration,
    /// Period of the background history refresh.
    pub history_refresh: Duration,
    /// Timeout for one REST request.
    pub request_timeout: Duration,
    /// Delay between network scan polls.
    pub scan_poll_interval: Duration,
    /// Maximum number of scan polls (None = unlimited).
    pub scan_max_polls: Option<u32>,
    /// Capacity of the event broadcast channel.
    pub event_buffer: usize,
}

impl Default for ConsoleOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            ws_path: DEFAULT_WS_PATH.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            history_refresh: DEFAULT_HISTORY_REFRESH,
            request_timeout: Duration::from_secs(10),
            scan_poll_interval: Duration::from_secs(1),
            scan_max_polls: None,
            event_buffer: 100,
        }
    }
}

impl ConsoleOptions {
    /// Create options for the controller at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the live channel path.
    #[must_use]
    pub fn ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    /// Set the reconnect delay.
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the history refresh period.
    #[must_use]
    pub fn history_refresh(mut self, period: Duration) -> Self {
        self.history_refresh = period;
        self
    }

    /// Set the REST request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the delay between scan polls.
    #[must_use]
    pub fn scan_poll_interval(mut self, interval: Duration) -> Self {
        self.scan_poll_interval = interval;
        self
    }

    /// Limit the number of scan polls.
    #[must_use]
    pub fn scan_max_polls(mut self, polls: u32) -> Self {
        self.scan_max_polls = Some(polls);
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// The base URL without a trailing slash.
    pub fn normalized_base_url(&self) -> Result<String> {
        normalize_base_url(&self.base_url)
    }

    /// The live channel URL derived from the base URL.
    ///
    /// `http` becomes `ws` and `https` becomes `wss`.
    pub fn ws_url(&self) -> Result<String> {
        let base = self.normalized_base_url()?;
        let authority = match base.strip_prefix("https://") {
            Some(rest) => format!("wss://{}", rest),
            None => format!("ws://{}", base.trim_start_matches("http://")),
        };
        Ok(format!("{}{}", authority, self.ws_path))
    }

    /// Validate the options and return an error if invalid.
    ///
    /// Checks that:
    /// - `base_url` is an http or https URL
    /// - `ws_path` starts with `/`
    /// - every duration is > 0
    /// - `event_buffer` is > 0
    pub fn validate(&self) -> Result<()> {
        normalize_base_url(&self.base_url)?;
        if !self.ws_path.starts_with('/') {
            return Err(Error::invalid_config("ws_path must start with '/'"));
        }
        if self.reconnect_delay.is_zero() {
            return Err(Error::invalid_config("reconnect_delay must be > 0"));
        }
        if self.history_refresh.is_zero() {
            return Err(Error::invalid_config("history_refresh must be > 0"));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::invalid_config("request_timeout must be > 0"));
        }
        if self.scan_poll_interval.is_zero() {
            return Err(Error::invalid_config("scan_poll_interval must be > 0"));
        }
        if self.scan_max_polls == Some(0) {
            return Err(Error::invalid_config("scan_max_polls must be > 0"));
        }
        if self.event_buffer == 0 {
            return Err(Error::invalid_config("event_buffer must be > 0"));
        }
        Ok(())
    }
}

/// Trim a trailing slash and check the scheme.
pub(crate) fn normalize_base_url(base_url: &str) -> Result<String> {
    let base_url = base_url.trim().trim_end_matches('/').to_string();

    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(Error::InvalidUrl(format!(
            "URL must start with http:// or https://, got: {}",
            base_url
        )));
    }
    if base_url == "http://" || base_url == "https://" {
        return Err(Error::InvalidUrl("URL has no host".to_string()));
    }

    Ok(base_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConsoleOptions::default();
        assert_eq!(options.base_url, "http://osmose.local");
        assert_eq!(options.reconnect_delay, Duration::from_millis(1500));
        assert_eq!(options.history_refresh, Duration::from_secs(30));
        assert_eq!(options.scan_max_polls, None);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_ws_url_derivation() {
        let options = ConsoleOptions::new("http://192.168.4.1/");
        assert_eq!(options.ws_url().unwrap(), "ws://192.168.4.1/ws");

        let options = ConsoleOptions::new("https://osmose.example:8443").ws_path("/live");
        assert_eq!(options.ws_url().unwrap(), "wss://osmose.example:8443/live");
    }

    #[test]
    fn test_invalid_base_url() {
        let options = ConsoleOptions::new("ftp://osmose.local");
        assert!(matches!(options.validate(), Err(Error::InvalidUrl(_))));
        assert!(options.ws_url().is_err());

        let options = ConsoleOptions::new("http:///");
        assert!(matches!(options.validate(), Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let options = ConsoleOptions::default().reconnect_delay(Duration::ZERO);
        assert!(matches!(options.validate(), Err(Error::InvalidConfig(_))));

        let options = ConsoleOptions::default().event_buffer(0);
        assert!(options.validate().is_err());

        let options = ConsoleOptions::default().scan_max_polls(0);
        assert!(options.validate().is_err());

        let options = ConsoleOptions::default().ws_path("ws");
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_builder_chain() {
        let options = ConsoleOptions::new("http://10.0.0.5")
            .reconnect_delay(Duration::from_millis(50))
            .history_refresh(Duration::from_secs(5))
            .scan_max_polls(3);
        assert_eq!(options.reconnect_delay, Duration::from_millis(50));
        assert_eq!(options.history_refresh, Duration::from_secs(5));
        assert_eq!(options.scan_max_polls, Some(3));
        assert_eq!(options.normalized_base_url().unwrap(), "http://10.0.0.5");
    }
}
