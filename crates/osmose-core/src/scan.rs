//! Wi-Fi network scan.
//!
//! The controller scans in the background; the scan endpoint answers "not
//! ready" until results exist. [`scan_networks`] polls it at a fixed
//! interval until a populated list arrives.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info};

use osmose_types::NetworkEntry;

use crate::error::{Error, Result};
use crate::traits::DeviceApi;

/// Options for polling the scan endpoint.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Maximum number of polls (None = unlimited).
    pub max_polls: Option<u32>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_polls: None,
        }
    }
}

impl ScanOptions {
    /// Create new scan options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delay between polls.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Give up after this many polls.
    #[must_use]
    pub fn max_polls(mut self, polls: u32) -> Self {
        self.max_polls = Some(polls);
        self
    }
}

/// Poll until the controller reports networks.
///
/// The result is sorted by signal strength, strongest first, with one
/// entry per SSID. A request failure ends the scan immediately.
pub async fn scan_networks(api: &dyn DeviceApi, options: &ScanOptions) -> Result<Vec<NetworkEntry>> {
    let mut polls: u32 = 0;

    loop {
        polls += 1;
        if let Some(networks) = api.poll_scan().await? {
            info!("Scan found {} networks after {} polls", networks.len(), polls);
            return Ok(strongest_first(networks));
        }

        if options.max_polls.is_some_and(|max| polls >= max) {
            return Err(Error::ScanExhausted { polls });
        }
        debug!("Scan not ready (poll {}), retrying in {:?}", polls, options.poll_interval);
        sleep(options.poll_interval).await;
    }
}

fn strongest_first(mut networks: Vec<NetworkEntry>) -> Vec<NetworkEntry> {
    networks.sort_by(|a, b| b.rssi.cmp(&a.rssi));
    let mut seen = std::collections::HashSet::new();
    networks.retain(|n| seen.insert(n.ssid.clone()));
    networks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDeviceApi;

    fn net(ssid: &str, rssi: i32) -> NetworkEntry {
        NetworkEntry {
            ssid: ssid.to_string(),
            rssi,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_ready() {
        let api = MockDeviceApi::builder()
            .networks(vec![net("garage", -80), net("home", -45), net("home", -70)])
            .scan_pending_polls(3)
            .build();

        let networks = scan_networks(&api, &ScanOptions::default()).await.unwrap();

        assert_eq!(networks, vec![net("home", -45), net("garage", -80)]);
        assert_eq!(api.scan_polls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_polls() {
        let api = MockDeviceApi::new();
        let options = ScanOptions::new()
            .poll_interval(Duration::from_millis(500))
            .max_polls(5);

        let err = scan_networks(&api, &options).await.unwrap_err();

        assert!(matches!(err, Error::ScanExhausted { polls: 5 }));
        assert_eq!(api.scan_polls(), 5);
    }

    #[tokio::test]
    async fn test_request_failure_stops_scan() {
        let api = MockDeviceApi::new();
        api.set_should_fail(true, None).await;

        let err = scan_networks(&api, &ScanOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::Api { status: 500, .. }));
    }
}
