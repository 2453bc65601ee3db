//! HTTP client for the controller's REST endpoints.
//!
//! # Example
//!
//! ```no_run
//! use osmose_core::{DeviceApi, DeviceClient};
//! use osmose_types::HistoryRange;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = DeviceClient::new("http://osmose.local")?;
//!
//! let series = client.fetch_series(HistoryRange::OneHour).await?;
//! println!("{} samples", series.len());
//!
//! if let Some(settings) = client.fetch_settings().await? {
//!     println!("name: {:?}", settings.get_str("mDNSName"));
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use osmose_types::{HistoryRange, HistoryRecord, HistorySeries, NetworkEntry, SettingsDocument};

use crate::error::{Error, Result};
use crate::options::normalize_base_url;
use crate::traits::DeviceApi;

/// HTTP client for one controller.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    client: Client,
    base_url: String,
}

impl DeviceClient {
    /// Create a new client with a 10 second request timeout.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The controller's base URL (e.g., "http://osmose.local")
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base_url(base_url)?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Request)?;

        Ok(Self { client, base_url })
    }

    /// Create a client with a custom reqwest Client.
    pub fn with_client(base_url: &str, client: Client) -> Result<Self> {
        let base_url = normalize_base_url(base_url)?;
        Ok(Self { client, base_url })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ======================================================================
    // Internal HTTP helpers
    // ======================================================================

    async fn get(&self, url: &str) -> Result<Response> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::NotReachable {
                url: url.to_string(),
                source: e,
            })?;

        check_status(response).await
    }

    async fn post_empty(&self, url: &str) -> Result<()> {
        debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|e| Error::NotReachable {
                url: url.to_string(),
                source: e,
            })?;

        check_status(response).await.map(drop)
    }

    async fn post_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<()> {
        debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::NotReachable {
                url: url.to_string(),
                source: e,
            })?;

        check_status(response).await.map(drop)
    }
}

/// Turn a non-success status into [`Error::Api`].
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .or_else(|| Some(body.trim().to_string()).filter(|b| !b.is_empty()))
        .unwrap_or_else(|| status.to_string());

    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}

/// Decode a JSON body; shape violations are malformed payloads.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

/// Whether a settings body means "nothing stored yet".
fn is_blank_document(body: &str) -> bool {
    matches!(body.trim(), "" | "null" | "{}")
}

#[async_trait]
impl DeviceApi for DeviceClient {
    async fn fetch_settings(&self) -> Result<Option<SettingsDocument>> {
        let response = self.get(&self.url("/api/settings")).await?;
        let body = response.text().await?;
        if is_blank_document(&body) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&body)?))
    }

    async fn store_settings(&self, doc: &SettingsDocument) -> Result<()> {
        self.post_json(&self.url("/api/settings"), doc).await
    }

    async fn fetch_series(&self, range: HistoryRange) -> Result<HistorySeries> {
        let url = self.url(&format!("/api/history/series?range={}", range.as_secs()));
        let series: HistorySeries = decode(self.get(&url).await?).await?;
        series.validate()?;
        Ok(series)
    }

    async fn fetch_table(&self) -> Result<Vec<HistoryRecord>> {
        decode(self.get(&self.url("/api/history/table")).await?).await
    }

    async fn clear_history(&self) -> Result<()> {
        self.post_empty(&self.url("/api/history/clear")).await
    }

    async fn poll_scan(&self) -> Result<Option<Vec<NetworkEntry>>> {
        let response = self.get(&self.url("/api/wifi/scan")).await?;
        if response.status() == StatusCode::ACCEPTED {
            return Ok(None);
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        let networks: Vec<NetworkEntry> = serde_json::from_str(&body)?;
        Ok(Some(networks).filter(|n| !n.is_empty()))
    }

    async fn reboot(&self) -> Result<()> {
        self.post_empty(&self.url("/api/reboot")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = DeviceClient::new("http://osmose.local/").unwrap();
        assert_eq!(client.base_url(), "http://osmose.local");
        assert_eq!(
            client.url("/api/settings"),
            "http://osmose.local/api/settings"
        );
    }

    #[test]
    fn test_client_rejects_bad_scheme() {
        let result = DeviceClient::new("osmose.local");
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_blank_settings_bodies() {
        assert!(is_blank_document(""));
        assert!(is_blank_document(" null\n"));
        assert!(is_blank_document("{}"));
        assert!(!is_blank_document(r#"{"autoStart":true}"#));
    }

    #[tokio::test]
    async fn test_unreachable_controller() {
        // Port 9 (discard) is almost certainly closed on loopback
        let client =
            DeviceClient::with_timeout("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = client.fetch_table().await.unwrap_err();
        assert!(matches!(err, Error::NotReachable { .. }));
        assert_eq!(err.kind(), crate::FailureKind::RequestFailure);
    }
}
