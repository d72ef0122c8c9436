//! Conductor client for triggering upstream historical-data refresh jobs.

use crate::types::Interval;
use crate::{Error, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Upstream service that owns the securities list and refreshes price history.
#[async_trait::async_trait]
pub trait ConductorClient: Send + Sync {
    /// List the symbols the conductor knows about.
    async fn get_securities(&self) -> Result<Vec<String>>;

    /// Ask the conductor to refresh price history for a symbol.
    ///
    /// Returns `false` when the conductor accepted the request but reported
    /// that nothing was refreshed.
    async fn update_historical_prices(&self, symbol: &str, interval: Interval) -> Result<bool>;
}

/// HTTP implementation of [`ConductorClient`].
pub struct HttpConductorClient {
    base_url: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SecurityEntry {
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    success: bool,
}

impl HttpConductorClient {
    /// Create a new conductor client.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn check_status(response: &reqwest::Response, what: &str) -> Result<()> {
        if response.status().is_success() {
            return Ok(());
        }
        Err(Error::Api {
            message: format!("{} failed: {}", what, response.status()),
            status: Some(response.status().as_u16()),
        })
    }
}

#[async_trait::async_trait]
impl ConductorClient for HttpConductorClient {
    async fn get_securities(&self) -> Result<Vec<String>> {
        let response = self.http_client.get(self.url("/securities")).send().await?;
        Self::check_status(&response, "get securities")?;

        let entries: Vec<SecurityEntry> = response.json().await?;
        debug!(count = entries.len(), "Fetched securities from conductor");
        Ok(entries.into_iter().map(|e| e.symbol).collect())
    }

    async fn update_historical_prices(&self, symbol: &str, interval: Interval) -> Result<bool> {
        let response = self
            .http_client
            .post(self.url(&format!("/historical-prices/{}", symbol)))
            .query(&[("interval", interval.as_str())])
            .send()
            .await?;
        Self::check_status(&response, "update historical prices")?;

        let body: RefreshResponse = response.json().await?;
        debug!(symbol, interval = %interval, success = body.success, "Conductor refresh finished");
        Ok(body.success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let client = HttpConductorClient::new("http://conductor:8080/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.url("/securities"), "http://conductor:8080/securities");
    }

    #[test]
    fn test_refresh_response_defaults_to_failure() {
        let body: RefreshResponse = serde_json::from_str("{}").unwrap();
        assert!(!body.success);
    }
}
