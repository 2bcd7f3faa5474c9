//! PyPI download-count client, backed by pypistats.org.
//!
//! See: <https://pypistats.org/api/>

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::{MuninnError, Result};

/// Default base URL for the pypistats API.
const DEFAULT_BASE_URL: &str = "https://pypistats.org";

/// Client for PyPI package download counts.
#[derive(Clone)]
pub struct PypiDownloadsClient {
    http: Client,
    base_url: String,
}

impl PypiDownloadsClient {
    /// Create a client against the public pypistats API.
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create a client with a custom base URL (for testing with wiremock).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Downloads over the last month for `package`. PyPI names are
    /// case-insensitive; the stats API wants them lowercased.
    pub async fn fetch_monthly_downloads(&self, package: &str) -> Result<i64> {
        let url = format!(
            "{}/api/packages/{}/recent",
            self.base_url,
            package.to_lowercase()
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| MuninnError::Http(e.to_string()))?;

        handle_response_errors(&response, package)?;

        let recent: RecentResponse = response
            .json()
            .await
            .map_err(|e| MuninnError::Http(e.to_string()))?;

        Ok(recent.data.last_month)
    }
}

impl Default for PypiDownloadsClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Check response status and map to appropriate error.
fn handle_response_errors(response: &reqwest::Response, package: &str) -> Result<()> {
    let status = response.status();

    if status.is_success() {
        return Ok(());
    }

    match status.as_u16() {
        404 => Err(MuninnError::Api {
            status: 404,
            message: format!("PyPI package not found: {}", package),
        }),
        429 => {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            Err(MuninnError::RateLimited { retry_after })
        }
        code => Err(MuninnError::Api {
            status: code,
            message: format!("pypistats API error: {}", status),
        }),
    }
}

#[derive(Deserialize)]
struct RecentResponse {
    data: RecentData,
}

#[derive(Deserialize)]
struct RecentData {
    last_month: i64,
}
