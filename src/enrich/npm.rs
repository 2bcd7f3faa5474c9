//! npm registry download-count client.
//!
//! See: <https://github.com/npm/registry/blob/main/docs/download-counts.md>

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::{MuninnError, Result};

/// Default base URL for the npm downloads API.
const DEFAULT_BASE_URL: &str = "https://api.npmjs.org";

/// Client for npm package download counts.
#[derive(Clone)]
pub struct NpmDownloadsClient {
    http: Client,
    base_url: String,
}

impl NpmDownloadsClient {
    /// Create a client against the public npm API.
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

    /// Downloads over the last month for `package` (scoped names pass
    /// through unescaped, the API accepts the slash).
    pub async fn fetch_monthly_downloads(&self, package: &str) -> Result<i64> {
        let url = format!(
            "{}/downloads/point/last-month/{}",
            self.base_url, package
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| MuninnError::Http(e.to_string()))?;

        handle_response_errors(&response, package)?;

        let point: DownloadPoint = response
            .json()
            .await
            .map_err(|e| MuninnError::Http(e.to_string()))?;

        Ok(point.downloads)
    }
}

impl Default for NpmDownloadsClient {
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
            message: format!("npm package not found: {}", package),
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
            message: format!("npm API error: {}", status),
        }),
    }
}

#[derive(Deserialize)]
struct DownloadPoint {
    downloads: i64,
}
