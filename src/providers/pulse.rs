//! PulseMCP catalog client (primary provider).
//!
//! Offset-paged REST API with free-text query support. Entries arrive
//! loosely shaped; normalization is best-effort per entry and drops
//! anything without a usable identity rather than failing the page.
//!
//! See: <https://www.pulsemcp.com/api>

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::traits::{CatalogPage, CatalogProvider, PageRequest};
use super::{canonical_repo_url, is_valid_npm_package_name};
use crate::types::{PackageRegistry, ServerRecord};
use crate::{MuninnError, Result};

/// Default base URL for the PulseMCP API.
const DEFAULT_BASE_URL: &str = "https://api.pulsemcp.com/v0beta";

/// Client for the PulseMCP server catalog.
#[derive(Clone)]
pub struct PulseCatalogClient {
    http: Client,
    base_url: String,
}

impl PulseCatalogClient {
    /// Create a client against the public PulseMCP API.
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
}

impl Default for PulseCatalogClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogProvider for PulseCatalogClient {
    fn name(&self) -> &str {
        "pulse"
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<CatalogPage> {
        let url = format!("{}/servers", self.base_url);

        let mut params: Vec<(&str, String)> = vec![
            ("count_per_page", request.limit.to_string()),
            ("offset", request.offset.to_string()),
        ];
        if let Some(query) = request.query.as_deref()
            && !query.is_empty()
        {
            params.push(("query", query.to_string()));
        }

        let response = self
            .http
            .get(&url)
            .query(&params)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| MuninnError::Http(e.to_string()))?;

        handle_response_errors(&response)?;

        let page: PulsePage = response
            .json()
            .await
            .map_err(|e| MuninnError::Http(e.to_string()))?;

        let raw_count = page.servers.len();
        let servers: Vec<ServerRecord> = page
            .servers
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<PulseServer>(raw) {
                Ok(entry) => entry.into_record(),
                Err(e) => {
                    debug!(error = %e, "dropping malformed pulse entry");
                    None
                }
            })
            .collect();

        if servers.is_empty() && raw_count > 0 {
            return Err(MuninnError::EmptyPage);
        }

        let has_more = page.next.map(|v| !v.is_null()).unwrap_or(false);

        Ok(CatalogPage {
            servers,
            next_cursor: None,
            has_more,
            total: page.total_count,
        })
    }
}

/// Check response status and map to appropriate error.
fn handle_response_errors(response: &reqwest::Response) -> Result<()> {
    let status = response.status();

    if status.is_success() {
        return Ok(());
    }

    match status.as_u16() {
        401 => Err(MuninnError::AuthenticationFailed),
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
            message: format!("PulseMCP API error: {}", status),
        }),
    }
}

#[derive(Deserialize)]
struct PulsePage {
    #[serde(default)]
    servers: Vec<serde_json::Value>,
    total_count: Option<i64>,
    /// URL of the next page; `null` on the last one.
    next: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct PulseServer {
    id: Option<String>,
    name: Option<String>,
    short_description: Option<String>,
    description: Option<String>,
    author: Option<String>,
    version: Option<String>,
    url: Option<String>,
    external_url: Option<String>,
    source_code_url: Option<String>,
    github_stars: Option<i64>,
    package_registry: Option<String>,
    package_name: Option<String>,
    package_download_count: Option<i64>,
}

impl PulseServer {
    /// Best-effort normalization into a [`ServerRecord`]. Identity falls
    /// back `id` → `name` → `package_name`; entries without any of the
    /// three are dropped.
    fn into_record(self) -> Option<ServerRecord> {
        let id = self
            .id
            .as_deref()
            .or(self.name.as_deref())
            .or(self.package_name.as_deref())?
            .trim()
            .to_string();
        if id.is_empty() {
            return None;
        }

        let name = self
            .name
            .as_deref()
            .unwrap_or(&id)
            .trim()
            .to_string();
        if name.is_empty() {
            return None;
        }

        let mut record = ServerRecord::new(id, name, "pulse");
        record.description = self
            .short_description
            .or(self.description)
            .unwrap_or_default();
        record.author = self.author;
        record.version = self.version;
        record.homepage = self.external_url.or(self.url);
        record.repository_url = self.source_code_url.map(|url| canonical_repo_url(&url));
        record.star_count = self.github_stars;
        record.install_count = self.package_download_count;

        record.package_registry = self
            .package_registry
            .as_deref()
            .and_then(PackageRegistry::parse);
        record.package_name = self.package_name.filter(|name| {
            record.package_registry != Some(PackageRegistry::Npm)
                || is_valid_npm_package_name(name)
        });

        Some(record)
    }
}
