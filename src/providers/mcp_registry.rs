//! Official MCP registry client (secondary provider).
//!
//! Cursor-paged API whose entry schema has drifted across betas: items
//! may arrive bare or wrapped in `{"server": …}`, versions live in
//! `version` or `version_detail.version`, and package fields answer to
//! two names each. Decoding accepts all of it and drops what it cannot
//! identify.
//!
//! See: <https://registry.modelcontextprotocol.io/docs>

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::traits::{CatalogPage, CatalogProvider, PageRequest};
use super::{canonical_repo_url, is_valid_npm_package_name};
use crate::types::{PackageRegistry, ServerRecord};
use crate::{MuninnError, Result};

/// Default base URL for the official MCP registry.
const DEFAULT_BASE_URL: &str = "https://registry.modelcontextprotocol.io/v0";

/// Client for the official MCP server registry.
#[derive(Clone)]
pub struct McpRegistryClient {
    http: Client,
    base_url: String,
}

impl McpRegistryClient {
    /// Create a client against the public registry.
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

impl Default for McpRegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogProvider for McpRegistryClient {
    fn name(&self) -> &str {
        "mcp_registry"
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<CatalogPage> {
        let url = format!("{}/servers", self.base_url);

        let mut params: Vec<(&str, String)> = vec![("limit", request.limit.to_string())];
        if let Some(cursor) = request.cursor.as_deref() {
            params.push(("cursor", cursor.to_string()));
        }
        if let Some(query) = request.query.as_deref()
            && !query.is_empty()
        {
            params.push(("search", query.to_string()));
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

        let page: RegistryPage = response
            .json()
            .await
            .map_err(|e| MuninnError::Http(e.to_string()))?;

        let raw_count = page.servers.len();
        let servers: Vec<ServerRecord> = page
            .servers
            .into_iter()
            .filter_map(|raw| {
                // Newer schema wraps each item as {"server": …, "_meta": …}.
                let raw = match raw.get("server") {
                    Some(inner) if inner.is_object() => inner.clone(),
                    _ => raw,
                };
                match serde_json::from_value::<RegistryEntry>(raw) {
                    Ok(entry) => entry.into_record(),
                    Err(e) => {
                        debug!(error = %e, "dropping malformed registry entry");
                        None
                    }
                }
            })
            .collect();

        if servers.is_empty() && raw_count > 0 {
            return Err(MuninnError::EmptyPage);
        }

        let next_cursor = page
            .metadata
            .as_ref()
            .and_then(|m| m.next_cursor.clone())
            .filter(|c| !c.is_empty());
        let has_more = next_cursor.is_some();

        Ok(CatalogPage {
            servers,
            next_cursor,
            has_more,
            total: None,
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
            message: format!("MCP registry API error: {}", status),
        }),
    }
}

#[derive(Deserialize)]
struct RegistryPage {
    #[serde(default)]
    servers: Vec<serde_json::Value>,
    metadata: Option<RegistryMetadata>,
}

#[derive(Deserialize)]
struct RegistryMetadata {
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct RegistryEntry {
    /// Reverse-DNS identity, e.g. `io.github.owner/server`.
    name: Option<String>,
    description: Option<String>,
    status: Option<String>,
    version: Option<String>,
    version_detail: Option<VersionDetail>,
    repository: Option<RegistryRepository>,
    website_url: Option<String>,
    #[serde(default)]
    packages: Vec<RegistryPackage>,
}

#[derive(Deserialize)]
struct VersionDetail {
    version: Option<String>,
}

#[derive(Deserialize)]
struct RegistryRepository {
    url: Option<String>,
}

#[derive(Deserialize)]
struct RegistryPackage {
    #[serde(alias = "registry_name")]
    registry_type: Option<String>,
    #[serde(alias = "name")]
    identifier: Option<String>,
}

impl RegistryEntry {
    /// Best-effort normalization into a [`ServerRecord`]. The reverse-DNS
    /// `name` is the identity; the display name is its final segment.
    /// Non-`active` entries are dropped.
    fn into_record(self) -> Option<ServerRecord> {
        if let Some(status) = self.status.as_deref()
            && status != "active"
        {
            return None;
        }

        let id = self.name.as_deref()?.trim().to_string();
        if id.is_empty() {
            return None;
        }
        let display = id.rsplit('/').next().unwrap_or(&id).to_string();

        let mut record = ServerRecord::new(id.clone(), display, "mcp_registry");
        record.description = self.description.unwrap_or_default();
        record.version = self
            .version
            .or(self.version_detail.and_then(|v| v.version));
        record.homepage = self.website_url;
        record.repository_url = self
            .repository
            .and_then(|r| r.url)
            .map(|url| canonical_repo_url(&url));

        // reverse-DNS names carry the author in the middle segment:
        // io.github.<owner>/<server>
        record.author = id
            .split('/')
            .next()
            .and_then(|ns| ns.rsplit('.').next())
            .filter(|owner| !owner.is_empty())
            .map(String::from);

        for package in self.packages {
            let Some(registry) = package
                .registry_type
                .as_deref()
                .and_then(PackageRegistry::parse)
            else {
                continue;
            };
            let Some(identifier) = package.identifier.filter(|p| !p.is_empty()) else {
                continue;
            };
            if registry == PackageRegistry::Npm && !is_valid_npm_package_name(&identifier) {
                continue;
            }
            record.package_registry = Some(registry);
            record.package_name = Some(identifier);
            break;
        }

        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_json(status: &str) -> serde_json::Value {
        serde_json::json!({
            "name": "io.github.acme/weather",
            "description": "Weather lookups",
            "status": status,
            "version_detail": { "version": "0.4.2" },
            "repository": { "url": "git@github.com:acme/weather.git", "source": "github" },
            "packages": [
                { "registry_name": "docker", "name": "acme/weather" },
                { "registry_name": "npm", "name": "@acme/weather" }
            ]
        })
    }

    #[test]
    fn normalizes_reverse_dns_entries() {
        let entry: RegistryEntry = serde_json::from_value(entry_json("active")).unwrap();
        let record = entry.into_record().unwrap();
        assert_eq!(record.id, "io.github.acme/weather");
        assert_eq!(record.name, "weather");
        assert_eq!(record.author.as_deref(), Some("acme"));
        assert_eq!(record.version.as_deref(), Some("0.4.2"));
        assert_eq!(
            record.repository_url.as_deref(),
            Some("https://github.com/acme/weather")
        );
        // the docker package is unsupported, the npm one wins
        assert_eq!(record.package_registry, Some(PackageRegistry::Npm));
        assert_eq!(record.package_name.as_deref(), Some("@acme/weather"));
    }

    #[test]
    fn drops_inactive_entries() {
        let entry: RegistryEntry = serde_json::from_value(entry_json("deprecated")).unwrap();
        assert!(entry.into_record().is_none());
    }

    #[test]
    fn accepts_newer_package_field_names() {
        let entry: RegistryEntry = serde_json::from_value(serde_json::json!({
            "name": "io.github.acme/tools",
            "version": "2.0.0",
            "packages": [ { "registry_type": "pypi", "identifier": "acme-tools" } ]
        }))
        .unwrap();
        let record = entry.into_record().unwrap();
        assert_eq!(record.version.as_deref(), Some("2.0.0"));
        assert_eq!(record.package_registry, Some(PackageRegistry::PyPi));
        assert_eq!(record.package_name.as_deref(), Some("acme-tools"));
    }
}
