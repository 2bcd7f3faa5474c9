//! GitHub repository API client for star counts.
//!
//! Supports conditional requests: pass the previously stored ETag and a
//! `304 Not Modified` comes back as [`StarFetch::NotModified`], which
//! costs nothing against the authenticated rate limit.
//!
//! See: <https://docs.github.com/en/rest/repos/repos#get-a-repository>

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::{MuninnError, Result};

/// Default base URL for the GitHub REST API.
const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// GitHub rejects requests without a User-Agent.
const USER_AGENT: &str = "muninn-catalog/0.3";

/// Outcome of a star-count fetch.
#[derive(Debug, Clone)]
pub enum StarFetch {
    /// The repository changed (or no ETag was sent); carries the current
    /// star count and the new ETag to store.
    Updated { stars: i64, etag: Option<String> },
    /// The stored ETag still matches; the cached value is still current.
    NotModified,
}

/// Client for the GitHub repository API.
#[derive(Clone)]
pub struct GithubStarsClient {
    token: Option<String>,
    http: Client,
    base_url: String,
}

impl GithubStarsClient {
    /// Create a client. Without a token, requests run against the
    /// anonymous rate limit (60/hour).
    pub fn new(token: Option<String>) -> Self {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    /// Create a client with a custom base URL (for testing with wiremock).
    pub fn with_base_url(token: Option<String>, base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            token,
            http,
            base_url: base_url.into(),
        }
    }

    /// Whether an API token is configured.
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Fetch the star count for `owner/repo`, conditionally if `etag` is
    /// given.
    pub async fn fetch_stars(
        &self,
        owner: &str,
        repo: &str,
        etag: Option<&str>,
    ) -> Result<StarFetch> {
        let url = format!("{}/repos/{}/{}", self.base_url, owner, repo);

        let mut request = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT);
        if let Some(token) = self.token.as_deref() {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        if let Some(etag) = etag {
            request = request.header("If-None-Match", etag);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MuninnError::Http(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(StarFetch::NotModified);
        }

        handle_response_errors(&response)?;

        let etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let repo: RepoResponse = response
            .json()
            .await
            .map_err(|e| MuninnError::Http(e.to_string()))?;

        Ok(StarFetch::Updated {
            stars: repo.stargazers_count,
            etag,
        })
    }
}

/// Check response status and map to appropriate error.
///
/// GitHub signals quota exhaustion as 403 with `x-ratelimit-remaining: 0`
/// (secondary limits use 429 with `retry-after`); both map to
/// [`MuninnError::RateLimited`] with the provider's resume hint.
fn handle_response_errors(response: &reqwest::Response) -> Result<()> {
    let status = response.status();

    if status.is_success() {
        return Ok(());
    }

    match status.as_u16() {
        401 => Err(MuninnError::AuthenticationFailed),
        403 | 429 => Err(MuninnError::RateLimited {
            retry_after: rate_limit_resume(response),
        }),
        code => Err(MuninnError::Api {
            status: code,
            message: format!("GitHub API error: {}", status),
        }),
    }
}

/// Resume hint from `retry-after` (seconds) or `x-ratelimit-reset`
/// (epoch seconds), whichever the response carries.
fn rate_limit_resume(response: &reqwest::Response) -> Option<Duration> {
    let headers = response.headers();

    if let Some(seconds) = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
    {
        return Some(Duration::from_secs(seconds));
    }

    let reset_epoch_s = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i64>().ok())?;
    let until = reset_epoch_s * 1_000 - crate::freshness::now_ms();
    Some(Duration::from_millis(until.max(0) as u64))
}

#[derive(Deserialize)]
struct RepoResponse {
    stargazers_count: i64,
}
