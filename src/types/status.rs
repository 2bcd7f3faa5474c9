//! Sync and enrichment bookkeeping types.

use serde::{Deserialize, Serialize};

use crate::freshness::FreshnessPolicy;

/// Lifecycle state of one registry's sync.
///
/// Transitions within a cycle are monotonic:
/// `Pending → Syncing → Success | Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Never synced, or reset.
    #[default]
    Pending,
    /// A sync cycle is currently fetching this registry.
    Syncing,
    /// Last cycle completed.
    Success,
    /// Last cycle failed.
    Error,
}

impl SyncState {
    /// Stable form stored in the `registry_sync` table.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Pending => "pending",
            SyncState::Syncing => "syncing",
            SyncState::Success => "success",
            SyncState::Error => "error",
        }
    }

    /// Parse the stored form; unknown values read back as `Pending`.
    pub fn parse(s: &str) -> Self {
        match s {
            "syncing" => SyncState::Syncing,
            "success" => SyncState::Success,
            "error" => SyncState::Error,
            _ => SyncState::Pending,
        }
    }
}

/// One registry's sync bookkeeping row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySyncStatus {
    /// Registry name (primary key).
    pub registry: String,
    /// Current lifecycle state.
    pub status: SyncState,
    /// Last attempt started, epoch ms.
    pub last_sync_at_ms: Option<i64>,
    /// Last successful completion, epoch ms.
    pub last_success_at_ms: Option<i64>,
    /// Next scheduled sync, epoch ms.
    pub next_sync_at_ms: Option<i64>,
    /// Records cached by the last successful sync.
    pub server_count: i64,
    /// Failure detail from the last errored sync.
    pub error_message: Option<String>,
    /// Wall-clock duration of the last completed sync.
    pub sync_duration_ms: Option<i64>,
}

/// Optional details accompanying a sync-state transition.
#[derive(Debug, Clone, Default)]
pub struct SyncDetails {
    /// Records cached by this cycle.
    pub server_count: Option<i64>,
    /// Failure detail (error transitions).
    pub error_message: Option<String>,
    /// Cycle duration.
    pub sync_duration_ms: Option<i64>,
}

impl SyncDetails {
    /// Details for a successful cycle.
    pub fn success(server_count: i64, sync_duration_ms: i64) -> Self {
        Self {
            server_count: Some(server_count),
            error_message: None,
            sync_duration_ms: Some(sync_duration_ms),
        }
    }

    /// Details for a failed cycle.
    pub fn error(message: impl Into<String>, sync_duration_ms: i64) -> Self {
        Self {
            server_count: None,
            error_message: Some(message.into()),
            sync_duration_ms: Some(sync_duration_ms),
        }
    }
}

/// Popularity metric the enricher tracks per server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// GitHub repository star count.
    GithubStars,
    /// npm monthly download count.
    NpmDownloads,
    /// PyPI monthly download count.
    PypiDownloads,
}

impl MetricKind {
    /// Stable form used as the `metric_type` column and in metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::GithubStars => "github_stars",
            MetricKind::NpmDownloads => "npm_downloads",
            MetricKind::PypiDownloads => "pypi_downloads",
        }
    }

    /// Parse the stored form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "github_stars" => Some(MetricKind::GithubStars),
            "npm_downloads" => Some(MetricKind::NpmDownloads),
            "pypi_downloads" => Some(MetricKind::PypiDownloads),
            _ => None,
        }
    }

    /// Refresh interval: stars every 6 hours, downloads every 24.
    pub fn ttl_ms(&self) -> i64 {
        match self {
            MetricKind::GithubStars => 6 * 60 * 60 * 1000,
            MetricKind::NpmDownloads | MetricKind::PypiDownloads => 24 * 60 * 60 * 1000,
        }
    }

    /// Freshness policy for this metric (fresh window = half the TTL).
    pub fn policy(&self) -> FreshnessPolicy {
        FreshnessPolicy::halved(self.ttl_ms())
    }
}

/// Outcome of the most recent fetch for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricState {
    /// Last fetch succeeded (including `304 Not Modified`).
    Success,
    /// Last fetch failed.
    Error,
}

impl MetricState {
    /// Stable form stored in the `metric_status` table.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricState::Success => "success",
            MetricState::Error => "error",
        }
    }

    /// Parse the stored form.
    pub fn parse(s: &str) -> Self {
        match s {
            "success" => MetricState::Success,
            _ => MetricState::Error,
        }
    }
}

/// Per-(server, metric) fetch bookkeeping row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricStatus {
    /// Server this metric belongs to.
    pub server_id: String,
    /// Which metric.
    pub kind: MetricKind,
    /// Outcome of the last fetch.
    pub status: MetricState,
    /// Last fetch attempted, epoch ms.
    pub last_attempt_at_ms: Option<i64>,
    /// Last fetch succeeded, epoch ms.
    pub last_success_at_ms: Option<i64>,
    /// Earliest next fetch, epoch ms. Never decreases across consecutive
    /// errors except on a provider-supplied reset.
    pub next_update_at_ms: Option<i64>,
    /// Last observed value.
    pub value: Option<i64>,
    /// Consecutive failures since the last success.
    pub retry_count: u32,
    /// Short error code (HTTP status or "network").
    pub error_code: Option<String>,
    /// Failure detail.
    pub error_message: Option<String>,
    /// Conditional-request token for the next fetch.
    pub etag: Option<String>,
}
