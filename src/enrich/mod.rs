//! Popularity-metric enrichment.
//!
//! Cached server records arrive from upstream catalogs without star or
//! download counts. The [`MetricsEnricher`] backfills them: each
//! (server, metric) pair moves through fresh → stale → expired on its
//! own TTL, and a bounded worker pool fetches the ones that are due.
//!
//! Failure handling is two-level. Per metric, failed fetches back off
//! exponentially (capped at half the metric's TTL). Provider-wide, a
//! rate-limit response from GitHub pauses every star fetch until the
//! provider's stated reset time; workers already draining the queue
//! stop pulling new items once the pause trips, while in-flight
//! requests run to completion.

pub mod backoff;
pub mod github;
pub mod npm;
pub mod pypi;

pub use github::{GithubStarsClient, StarFetch};
pub use npm::NpmDownloadsClient;
pub use pypi::PypiDownloadsClient;

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::MuninnError;
use crate::freshness::{Freshness, now_ms};
use crate::store::RegistryStore;
use crate::telemetry;
use crate::types::{
    EnrichReport, MetricKind, MetricStatus, PackageRegistry, ServerRecord, parse_github_repo,
};

/// Default delay after a metric's first failure.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(60);

/// Default star-provider pause when a rate-limit response carries no
/// reset hint.
const DEFAULT_PAUSE: Duration = Duration::from_secs(15 * 60);

/// Configuration for the metrics enricher.
#[derive(Debug, Clone)]
pub struct EnricherConfig {
    /// First-failure backoff delay; doubles per consecutive failure.
    /// Default: 60 seconds.
    pub base_delay: Duration,
    /// Star-provider pause used when a rate-limit response has no reset
    /// hint. Default: 15 minutes.
    pub pause: Duration,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            pause: DEFAULT_PAUSE,
        }
    }
}

impl EnricherConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the first-failure backoff delay.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the fallback pause for rate limits without a reset hint.
    pub fn pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }
}

/// Backfills star and download counts for cached server records.
pub struct MetricsEnricher {
    store: RegistryStore,
    github: GithubStarsClient,
    npm: NpmDownloadsClient,
    pypi: PypiDownloadsClient,
    config: EnricherConfig,
    /// Epoch ms until which every star fetch is suppressed. Monotone
    /// under concurrent rate-limit responses (`fetch_max`).
    star_pause_until_ms: AtomicI64,
}

impl MetricsEnricher {
    /// Create an enricher over `store` using the given provider clients.
    pub fn new(
        store: RegistryStore,
        github: GithubStarsClient,
        npm: NpmDownloadsClient,
        pypi: PypiDownloadsClient,
        config: EnricherConfig,
    ) -> Self {
        Self {
            store,
            github,
            npm,
            pypi,
            config,
            star_pause_until_ms: AtomicI64::new(0),
        }
    }

    /// Backfill metrics for up to `limit` records still missing a star or
    /// install count, preferring records with a package name, then a
    /// repository URL, then the longest-unrefreshed.
    pub async fn enrich_missing(&self, limit: usize, concurrency: usize) -> EnrichReport {
        let candidates = self.store.enrichment_candidates(limit).await;
        self.run_pass(candidates, concurrency).await
    }

    /// Run the same pipeline over an explicit id set (on-demand refresh).
    /// Unknown ids are skipped.
    pub async fn enrich_specific(&self, server_ids: &[String], concurrency: usize) -> EnrichReport {
        let servers = self.store.get_servers(server_ids).await;
        self.run_pass(servers, concurrency).await
    }

    /// When star fetches are currently suppressed, the resume time.
    pub fn star_pause_until(&self) -> Option<i64> {
        let until = self.star_pause_until_ms.load(Ordering::Relaxed);
        (until > now_ms()).then_some(until)
    }

    /// Drain `servers` through a pool of workers.
    async fn run_pass(&self, servers: Vec<ServerRecord>, concurrency: usize) -> EnrichReport {
        if servers.is_empty() {
            return EnrichReport::default();
        }

        let workers = self.effective_concurrency(concurrency).min(servers.len());
        let queue = Mutex::new(VecDeque::from(servers));
        let rate_limited = AtomicBool::new(false);

        let passes = (0..workers).map(|_| {
            let queue = &queue;
            let rate_limited = &rate_limited;
            async move {
                let mut tally = EnrichReport::default();
                loop {
                    // Cooperative short-circuit: once any worker hits a
                    // rate limit, the rest stop pulling new items.
                    if rate_limited.load(Ordering::Relaxed) {
                        break;
                    }
                    let next = queue
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .pop_front();
                    let Some(server) = next else {
                        break;
                    };
                    tally.absorb(self.enrich_server(&server, rate_limited).await);
                }
                tally
            }
        });

        let mut report = EnrichReport::default();
        for tally in join_all(passes).await {
            report.absorb(tally);
        }
        debug!(
            processed = report.processed,
            updated = report.updated,
            "enrichment pass complete"
        );
        report
    }

    /// Anonymous GitHub access gets a single worker to stay under the
    /// unauthenticated rate limit.
    fn effective_concurrency(&self, requested: usize) -> usize {
        if self.github.has_token() {
            requested.max(1)
        } else {
            1
        }
    }

    /// Fetch whichever of this server's metrics are due. Returns a
    /// one-server tally.
    async fn enrich_server(&self, server: &ServerRecord, rate_limited: &AtomicBool) -> EnrichReport {
        let now = now_ms();
        let mut value_written = false;

        if let Some(kind) = download_metric_for(server) {
            let status = self.store.get_metric_status(&server.id, kind).await;
            if is_due(status.as_ref(), kind, now) {
                value_written |= self
                    .fetch_downloads(server, kind, status.as_ref(), now)
                    .await;
            }
        }

        if let Some((owner, repo)) = github_repo_for(server)
            && !rate_limited.load(Ordering::Relaxed)
            && !self.star_provider_paused(now)
        {
            let kind = MetricKind::GithubStars;
            let status = self.store.get_metric_status(&server.id, kind).await;
            if is_due(status.as_ref(), kind, now) {
                value_written |= self
                    .fetch_stars(server, &owner, &repo, status.as_ref(), now, rate_limited)
                    .await;
            }
        }

        EnrichReport {
            processed: 1,
            updated: usize::from(value_written),
        }
    }

    /// Fetch a download count. Returns whether a popularity value was
    /// written through to the record.
    async fn fetch_downloads(
        &self,
        server: &ServerRecord,
        kind: MetricKind,
        status: Option<&MetricStatus>,
        now: i64,
    ) -> bool {
        let Some(package) = server.package_name.as_deref() else {
            return false;
        };

        let fetched = match kind {
            MetricKind::NpmDownloads => self.npm.fetch_monthly_downloads(package).await,
            MetricKind::PypiDownloads => self.pypi.fetch_monthly_downloads(package).await,
            MetricKind::GithubStars => return false,
        };

        match fetched {
            Ok(count) => {
                metrics::counter!(
                    telemetry::METRIC_FETCHES_TOTAL,
                    "metric" => kind.as_str(), "status" => "ok"
                )
                .increment(1);
                self.record_success(&server.id, kind, Some(count), None, now)
                    .await
            }
            Err(e) => {
                metrics::counter!(
                    telemetry::METRIC_FETCHES_TOTAL,
                    "metric" => kind.as_str(), "status" => "error"
                )
                .increment(1);
                debug!(server_id = %server.id, package, error = %e, "download fetch failed");
                self.record_failure(&server.id, kind, &e, status, now, None)
                    .await;
                false
            }
        }
    }

    /// Fetch a star count with a conditional request. A rate-limit
    /// response trips both the instance-wide pause and the pass-local
    /// short-circuit flag.
    async fn fetch_stars(
        &self,
        server: &ServerRecord,
        owner: &str,
        repo: &str,
        status: Option<&MetricStatus>,
        now: i64,
        rate_limited: &AtomicBool,
    ) -> bool {
        let kind = MetricKind::GithubStars;
        let etag = status.and_then(|s| s.etag.as_deref());

        match self.github.fetch_stars(owner, repo, etag).await {
            Ok(StarFetch::Updated { stars, etag }) => {
                metrics::counter!(
                    telemetry::METRIC_FETCHES_TOTAL,
                    "metric" => kind.as_str(), "status" => "ok"
                )
                .increment(1);
                self.record_success(&server.id, kind, Some(stars), etag.as_deref(), now)
                    .await
            }
            Ok(StarFetch::NotModified) => {
                // Still current: extend freshness, keep value and etag.
                metrics::counter!(
                    telemetry::METRIC_FETCHES_TOTAL,
                    "metric" => kind.as_str(), "status" => "not_modified"
                )
                .increment(1);
                self.record_success(&server.id, kind, None, None, now).await
            }
            Err(e @ MuninnError::RateLimited { .. }) => {
                metrics::counter!(
                    telemetry::METRIC_FETCHES_TOTAL,
                    "metric" => kind.as_str(), "status" => "error"
                )
                .increment(1);
                let pause_ms = e
                    .retry_after()
                    .map(|d| d.as_millis() as i64)
                    .filter(|ms| *ms > 0)
                    .unwrap_or(self.config.pause.as_millis() as i64);
                let resume = now + pause_ms;
                self.pause_star_provider(resume);
                rate_limited.store(true, Ordering::Relaxed);
                metrics::counter!(telemetry::PROVIDER_PAUSES_TOTAL, "provider" => "github")
                    .increment(1);
                warn!(resume_at_ms = resume, "github rate limited, pausing star fetches");
                self.record_failure(&server.id, kind, &e, status, now, Some(resume))
                    .await;
                false
            }
            Err(e) => {
                metrics::counter!(
                    telemetry::METRIC_FETCHES_TOTAL,
                    "metric" => kind.as_str(), "status" => "error"
                )
                .increment(1);
                debug!(server_id = %server.id, owner, repo, error = %e, "star fetch failed");
                self.record_failure(&server.id, kind, &e, status, now, None)
                    .await;
                false
            }
        }
    }

    /// Record a successful fetch and write a positive value through to
    /// the record's popularity fields. Returns whether a record changed.
    async fn record_success(
        &self,
        server_id: &str,
        kind: MetricKind,
        value: Option<i64>,
        etag: Option<&str>,
        now: i64,
    ) -> bool {
        let next = now + kind.ttl_ms();
        if let Err(e) = self
            .store
            .record_metric_success(server_id, kind, value, etag, next)
            .await
        {
            warn!(server_id, metric = kind.as_str(), error = %e, "metric bookkeeping write failed");
        }

        match value {
            Some(v) if v > 0 => match self.store.update_server_popularity(server_id, kind, v).await
            {
                Ok(changed) => changed,
                Err(e) => {
                    warn!(server_id, metric = kind.as_str(), error = %e, "popularity write failed");
                    false
                }
            },
            _ => false,
        }
    }

    /// Record a failed fetch. Rate limits carry the provider's resume
    /// time (`resume_at`); everything else schedules by backoff from the
    /// current retry count.
    async fn record_failure(
        &self,
        server_id: &str,
        kind: MetricKind,
        error: &MuninnError,
        status: Option<&MetricStatus>,
        now: i64,
        resume_at: Option<i64>,
    ) {
        let (next, provider_reset) = match resume_at {
            Some(at) => (at, true),
            None => {
                let retries = status.map(|s| s.retry_count).unwrap_or(0);
                let delay = backoff::retry_delay_ms(
                    self.config.base_delay.as_millis() as i64,
                    retries,
                    kind.ttl_ms(),
                );
                (now + delay, false)
            }
        };

        if let Err(e) = self
            .store
            .record_metric_error(
                server_id,
                kind,
                &error_code(error),
                &error.to_string(),
                next,
                provider_reset,
            )
            .await
        {
            warn!(server_id, metric = kind.as_str(), error = %e, "metric bookkeeping write failed");
        }
    }

    fn star_provider_paused(&self, now_ms: i64) -> bool {
        self.star_pause_until_ms.load(Ordering::Relaxed) > now_ms
    }

    fn pause_star_provider(&self, until_ms: i64) {
        self.star_pause_until_ms.fetch_max(until_ms, Ordering::Relaxed);
    }
}

/// Which download metric applies to this record, if any.
fn download_metric_for(server: &ServerRecord) -> Option<MetricKind> {
    server.package_name.as_deref()?;
    match server.package_registry? {
        PackageRegistry::Npm => Some(MetricKind::NpmDownloads),
        PackageRegistry::PyPi => Some(MetricKind::PypiDownloads),
    }
}

/// The `(owner, repo)` pair for star fetches, if the record points at a
/// GitHub repository.
fn github_repo_for(server: &ServerRecord) -> Option<(String, String)> {
    parse_github_repo(server.repository_url.as_deref()?)
}

/// A metric is due when it has never been fetched, or it is no longer
/// fresh and its scheduled next update has arrived.
fn is_due(status: Option<&MetricStatus>, kind: MetricKind, now_ms: i64) -> bool {
    let Some(status) = status else {
        return true;
    };
    if kind.policy().tier(now_ms, status.last_success_at_ms) == Freshness::Fresh {
        return false;
    }
    match status.next_update_at_ms {
        Some(next) => now_ms >= next,
        None => true,
    }
}

/// Short stable code stored alongside the error message.
fn error_code(error: &MuninnError) -> String {
    match error {
        MuninnError::RateLimited { .. } => "rate_limited".to_string(),
        MuninnError::Api { status, .. } => format!("http_{status}"),
        MuninnError::AuthenticationFailed => "auth".to_string(),
        MuninnError::Http(_) => "network".to_string(),
        MuninnError::Json(_) => "parse".to_string(),
        _ => "error".to_string(),
    }
}
