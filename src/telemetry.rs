//! Telemetry metric name constants.
//!
//! Centralised metric names for muninn operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `muninn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `provider` — upstream name (e.g. "pulse", "mcp_registry", "github")
//! - `registry` — logical registry a record belongs to
//! - `tier` — freshness tier observed: "fresh" | "stale" | "expired"
//! - `status` — outcome: "ok" or "error"

/// Total catalog searches served (from any tier, cache or live).
///
/// Labels: `source` ("cache" | "store" | "live"), `tier`.
pub const SEARCHES_TOTAL: &str = "muninn_searches_total";

/// Total search-cache hits, fresh and stale alike.
///
/// Labels: `tier` ("fresh" | "stale").
pub const SEARCH_CACHE_HITS_TOTAL: &str = "muninn_search_cache_hits_total";

/// Total search-cache misses (no entry, or entry past its TTL).
pub const SEARCH_CACHE_MISSES_TOTAL: &str = "muninn_search_cache_misses_total";

/// Total background revalidations claimed after a stale hit.
pub const REVALIDATIONS_TOTAL: &str = "muninn_revalidations_total";

/// Total requests dispatched to upstream catalog providers.
///
/// Labels: `provider`, `status` ("ok" | "error").
pub const PROVIDER_REQUESTS_TOTAL: &str = "muninn_provider_requests_total";

/// Upstream request duration in seconds.
///
/// Labels: `provider`.
pub const PROVIDER_REQUEST_DURATION_SECONDS: &str = "muninn_provider_request_duration_seconds";

/// Total retry attempts against providers (not counting the initial request).
///
/// Labels: `provider`.
pub const PROVIDER_RETRIES_TOTAL: &str = "muninn_provider_retries_total";

/// Total requests denied by a provider's daily budget.
///
/// Labels: `provider`.
pub const BUDGET_DENIED_TOTAL: &str = "muninn_budget_denied_total";

/// Total metric fetches attempted by the enricher.
///
/// Labels: `metric` ("github_stars" | "npm_downloads" | "pypi_downloads"),
/// `status` ("ok" | "not_modified" | "error").
pub const METRIC_FETCHES_TOTAL: &str = "muninn_metric_fetches_total";

/// Total provider-wide pauses entered after a rate-limit response.
///
/// Labels: `provider`.
pub const PROVIDER_PAUSES_TOTAL: &str = "muninn_provider_pauses_total";

/// Total background sync cycles started.
pub const SYNC_CYCLES_TOTAL: &str = "muninn_sync_cycles_total";

/// Total per-registry sync outcomes.
///
/// Labels: `registry`, `status` ("ok" | "error" | "skipped").
pub const REGISTRY_SYNCS_TOTAL: &str = "muninn_registry_syncs_total";
