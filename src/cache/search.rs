//! Stale-while-revalidate search cache.
//!
//! Entries are persisted (they outlive the process), so lookups go to the
//! store; what lives in memory is only the single-flight claim set that
//! guarantees a stale entry schedules exactly one background revalidation
//! no matter how many readers hit it at once.
//!
//! The entry's own recorded window drives tiering: an entry written under
//! an older TTL configuration ages by the window it was created with, not
//! the current one.

use std::time::Duration;

use crate::freshness::{Freshness, FreshnessPolicy};
use crate::store::{RegistryStore, SearchCacheEntry};
use crate::telemetry;

/// Default entry TTL: 30 minutes.
const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Default cap on live entries.
const DEFAULT_MAX_ENTRIES: i64 = 256;

/// How long a revalidation claim may stay open before it is presumed dead
/// and another claim is allowed.
const CLAIM_TTL: Duration = Duration::from_secs(120);

/// Configuration for the search cache.
///
/// ```rust
/// # use muninn::SearchCacheConfig;
/// # use std::time::Duration;
/// let config = SearchCacheConfig::new()
///     .ttl(Duration::from_secs(600))
///     .fresh_fraction(0.25)
///     .max_entries(64);
/// ```
#[derive(Debug, Clone)]
pub struct SearchCacheConfig {
    /// Time-to-live for entries. Default: 30 minutes.
    pub ttl: Duration,
    /// Fraction of the TTL during which an entry is fresh (no
    /// revalidation). Default: 0.5.
    pub fresh_fraction: f64,
    /// Maximum live entries; overflow is pruned oldest-created first.
    /// Default: 256.
    pub max_entries: i64,
}

impl Default for SearchCacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            fresh_fraction: 0.5,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl SearchCacheConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entry TTL.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the fresh fraction (clamped to `0.0..=1.0`).
    pub fn fresh_fraction(mut self, fraction: f64) -> Self {
        self.fresh_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Set the live-entry cap.
    pub fn max_entries(mut self, max: i64) -> Self {
        self.max_entries = max.max(1);
        self
    }
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    /// Serve as-is; no background work.
    Fresh(SearchCacheEntry),
    /// Serve, and the caller should attempt to claim a revalidation.
    Stale(SearchCacheEntry),
    /// No usable entry; an expired one counts as a miss.
    Miss,
}

/// SWR cache over the persisted `search_cache` table.
pub struct SearchCache {
    store: RegistryStore,
    config: SearchCacheConfig,
    /// Open revalidation claims keyed by query hash. TTL'd so a crashed
    /// revalidation cannot wedge its key forever.
    claims: moka::sync::Cache<String, ()>,
}

impl SearchCache {
    /// Create a cache over `store`.
    pub fn new(store: RegistryStore, config: SearchCacheConfig) -> Self {
        let claims = moka::sync::Cache::builder()
            .max_capacity(4_096)
            .time_to_live(CLAIM_TTL)
            .build();
        Self {
            store,
            config,
            claims,
        }
    }

    /// The freshness policy an entry's recorded window implies.
    pub fn policy_for(&self, entry: &SearchCacheEntry) -> FreshnessPolicy {
        let ttl = entry.ttl_ms();
        let fresh = (ttl as f64 * self.config.fresh_fraction) as i64;
        FreshnessPolicy::new(fresh, ttl)
    }

    /// Tiered lookup. Fresh and stale hits bump the entry's hit counter and
    /// emit hit metrics; expired entries and absent keys are misses.
    pub async fn lookup(&self, query_hash: &str, now_ms: i64) -> CacheLookup {
        let Some(entry) = self.store.get_search_entry(query_hash).await else {
            metrics::counter!(telemetry::SEARCH_CACHE_MISSES_TOTAL).increment(1);
            return CacheLookup::Miss;
        };

        match self.policy_for(&entry).tier(now_ms, Some(entry.created_at_ms)) {
            Freshness::Fresh => {
                self.store.bump_search_hit(query_hash).await;
                metrics::counter!(telemetry::SEARCH_CACHE_HITS_TOTAL, "tier" => "fresh")
                    .increment(1);
                CacheLookup::Fresh(entry)
            }
            Freshness::Stale => {
                self.store.bump_search_hit(query_hash).await;
                metrics::counter!(telemetry::SEARCH_CACHE_HITS_TOTAL, "tier" => "stale")
                    .increment(1);
                CacheLookup::Stale(entry)
            }
            Freshness::Expired => {
                metrics::counter!(telemetry::SEARCH_CACHE_MISSES_TOTAL).increment(1);
                CacheLookup::Miss
            }
        }
    }

    /// Write (or refresh) the entry for `query_hash`, then prune.
    pub async fn store_result(
        &self,
        query_hash: &str,
        server_ids: &[String],
        total_count: i64,
        has_more: bool,
    ) {
        let ttl_ms = self.config.ttl.as_millis() as i64;
        if let Err(e) = self
            .store
            .put_search_entry(query_hash, server_ids, total_count, has_more, ttl_ms)
            .await
        {
            tracing::warn!(query_hash, error = %e, "search cache write failed");
            return;
        }
        if let Err(e) = self.store.prune_search_cache(self.config.max_entries).await {
            tracing::warn!(error = %e, "search cache prune failed");
        }
    }

    /// Claim the revalidation slot for `query_hash`.
    ///
    /// Returns `true` for exactly one caller until the claim is released
    /// (or expires). The winner is expected to run the revalidation and
    /// call [`release_revalidation`](Self::release_revalidation) when done.
    pub fn try_claim_revalidation(&self, query_hash: &str) -> bool {
        let mut claimed = false;
        self.claims.get_with(query_hash.to_string(), || {
            claimed = true;
        });
        if claimed {
            metrics::counter!(telemetry::REVALIDATIONS_TOTAL).increment(1);
        }
        claimed
    }

    /// Release a revalidation claim.
    pub fn release_revalidation(&self, query_hash: &str) {
        self.claims.invalidate(query_hash);
    }

    /// Drop every entry. Administrative; propagates store failures.
    pub async fn clear(&self) -> crate::Result<()> {
        self.store.clear_search_cache().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(created_at_ms: i64, ttl_ms: i64) -> SearchCacheEntry {
        SearchCacheEntry {
            query_hash: "h".into(),
            server_ids: vec!["a".into()],
            total_count: 1,
            has_more: false,
            created_at_ms,
            expires_at_ms: created_at_ms + ttl_ms,
            hit_count: 0,
        }
    }

    #[tokio::test]
    async fn policy_follows_entry_window_not_config() {
        let cache = SearchCache::new(
            RegistryStore::disabled(),
            SearchCacheConfig::new().fresh_fraction(0.5),
        );
        // entry written under a 20-minute window
        let entry = entry(0, 1_200_000);
        let policy = cache.policy_for(&entry);
        assert_eq!(policy.fresh_ms, 600_000);
        assert_eq!(policy.ttl_ms, 1_200_000);

        assert_eq!(policy.tier(60_000, Some(0)), Freshness::Fresh);
        assert_eq!(policy.tier(600_001, Some(0)), Freshness::Stale);
        assert_eq!(policy.tier(1_200_001, Some(0)), Freshness::Expired);
    }

    #[tokio::test]
    async fn claim_is_single_flight_until_released() {
        let cache = SearchCache::new(RegistryStore::disabled(), SearchCacheConfig::default());
        assert!(cache.try_claim_revalidation("hash"));
        assert!(!cache.try_claim_revalidation("hash"));
        assert!(cache.try_claim_revalidation("other"));

        cache.release_revalidation("hash");
        assert!(cache.try_claim_revalidation("hash"));
    }

    #[tokio::test]
    async fn degraded_store_always_misses() {
        let cache = SearchCache::new(RegistryStore::disabled(), SearchCacheConfig::default());
        assert!(matches!(cache.lookup("anything", 0).await, CacheLookup::Miss));
    }
}
