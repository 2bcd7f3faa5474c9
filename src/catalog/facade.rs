//! ServerCatalog — the consumer-facing surface over the engine.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::aggregator::RegistryAggregator;
use crate::cache::ServerRecordCache;
use crate::enrich::MetricsEnricher;
use crate::freshness::{Freshness, FreshnessPolicy, now_ms};
use crate::store::RegistryStore;
use crate::types::{
    CacheStats, EnrichReport, RegistrySyncStatus, SearchOptions, SearchResponse, ServerRecord,
    SyncCycleReport, SyncDetails, SyncState,
};
use crate::{MuninnError, Result};

/// The assembled catalog engine.
///
/// Construct via [`Muninn::builder`](super::Muninn::builder). Query
/// operations are best-effort and never fail; administrative operations
/// (`update_registry_sync`, the `clear_*` family) propagate genuine store
/// failures since they are explicit operator actions.
pub struct ServerCatalog {
    store: RegistryStore,
    records: ServerRecordCache,
    aggregator: Arc<RegistryAggregator>,
    enricher: MetricsEnricher,
    registry_policy: FreshnessPolicy,
    sync_timer: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ServerCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCatalog")
            .field("registry_policy", &self.registry_policy)
            .finish_non_exhaustive()
    }
}

impl ServerCatalog {
    pub(super) fn new(
        store: RegistryStore,
        records: ServerRecordCache,
        aggregator: Arc<RegistryAggregator>,
        enricher: MetricsEnricher,
        registry_policy: FreshnessPolicy,
        sync_timer: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            store,
            records,
            aggregator,
            enricher,
            registry_policy,
            sync_timer,
        }
    }

    /// Whether the persistent store came up.
    pub fn is_persistent(&self) -> bool {
        self.store.is_available()
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// Search the catalog.
    ///
    /// Never errors: degraded paths return whatever local data exists,
    /// annotated through `from_cache` and `staleness`.
    pub async fn search(&self, options: &SearchOptions) -> SearchResponse {
        self.aggregator.search(options).await
    }

    // ------------------------------------------------------------------
    // Record cache
    // ------------------------------------------------------------------

    /// Cache one server record. Returns whether the write succeeded.
    pub async fn cache_server(&self, record: &ServerRecord) -> bool {
        self.records.upsert(record).await
    }

    /// Cache a batch of records, deduplicating within the batch and
    /// resolving conflicts against existing rows. Returns the number
    /// written.
    pub async fn bulk_cache_servers(&self, records: Vec<ServerRecord>) -> usize {
        self.records.bulk_upsert(records).await
    }

    /// Look up one cached record by id.
    pub async fn server(&self, id: &str) -> Option<ServerRecord> {
        self.records.get(id).await
    }

    /// Active records from one registry, optionally age-limited
    /// (milliseconds since last write).
    pub async fn servers_by_registry(
        &self,
        registry: &str,
        max_age_ms: Option<i64>,
    ) -> Vec<ServerRecord> {
        self.records.by_registry(registry, max_age_ms).await
    }

    // ------------------------------------------------------------------
    // Freshness and sync bookkeeping
    // ------------------------------------------------------------------

    /// Whether a registry's last successful sync is within `max_age_ms`
    /// (default: the configured registry fresh window).
    pub async fn is_registry_fresh(&self, registry: &str, max_age_ms: Option<i64>) -> bool {
        let policy = match max_age_ms {
            Some(age) => FreshnessPolicy::new(age, age),
            None => self.registry_policy,
        };
        self.registry_freshness(registry, policy).await == Freshness::Fresh
    }

    /// Freshness tier of a registry's last successful sync under an
    /// arbitrary policy.
    pub async fn registry_freshness(&self, registry: &str, policy: FreshnessPolicy) -> Freshness {
        let status = self.store.get_sync_status(registry).await;
        policy.tier(now_ms(), status.and_then(|s| s.last_success_at_ms))
    }

    /// Record a sync-state transition for a registry.
    ///
    /// Success schedules the next sync a full fresh window out; error at
    /// half that. Administrative; propagates store failures.
    pub async fn update_registry_sync(
        &self,
        registry: &str,
        state: SyncState,
        details: SyncDetails,
    ) -> Result<()> {
        if registry.trim().is_empty() {
            return Err(MuninnError::InvalidInput("registry name is empty".into()));
        }
        let next = match state {
            SyncState::Success => Some(now_ms() + self.registry_policy.fresh_ms),
            SyncState::Error => Some(now_ms() + self.registry_policy.fresh_ms / 2),
            SyncState::Pending | SyncState::Syncing => None,
        };
        self.store.update_sync(registry, state, &details, next).await
    }

    /// Sync bookkeeping for every registry the store has seen.
    pub async fn registry_sync_snapshot(&self) -> Vec<RegistrySyncStatus> {
        self.store.all_sync_statuses().await
    }

    // ------------------------------------------------------------------
    // Administration
    // ------------------------------------------------------------------

    /// Drop every search-cache entry.
    pub async fn clear_search_cache(&self) -> Result<()> {
        self.store.clear_search_cache().await
    }

    /// Drop every cached record belonging to `registry`. Returns the
    /// number of rows removed.
    pub async fn clear_registry_cache(&self, registry: &str) -> Result<u64> {
        self.store.clear_registry(registry).await
    }

    /// Drop all registry sync bookkeeping.
    pub async fn clear_registry_sync(&self) -> Result<()> {
        self.store.clear_sync_statuses().await
    }

    /// Aggregate cache statistics: totals, per-registry counts, search
    /// cache size, rolling hit rate and response time.
    pub async fn stats(&self) -> CacheStats {
        self.store.stats().await
    }

    // ------------------------------------------------------------------
    // Enrichment
    // ------------------------------------------------------------------

    /// Backfill popularity metrics for up to `limit` servers with
    /// missing or due metrics, with at most `concurrency` workers.
    pub async fn enrich_missing(&self, limit: usize, concurrency: usize) -> EnrichReport {
        self.enricher.enrich_missing(limit, concurrency).await
    }

    /// Enrich a specific set of servers by id.
    pub async fn enrich_specific(&self, server_ids: &[String], concurrency: usize) -> EnrichReport {
        self.enricher.enrich_specific(server_ids, concurrency).await
    }

    /// When the star provider's rate-limit pause ends, if one is active.
    pub fn star_pause_until(&self) -> Option<i64> {
        self.enricher.star_pause_until()
    }

    // ------------------------------------------------------------------
    // Background sync
    // ------------------------------------------------------------------

    /// Start a sync cycle in the background; `false` when one is already
    /// running.
    pub fn trigger_background_sync(&self) -> bool {
        self.aggregator.trigger_background_sync()
    }

    /// Run one sync cycle and wait for it.
    pub async fn run_sync_cycle(&self) -> SyncCycleReport {
        self.aggregator.run_sync_cycle().await
    }

    /// Run a sync cycle on a fixed interval until the handle is dropped
    /// or aborted. Independent of the builder's `sync_interval` timer.
    pub fn spawn_sync_timer(&self, interval: Duration) -> JoinHandle<()> {
        self.aggregator.spawn_sync_timer(interval)
    }
}

impl Drop for ServerCatalog {
    fn drop(&mut self) {
        // The builder's interval timer holds an Arc of the aggregator;
        // abort it so a dropped catalog does not keep syncing.
        if let Some(timer) = &self.sync_timer {
            timer.abort();
        }
    }
}
