//! Multi-provider catalog aggregation and background sync.
//!
//! The [`RegistryAggregator`] sits between the search cache and the
//! upstream catalog APIs. A search consults the cache first, then the
//! local record store, and only reaches upstream when neither holds a
//! servable answer. Upstream work goes through a provider chain:
//! every page fetch consumes from that provider's daily budget, retries
//! transient failures, and falls over to the next provider when the
//! budget is spent or retries are exhausted.
//!
//! Background sync runs the other direction: a cycle walks each
//! configured registry, skips the ones still fresh, and paginates the
//! rest into the record cache. One in-memory flag keeps at most one
//! cycle running per aggregator instance; extra triggers are no-ops.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::budget::ProviderBudget;
use crate::cache::{CacheLookup, SearchCache, ServerRecordCache};
use crate::freshness::{Freshness, FreshnessPolicy, now_ms};
use crate::providers::retry::with_retry;
use crate::providers::{CatalogPage, CatalogProvider, PageRequest, RetryConfig};
use crate::store::{RegistryStore, SearchCacheEntry};
use crate::telemetry;
use crate::types::{
    SearchOptions, SearchResponse, ServerRecord, SortBy, SortOrder, SyncCycleReport, SyncDetails,
    SyncState,
};
use crate::{MuninnError, Result};

/// Registry-level fresh window: a registry synced within the last hour
/// is not re-fetched.
pub const REGISTRY_FRESH_MS: i64 = 3_600_000;

/// Registry-level TTL: past four hours the local catalog no longer
/// counts as a servable answer on its own.
pub const REGISTRY_TTL_MS: i64 = 14_400_000;

// ============================================================================
// Configuration
// ============================================================================

/// Tuning knobs for the aggregator.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Freshness policy applied to each registry's last successful sync.
    pub registry_policy: FreshnessPolicy,
    /// Retry policy for upstream page fetches.
    pub retry: RetryConfig,
    /// Concurrent first-pages requested when assembling an initial catalog.
    pub browse_fan_out: usize,
    /// Page size for browse and fan-out requests.
    pub browse_page_size: usize,
    /// Page size for background sync pagination.
    pub sync_page_size: usize,
    /// Upper bound on pages fetched per registry per sync, as a runaway
    /// guard against upstreams that never stop reporting more pages.
    pub max_sync_pages: usize,
    /// How long a fresh-catalog search waits on a live refresh before
    /// serving local results as-is.
    pub live_race_timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            registry_policy: FreshnessPolicy::new(REGISTRY_FRESH_MS, REGISTRY_TTL_MS),
            retry: RetryConfig::new(),
            browse_fan_out: 3,
            browse_page_size: 100,
            sync_page_size: 100,
            max_sync_pages: 50,
            live_race_timeout: Duration::from_secs(2),
        }
    }
}

impl AggregatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry_policy(mut self, policy: FreshnessPolicy) -> Self {
        self.registry_policy = policy;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn browse_fan_out(mut self, fan_out: usize) -> Self {
        self.browse_fan_out = fan_out.max(1);
        self
    }

    pub fn browse_page_size(mut self, size: usize) -> Self {
        self.browse_page_size = size.max(1);
        self
    }

    pub fn sync_page_size(mut self, size: usize) -> Self {
        self.sync_page_size = size.max(1);
        self
    }

    pub fn max_sync_pages(mut self, pages: usize) -> Self {
        self.max_sync_pages = pages.max(1);
        self
    }

    pub fn live_race_timeout(mut self, timeout: Duration) -> Self {
        self.live_race_timeout = timeout;
        self
    }
}

// ============================================================================
// Aggregator
// ============================================================================

/// Upstream results assembled before local paging.
struct Fetched {
    servers: Vec<ServerRecord>,
    total: Option<i64>,
    has_more: bool,
    /// Whether the upstream already applied the caller's limit/offset
    /// window (single-page query) or returned a global set (fan-out).
    pre_paged: bool,
}

/// Multi-provider catalog front end.
///
/// Providers are tried in configured order; index 0 is the primary.
/// Each provider doubles as a logical registry: records it returns are
/// stamped with its name, and background sync tracks one
/// `RegistrySyncStatus` row per provider.
pub struct RegistryAggregator {
    store: RegistryStore,
    records: ServerRecordCache,
    search_cache: SearchCache,
    providers: Vec<Arc<dyn CatalogProvider>>,
    budgets: HashMap<String, ProviderBudget>,
    config: AggregatorConfig,
    sync_running: AtomicBool,
}

impl RegistryAggregator {
    pub fn new(
        store: RegistryStore,
        records: ServerRecordCache,
        search_cache: SearchCache,
        providers: Vec<Arc<dyn CatalogProvider>>,
        budgets: HashMap<String, ProviderBudget>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            store,
            records,
            search_cache,
            providers,
            budgets,
            config,
            sync_running: AtomicBool::new(false),
        }
    }

    /// Names of the configured registries, primary first.
    pub fn registries(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_owned()).collect()
    }

    /// Freshness tier of one registry's last successful sync.
    pub async fn registry_freshness(&self, registry: &str) -> Freshness {
        let status = self.store.get_sync_status(registry).await;
        let reference = status.and_then(|s| s.last_success_at_ms);
        self.config.registry_policy.tier(now_ms(), reference)
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// Serve a catalog search.
    ///
    /// Never fails: upstream and store errors degrade to whatever local
    /// data exists, annotated through `from_cache` and `staleness`.
    #[instrument(skip(self, options), fields(operation = "search"))]
    pub async fn search(self: &Arc<Self>, options: &SearchOptions) -> SearchResponse {
        let start = Instant::now();
        let options = options.normalized();
        let hash = options.query_hash();

        match self.search_cache.lookup(&hash, now_ms()).await {
            CacheLookup::Fresh(entry) => {
                let response = self.serve_cached(&entry, Freshness::Fresh, start).await;
                self.note_search("cache", Freshness::Fresh, true, &response, 0).await;
                return response;
            }
            CacheLookup::Stale(entry) => {
                // Serve immediately; refresh the entry (and, opportunistically,
                // the registries) behind the caller's back.
                self.spawn_revalidation(&options, &hash);
                self.trigger_background_sync();
                let response = self.serve_cached(&entry, Freshness::Stale, start).await;
                self.note_search("cache", Freshness::Stale, true, &response, 0).await;
                return response;
            }
            CacheLookup::Miss => {}
        }

        self.search_uncached(&options, &hash, start).await
    }

    /// Cache miss path: local record store first, upstream only when the
    /// store cannot stand in for an answer.
    async fn search_uncached(
        self: &Arc<Self>,
        options: &SearchOptions,
        hash: &str,
        start: Instant,
    ) -> SearchResponse {
        let (stored, stored_total) = self.records.search(options).await;
        let tier = self.primary_tier().await;

        if tier == Freshness::Stale {
            self.trigger_background_sync();
        }

        if !stored.is_empty() && tier != Freshness::Expired {
            if options.is_unconstrained_browse()
                && let Some(response) = self.race_live_refresh(options, hash, start).await
            {
                return response;
            }
            return self
                .respond_from_store(stored, stored_total, tier, options, hash, start)
                .await;
        }

        match self.fetch_upstream(options).await {
            Ok(fetched) => {
                let response = self.build_and_cache(fetched, options, hash, start).await;
                self.note_search("live", Freshness::Fresh, false, &response, 0).await;
                response
            }
            Err(e) => {
                warn!(error = %e, "upstream search failed, serving stored records");
                let total = stored_total.max(0) as usize;
                let has_more = options.offset + stored.len() < total;
                let response = SearchResponse {
                    servers: stored,
                    total,
                    has_more,
                    from_cache: true,
                    staleness: tier,
                    query_time_ms: start.elapsed().as_millis() as u64,
                };
                self.note_search("store", tier, true, &response, 1).await;
                response
            }
        }
    }

    /// Resolve a cache entry's record ids against the store.
    ///
    /// Ids whose records have since been cleared resolve to nothing; the
    /// entry still serves whatever remains.
    async fn serve_cached(
        &self,
        entry: &SearchCacheEntry,
        tier: Freshness,
        start: Instant,
    ) -> SearchResponse {
        let servers = self.records.get_many(&entry.server_ids).await;
        SearchResponse {
            servers,
            total: entry.total_count.max(0) as usize,
            has_more: entry.has_more,
            from_cache: true,
            staleness: tier,
            query_time_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Serve a store-backed page and cache its id list for repeat queries.
    async fn respond_from_store(
        &self,
        servers: Vec<ServerRecord>,
        total: i64,
        tier: Freshness,
        options: &SearchOptions,
        hash: &str,
        start: Instant,
    ) -> SearchResponse {
        let total = total.max(0) as usize;
        let has_more = options.offset + servers.len() < total;
        let ids: Vec<String> = servers.iter().map(|s| s.id.clone()).collect();
        self.search_cache
            .store_result(hash, &ids, total as i64, has_more)
            .await;
        let response = SearchResponse {
            servers,
            total,
            has_more,
            from_cache: true,
            staleness: tier,
            query_time_ms: start.elapsed().as_millis() as u64,
        };
        self.note_search("store", tier, true, &response, 0).await;
        response
    }

    /// Fresh-catalog browse: race one live first page against a short
    /// timeout. Won race merges the page and serves the merged catalog;
    /// lost or failed race returns `None` and the caller serves the
    /// stored catalog unchanged.
    async fn race_live_refresh(
        &self,
        options: &SearchOptions,
        hash: &str,
        start: Instant,
    ) -> Option<SearchResponse> {
        let request = PageRequest::browse(self.config.browse_page_size, 0);
        let raced = tokio::time::timeout(
            self.config.live_race_timeout,
            self.fetch_page_any(&request),
        )
        .await;

        let page = match raced {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => {
                debug!(error = %e, "live refresh failed, serving stored catalog");
                return None;
            }
            Err(_) => {
                debug!("live refresh timed out, serving stored catalog");
                return None;
            }
        };

        let written = self.records.bulk_upsert(page.servers).await;
        debug!(written, "live refresh merged into record cache");

        let (servers, total) = self.records.search(options).await;
        let total = total.max(0) as usize;
        let has_more = options.offset + servers.len() < total;
        let ids: Vec<String> = servers.iter().map(|s| s.id.clone()).collect();
        self.search_cache
            .store_result(hash, &ids, total as i64, has_more)
            .await;
        let response = SearchResponse {
            servers,
            total,
            has_more,
            from_cache: false,
            staleness: Freshness::Fresh,
            query_time_ms: start.elapsed().as_millis() as u64,
        };
        self.note_search("live", Freshness::Fresh, false, &response, 0).await;
        Some(response)
    }

    /// Fetch upstream results for `options`.
    ///
    /// An unconstrained first-page browse fans out to assemble a global
    /// catalog slice; anything else maps to a single provider page with
    /// the caller's query and window.
    async fn fetch_upstream(&self, options: &SearchOptions) -> Result<Fetched> {
        if options.is_unconstrained_browse() {
            return self.fetch_browse_set().await;
        }
        let request = match options.query.clone() {
            Some(query) => PageRequest::query(query, options.limit, options.offset),
            None => PageRequest::browse(options.limit, options.offset),
        };
        let page = self.fetch_page_any(&request).await?;
        Ok(Fetched {
            servers: page.servers,
            total: page.total,
            has_more: page.has_more,
            pre_paged: true,
        })
    }

    /// Concurrently fetch the first pages of the catalog from one
    /// provider, falling through the chain when a provider yields
    /// nothing at all.
    async fn fetch_browse_set(&self) -> Result<Fetched> {
        let size = self.config.browse_page_size;
        let mut last_err: Option<MuninnError> = None;

        for provider in &self.providers {
            let fan_out = self.fan_out_for(provider.name());
            let requests: Vec<PageRequest> = (0..fan_out)
                .map(|i| PageRequest::browse(size, i * size))
                .collect();
            let results = join_all(
                requests
                    .iter()
                    .map(|request| self.fetch_page_guarded(provider, request)),
            )
            .await;

            let mut servers = Vec::new();
            let mut total: Option<i64> = None;
            let mut has_more = false;
            let mut pages_ok = 0usize;
            let mut first_err: Option<MuninnError> = None;
            for result in results {
                match result {
                    Ok(page) => {
                        pages_ok += 1;
                        // Requests are in offset order, so the last
                        // successful page decides whether more exist.
                        has_more = page.has_more;
                        if let Some(page_total) = page.total {
                            total = Some(total.map_or(page_total, |known| known.max(page_total)));
                        }
                        servers.extend(page.servers);
                    }
                    Err(e) => {
                        if first_err.is_none() {
                            first_err = Some(e);
                        }
                    }
                }
            }

            if pages_ok > 0 {
                debug!(
                    provider = provider.name(),
                    pages_ok,
                    fan_out,
                    records = servers.len(),
                    "browse fan-out assembled"
                );
                return Ok(Fetched {
                    servers,
                    total,
                    has_more,
                    pre_paged: false,
                });
            }

            let error = first_err.unwrap_or(MuninnError::NoProvider);
            if is_fallback_trigger(&error) {
                warn!(
                    provider = provider.name(),
                    error = %error,
                    "browse fan-out failed, trying next provider"
                );
                last_err = Some(error);
                continue;
            }
            return Err(error);
        }

        Err(last_err.unwrap_or(MuninnError::NoProvider))
    }

    /// Fetch one page through the provider chain.
    async fn fetch_page_any(&self, request: &PageRequest) -> Result<CatalogPage> {
        let mut last_err: Option<MuninnError> = None;
        for provider in &self.providers {
            match self.fetch_page_guarded(provider, request).await {
                Ok(page) => return Ok(page),
                Err(e) if is_fallback_trigger(&e) => {
                    warn!(
                        provider = provider.name(),
                        error = %e,
                        "provider request failed, trying next"
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(MuninnError::NoProvider))
    }

    /// One provider page fetch under budget and retry.
    ///
    /// The budget check sits inside the retry closure so every attempt
    /// consumes; exhaustion is non-transient and escapes the retry loop
    /// at once, leaving fallback to the caller.
    async fn fetch_page_guarded(
        &self,
        provider: &Arc<dyn CatalogProvider>,
        request: &PageRequest,
    ) -> Result<CatalogPage> {
        let name = provider.name();
        with_retry(&self.config.retry, name, || async {
            self.consume_budget(name)?;
            let start = Instant::now();
            let result = provider.fetch_page(request).await;
            record_request(name, start, result.is_ok());
            result
        })
        .await
    }

    fn consume_budget(&self, provider: &str) -> Result<()> {
        let Some(budget) = self.budgets.get(provider) else {
            return Ok(());
        };
        if budget.try_consume(now_ms()) {
            return Ok(());
        }
        Err(MuninnError::BudgetExhausted {
            provider: provider.to_owned(),
        })
    }

    /// Fan-out width for a provider, bounded by its remaining budget so
    /// an almost-spent budget is not burned on parallel denials.
    fn fan_out_for(&self, provider: &str) -> usize {
        let configured = self.config.browse_fan_out.max(1);
        match self.budgets.get(provider) {
            Some(budget) => {
                let remaining = budget.remaining(now_ms()) as usize;
                configured.min(remaining.max(1))
            }
            None => configured,
        }
    }

    async fn primary_tier(&self) -> Freshness {
        match self.providers.first() {
            Some(provider) => self.registry_freshness(provider.name()).await,
            None => Freshness::Expired,
        }
    }

    /// Assemble, dedupe, write back, page, and cache an upstream result
    /// set. Emits no search counters; foreground callers do that,
    /// background revalidation does not.
    async fn build_and_cache(
        &self,
        fetched: Fetched,
        options: &SearchOptions,
        hash: &str,
        start: Instant,
    ) -> SearchResponse {
        let processed = process_results(fetched.servers, options);
        let candidates = processed.len();
        let written = self.records.bulk_upsert(processed.clone()).await;
        debug!(written, candidates, "search results written back");

        let page: Vec<ServerRecord> = if fetched.pre_paged {
            processed.into_iter().take(options.limit).collect()
        } else {
            processed
                .into_iter()
                .skip(options.offset)
                .take(options.limit)
                .collect()
        };
        let total = match fetched.total {
            Some(total) => (total.max(0) as usize).max(candidates),
            None => candidates,
        };
        let has_more = if fetched.pre_paged {
            fetched.has_more
        } else {
            fetched.has_more || options.offset + page.len() < candidates
        };

        let ids: Vec<String> = page.iter().map(|s| s.id.clone()).collect();
        self.search_cache
            .store_result(hash, &ids, total as i64, has_more)
            .await;

        SearchResponse {
            servers: page,
            total,
            has_more,
            from_cache: false,
            staleness: Freshness::Fresh,
            query_time_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Refresh a stale cache entry in the background. Single-flight per
    /// query hash; the loser of the claim does nothing.
    fn spawn_revalidation(self: &Arc<Self>, options: &SearchOptions, hash: &str) {
        if !self.search_cache.try_claim_revalidation(hash) {
            return;
        }
        let this = Arc::clone(self);
        let options = options.clone();
        let hash = hash.to_owned();
        tokio::spawn(async move {
            let start = Instant::now();
            match this.fetch_upstream(&options).await {
                Ok(fetched) => {
                    let response = this.build_and_cache(fetched, &options, &hash, start).await;
                    debug!(
                        query_hash = %hash,
                        results = response.servers.len(),
                        "revalidation refreshed search cache"
                    );
                }
                Err(e) => {
                    debug!(query_hash = %hash, error = %e, "revalidation failed");
                }
            }
            this.search_cache.release_revalidation(&hash);
        });
    }

    async fn note_search(
        &self,
        source: &'static str,
        tier: Freshness,
        cache_hit: bool,
        response: &SearchResponse,
        errors: i64,
    ) {
        metrics::counter!(
            telemetry::SEARCHES_TOTAL,
            "source" => source,
            "tier" => tier.as_str(),
        )
        .increment(1);
        self.store
            .record_perf_sample(
                response.query_time_ms as i64,
                cache_hit,
                response.servers.len() as i64,
                errors,
            )
            .await;
    }

    // ------------------------------------------------------------------
    // Background sync
    // ------------------------------------------------------------------

    /// Start a sync cycle in the background.
    ///
    /// Returns `false` without spawning when a cycle is already running.
    /// The spawned cycle re-checks the guard, so a race between two
    /// triggers costs one no-op task, never two cycles.
    pub fn trigger_background_sync(self: &Arc<Self>) -> bool {
        if self.sync_running.load(Ordering::Acquire) {
            return false;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_sync_cycle().await;
        });
        true
    }

    /// Run one sync cycle to completion.
    ///
    /// No-op (all-zero report) when another cycle holds the guard.
    #[instrument(skip(self), fields(operation = "sync_cycle"))]
    pub async fn run_sync_cycle(&self) -> SyncCycleReport {
        if self
            .sync_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("sync cycle already running, skipping");
            return SyncCycleReport::default();
        }
        let report = self.sync_all().await;
        self.sync_running.store(false, Ordering::Release);
        report
    }

    /// Re-sync every sync timer tick, forever. Dropping the handle (or
    /// aborting it) stops the timer.
    pub fn spawn_sync_timer(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; consume it so the timer
            // waits a full interval before its first cycle.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.run_sync_cycle().await;
            }
        })
    }

    async fn sync_all(&self) -> SyncCycleReport {
        metrics::counter!(telemetry::SYNC_CYCLES_TOTAL).increment(1);
        let mut report = SyncCycleReport::default();

        for index in 0..self.providers.len() {
            let registry = self.providers[index].name().to_owned();
            let tier = self.registry_freshness(&registry).await;
            if tier == Freshness::Fresh {
                debug!(registry = %registry, "registry fresh, sync skipped");
                metrics::counter!(
                    telemetry::REGISTRY_SYNCS_TOTAL,
                    "registry" => registry,
                    "status" => "skipped",
                )
                .increment(1);
                report.skipped += 1;
                continue;
            }

            match self.sync_registry(index).await {
                Ok(cached) => {
                    report.synced += 1;
                    report.servers_cached += cached;
                    metrics::counter!(
                        telemetry::REGISTRY_SYNCS_TOTAL,
                        "registry" => registry,
                        "status" => "ok",
                    )
                    .increment(1);
                }
                Err(e) => {
                    warn!(registry = %registry, error = %e, "registry sync failed");
                    report.failed += 1;
                    metrics::counter!(
                        telemetry::REGISTRY_SYNCS_TOTAL,
                        "registry" => registry,
                        "status" => "error",
                    )
                    .increment(1);
                }
            }
        }

        info!(
            synced = report.synced,
            skipped = report.skipped,
            failed = report.failed,
            servers_cached = report.servers_cached,
            "sync cycle finished"
        );
        report
    }

    /// Sync one registry: mark it syncing, paginate its catalog into the
    /// record cache, then record the outcome. Success schedules the next
    /// sync a full fresh window out; failure retries at half that.
    async fn sync_registry(&self, index: usize) -> Result<usize> {
        let registry = self.providers[index].name().to_owned();
        let started = Instant::now();

        // State bookkeeping is best-effort; a failed write must not
        // abort the fetch itself.
        if let Err(e) = self
            .store
            .update_sync(&registry, SyncState::Syncing, &SyncDetails::default(), None)
            .await
        {
            warn!(registry = %registry, error = %e, "failed to record syncing state");
        }

        let outcome = self.sync_registry_records(index).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(cached) => {
                let next = now_ms() + self.config.registry_policy.fresh_ms;
                let details = SyncDetails::success(cached as i64, duration_ms);
                if let Err(e) = self
                    .store
                    .update_sync(&registry, SyncState::Success, &details, Some(next))
                    .await
                {
                    warn!(registry = %registry, error = %e, "failed to record sync success");
                }
                info!(registry = %registry, cached, duration_ms, "registry sync finished");
                Ok(cached)
            }
            Err(error) => {
                let next = now_ms() + self.config.registry_policy.fresh_ms / 2;
                let details = SyncDetails::error(error.to_string(), duration_ms);
                if let Err(e) = self
                    .store
                    .update_sync(&registry, SyncState::Error, &details, Some(next))
                    .await
                {
                    warn!(registry = %registry, error = %e, "failed to record sync error");
                }
                Err(error)
            }
        }
    }

    /// Paginate a registry's catalog into the record cache.
    ///
    /// Starts with the registry's own provider and switches to the next
    /// provider in the chain (restarting pagination, since cursor spaces
    /// differ) when a page fetch fails with a fallback trigger. Pages
    /// already written stay written either way.
    async fn sync_registry_records(&self, primary: usize) -> Result<usize> {
        let order: Vec<&Arc<dyn CatalogProvider>> = std::iter::once(&self.providers[primary])
            .chain(
                self.providers
                    .iter()
                    .enumerate()
                    .filter_map(|(i, p)| (i != primary).then_some(p)),
            )
            .collect();

        let size = self.config.sync_page_size;
        let mut cached = 0usize;
        let mut last_err: Option<MuninnError> = None;

        'providers: for provider in order {
            let mut request = PageRequest::browse(size, 0);
            let mut pages = 0usize;
            loop {
                let page = match self.fetch_page_guarded(provider, &request).await {
                    Ok(page) => page,
                    Err(e) if is_fallback_trigger(&e) => {
                        warn!(
                            provider = provider.name(),
                            error = %e,
                            "sync page fetch failed, switching provider"
                        );
                        last_err = Some(e);
                        continue 'providers;
                    }
                    Err(e) => return Err(e),
                };

                pages += 1;
                let fetched = page.servers.len();
                cached += self.records.bulk_upsert(page.servers).await;
                debug!(provider = provider.name(), pages, fetched, "sync page cached");

                if fetched == 0 || !page.has_more {
                    return Ok(cached);
                }
                if pages >= self.config.max_sync_pages {
                    warn!(
                        provider = provider.name(),
                        pages, "sync page cap reached before catalog end"
                    );
                    return Ok(cached);
                }
                request = match page.next_cursor {
                    Some(cursor) => PageRequest::browse(size, 0).with_cursor(Some(cursor)),
                    None => PageRequest::browse(size, request.offset + size),
                };
            }
        }

        Err(last_err.unwrap_or(MuninnError::NoProvider))
    }
}

// ============================================================================
// Result shaping
// ============================================================================

/// Errors that move the chain to the next provider instead of failing
/// the request. Permanent errors (bad request, auth) would fail the same
/// way anywhere and propagate as-is.
fn is_fallback_trigger(error: &MuninnError) -> bool {
    matches!(error, MuninnError::BudgetExhausted { .. }) || error.is_transient()
}

fn record_request(provider: &str, start: Instant, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    metrics::counter!(
        telemetry::PROVIDER_REQUESTS_TOTAL,
        "provider" => provider.to_owned(),
        "status" => status,
    )
    .increment(1);
    metrics::histogram!(
        telemetry::PROVIDER_REQUEST_DURATION_SECONDS,
        "provider" => provider.to_owned(),
    )
    .record(start.elapsed().as_secs_f64());
}

/// Dedupe, filter, and sort fetched records.
///
/// Duplicates collapse on [`ServerRecord::dedup_key`] (package name,
/// else repository, else name), first occurrence winning, so records
/// from earlier providers shadow later ones. Entries that cannot
/// resolve to an install command are dropped.
fn process_results(servers: Vec<ServerRecord>, options: &SearchOptions) -> Vec<ServerRecord> {
    let mut seen = HashSet::new();
    let mut kept: Vec<ServerRecord> = servers
        .into_iter()
        .filter(|s| s.is_installable())
        .filter(|s| matches_filters(s, options))
        .filter(|s| seen.insert(s.dedup_key()))
        .collect();
    sort_servers(&mut kept, options.sort_by, options.sort_order);
    kept
}

/// Local facet filters. The free-text query is the provider's job and
/// is not re-applied here.
fn matches_filters(server: &ServerRecord, options: &SearchOptions) -> bool {
    let tags_lower: Vec<String> = server.tags.iter().map(|t| t.to_lowercase()).collect();
    for tag in &options.tags {
        if !tags_lower.iter().any(|t| t == tag) {
            return false;
        }
    }
    if let Some(category) = options.category.as_deref() {
        let matched = server
            .category
            .as_deref()
            .map(|c| c.to_lowercase() == category)
            .unwrap_or(false)
            || tags_lower.iter().any(|t| t == category);
        if !matched {
            return false;
        }
    }
    if let Some(author) = options.author.as_deref()
        && server.author.as_deref().map(str::to_lowercase).as_deref() != Some(author)
    {
        return false;
    }
    true
}

/// In-memory twin of the store's ORDER BY: same keys, same tie-breaks,
/// so a live page and a store page sort identically.
fn sort_servers(servers: &mut [ServerRecord], sort_by: SortBy, sort_order: SortOrder) {
    servers.sort_by(|a, b| {
        let ordering = match sort_by {
            SortBy::Stars => a
                .star_count
                .unwrap_or(0)
                .cmp(&b.star_count.unwrap_or(0))
                .then_with(|| a.install_count.unwrap_or(0).cmp(&b.install_count.unwrap_or(0)))
                .then_with(|| compare_names(a, b)),
            SortBy::Installs => a
                .install_count
                .unwrap_or(0)
                .cmp(&b.install_count.unwrap_or(0))
                .then_with(|| compare_names(a, b)),
            SortBy::Name => compare_names(a, b),
            SortBy::Updated => a
                .updated_at_ms
                .cmp(&b.updated_at_ms)
                .then_with(|| compare_names(a, b)),
        };
        match sort_order {
            SortOrder::Desc => ordering.reverse(),
            SortOrder::Asc => ordering,
        }
    });
}

fn compare_names(a: &ServerRecord, b: &ServerRecord) -> std::cmp::Ordering {
    a.name.to_lowercase().cmp(&b.name.to_lowercase())
}
