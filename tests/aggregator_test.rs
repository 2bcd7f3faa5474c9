//! Integration tests for [`RegistryAggregator`] — stale-while-revalidate
//! serving, cache expiry, and background sync through the public API.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use muninn::store::RegistryStore;
use muninn::types::{PackageRegistry, SearchOptions, ServerRecord, SyncDetails, SyncState};
use muninn::{
    AggregatorConfig, CatalogPage, CatalogProvider, Freshness, PageRequest, RegistryAggregator,
    Result, RetryConfig, SearchCache, SearchCacheConfig, ServerRecordCache,
};

/// Provider that answers every page request with the same result set.
struct CountingProvider {
    name: &'static str,
    servers: Vec<ServerRecord>,
    calls: AtomicUsize,
}

impl CountingProvider {
    fn new(name: &'static str, servers: Vec<ServerRecord>) -> Arc<Self> {
        Arc::new(Self {
            name,
            servers,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogProvider for CountingProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch_page(&self, _request: &PageRequest) -> Result<CatalogPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CatalogPage {
            servers: self.servers.clone(),
            next_cursor: None,
            has_more: false,
            total: Some(self.servers.len() as i64),
        })
    }
}

fn record(id: &str, registry: &str) -> ServerRecord {
    let mut record = ServerRecord::new(id, id, registry);
    record.package_registry = Some(PackageRegistry::Npm);
    record.package_name = Some(format!("pkg-{id}"));
    record.star_count = Some(10);
    record
}

async fn aggregator_with(
    store: RegistryStore,
    provider: Arc<CountingProvider>,
    cache_config: SearchCacheConfig,
) -> Arc<RegistryAggregator> {
    let records = ServerRecordCache::new(store.clone());
    let search_cache = SearchCache::new(store.clone(), cache_config);
    let config = AggregatorConfig::new()
        .retry(RetryConfig::disabled())
        .browse_fan_out(1);
    Arc::new(RegistryAggregator::new(
        store,
        records,
        search_cache,
        vec![provider],
        HashMap::new(),
        config,
    ))
}

/// Stamp a recent successful sync so cycles skip the registry and the
/// store-backed path is considered fresh.
async fn stamp_fresh(store: &RegistryStore, registry: &str) {
    store
        .update_sync(registry, SyncState::Success, &SyncDetails::success(1, 5), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn stale_entry_serves_instantly_and_revalidates_once() {
    let store = RegistryStore::in_memory().await.unwrap();
    let provider = CountingProvider::new("p1", vec![record("a", "p1")]);
    stamp_fresh(&store, "p1").await;

    // 400ms window, fresh for the first quarter.
    let cache_config = SearchCacheConfig::new()
        .ttl(Duration::from_millis(400))
        .fresh_fraction(0.25);
    let agg = aggregator_with(store, provider.clone(), cache_config).await;

    let options = SearchOptions::browse();
    let first = agg.search(&options).await;
    assert!(!first.from_cache);
    assert_eq!(first.servers.len(), 1);
    assert_eq!(provider.calls(), 1);

    // Into the stale zone: served from cache at once, refreshed behind
    // the caller's back.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let stale = agg.search(&options).await;
    assert!(stale.from_cache);
    assert_eq!(stale.staleness, Freshness::Stale);
    assert_eq!(stale.servers[0].id, "a");

    // A second stale hit cannot start a second revalidation.
    let raced = agg.search(&options).await;
    assert!(raced.from_cache);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(provider.calls(), 2, "exactly one background refresh ran");

    // The refreshed entry serves fresh again.
    let refreshed = agg.search(&options).await;
    assert!(refreshed.from_cache);
    assert_eq!(refreshed.staleness, Freshness::Fresh);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn expired_entry_is_a_miss_served_from_stored_records() {
    let store = RegistryStore::in_memory().await.unwrap();
    let provider = CountingProvider::new("p1", vec![record("weather-server", "p1")]);
    stamp_fresh(&store, "p1").await;

    let cache_config = SearchCacheConfig::new()
        .ttl(Duration::from_millis(80))
        .fresh_fraction(0.5);
    let agg = aggregator_with(store, provider.clone(), cache_config).await;

    let options = SearchOptions::with_query("weather");
    let live = agg.search(&options).await;
    assert!(!live.from_cache);
    assert_eq!(provider.calls(), 1);

    // Past the whole window the entry no longer exists for lookups, but
    // the records it wrote back do.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let from_store = agg.search(&options).await;
    assert!(from_store.from_cache);
    assert_eq!(from_store.staleness, Freshness::Fresh);
    assert_eq!(from_store.servers.len(), 1);
    assert_eq!(from_store.servers[0].id, "weather-server");
    assert_eq!(provider.calls(), 1, "the store stands in, no upstream call");

    // The store-backed answer re-primed the cache.
    let cached = agg.search(&options).await;
    assert!(cached.from_cache);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn background_trigger_runs_a_cycle_to_completion() {
    let store = RegistryStore::in_memory().await.unwrap();
    let provider = CountingProvider::new("p1", vec![record("a", "p1"), record("b", "p1")]);
    let agg = aggregator_with(store.clone(), provider.clone(), SearchCacheConfig::new()).await;

    let before = muninn::freshness::now_ms();
    assert!(agg.trigger_background_sync());

    let mut synced = None;
    for _ in 0..200 {
        if let Some(status) = store.get_sync_status("p1").await
            && status.status == SyncState::Success
        {
            synced = Some(status);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let status = synced.expect("background cycle completed");
    assert_eq!(status.server_count, 2);
    assert!(
        status.next_sync_at_ms.unwrap() >= before + muninn::aggregator::REGISTRY_FRESH_MS,
        "success schedules a full fresh window ahead"
    );

    assert_eq!(store.get_servers_by_registry("p1", None).await.len(), 2);

    // With the cycle finished the guard is free again.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(agg.trigger_background_sync());
}

#[tokio::test]
async fn sync_timer_waits_one_full_interval_before_first_cycle() {
    let store = RegistryStore::in_memory().await.unwrap();
    let provider = CountingProvider::new("p1", vec![record("a", "p1")]);
    let agg = aggregator_with(store.clone(), provider.clone(), SearchCacheConfig::new()).await;

    let handle = agg.spawn_sync_timer(Duration::from_millis(200));

    // The immediate first tick is consumed, so nothing has run yet.
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(store.get_sync_status("p1").await.is_none());
    assert_eq!(provider.calls(), 0);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(store.get_sync_status("p1").await.is_some());
    assert!(provider.calls() >= 1);

    handle.abort();
}

#[tokio::test]
async fn registries_and_freshness_reflect_sync_state() {
    let store = RegistryStore::in_memory().await.unwrap();
    let provider = CountingProvider::new("p1", vec![record("a", "p1")]);
    let agg = aggregator_with(store.clone(), provider, SearchCacheConfig::new()).await;

    assert_eq!(agg.registries(), vec!["p1".to_string()]);
    assert_eq!(agg.registry_freshness("p1").await, Freshness::Expired);

    stamp_fresh(&store, "p1").await;
    assert_eq!(agg.registry_freshness("p1").await, Freshness::Fresh);
}
