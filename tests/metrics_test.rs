//! Tests for metrics emission.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

use muninn::freshness::now_ms;
use muninn::store::RegistryStore;
use muninn::telemetry;
use muninn::types::{PackageRegistry, SearchOptions, ServerRecord};
use muninn::{
    AggregatorConfig, CatalogPage, CatalogProvider, PageRequest, ProviderBudget,
    RegistryAggregator, Result, RetryConfig, SearchCache, SearchCacheConfig, ServerRecordCache,
};

// ============================================================================
// Mock provider
// ============================================================================

struct OnePageProvider;

#[async_trait]
impl CatalogProvider for OnePageProvider {
    fn name(&self) -> &str {
        "p1"
    }

    async fn fetch_page(&self, _request: &PageRequest) -> Result<CatalogPage> {
        let mut record = ServerRecord::new("a", "a", "p1");
        record.package_registry = Some(PackageRegistry::Npm);
        record.package_name = Some("pkg-a".into());
        Ok(CatalogPage {
            servers: vec![record],
            next_cursor: None,
            has_more: false,
            total: Some(1),
        })
    }
}

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

// ============================================================================
// Helpers
// ============================================================================

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Check if any histogram entries exist for a given metric name.
fn has_histogram(snapshot: &SnapshotVec, name: &str) -> bool {
    snapshot
        .iter()
        .any(|(key, _, _, _)| key.kind() == MetricKind::Histogram && key.key().name() == name)
}

async fn aggregator() -> Arc<RegistryAggregator> {
    let store = RegistryStore::in_memory().await.unwrap();
    Arc::new(RegistryAggregator::new(
        store.clone(),
        ServerRecordCache::new(store.clone()),
        SearchCache::new(store, SearchCacheConfig::new()),
        vec![Arc::new(OnePageProvider)],
        HashMap::new(),
        AggregatorConfig::new()
            .retry(RetryConfig::disabled())
            .browse_fan_out(1),
    ))
}

// ============================================================================
// Tests
// ============================================================================

/// Runs async code within a local recorder scope on the multi-thread runtime.
///
/// `block_in_place` ensures the sync `with_local_recorder` closure stays
/// on the current thread while `block_on` drives the inner async work.
#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn cache_lookups_record_miss_and_hit_counters() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let store = RegistryStore::in_memory().await.unwrap();
                let cache = SearchCache::new(store, SearchCacheConfig::new());

                cache.lookup("q1", now_ms()).await;
                cache.store_result("q1", &["a".to_string()], 1, false).await;
                cache.lookup("q1", now_ms()).await;
                cache.lookup("q1", now_ms()).await;
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_total(&snapshot, telemetry::SEARCH_CACHE_MISSES_TOTAL),
        1,
        "expected 1 miss before the entry existed"
    );
    assert_eq!(
        counter_total(&snapshot, telemetry::SEARCH_CACHE_HITS_TOTAL),
        2,
        "expected 2 fresh hits"
    );
}

#[test]
fn budget_denial_records_counter() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        let budget = ProviderBudget::new("p1", 1);
        assert!(budget.try_consume(now_ms()));
        assert!(!budget.try_consume(now_ms()));
        assert!(!budget.try_consume(now_ms()));
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::BUDGET_DENIED_TOTAL), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn revalidation_claims_count_only_winners() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let store = RegistryStore::in_memory().await.unwrap();
                let cache = SearchCache::new(store, SearchCacheConfig::new());
                assert!(cache.try_claim_revalidation("q1"));
                assert!(!cache.try_claim_revalidation("q1"));
                cache.release_revalidation("q1");
                assert!(cache.try_claim_revalidation("q1"));
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::REVALIDATIONS_TOTAL), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn live_search_records_provider_and_search_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let agg = aggregator().await;
                let response = agg.search(&SearchOptions::browse()).await;
                assert_eq!(response.servers.len(), 1);
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::SEARCHES_TOTAL), 1);
    assert_eq!(
        counter_total(&snapshot, telemetry::PROVIDER_REQUESTS_TOTAL),
        1
    );
    assert!(
        has_histogram(&snapshot, telemetry::PROVIDER_REQUEST_DURATION_SECONDS),
        "expected a duration histogram entry"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn sync_cycle_records_cycle_and_registry_outcomes() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let agg = aggregator().await;
                let report = agg.run_sync_cycle().await;
                assert_eq!(report.synced, 1);
                // Fresh on the second pass, so the outcome is a skip.
                let report = agg.run_sync_cycle().await;
                assert_eq!(report.skipped, 1);
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::SYNC_CYCLES_TOTAL), 2);
    assert_eq!(
        counter_total(&snapshot, telemetry::REGISTRY_SYNCS_TOTAL),
        2,
        "one ok outcome and one skipped outcome"
    );
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let agg = aggregator().await;
    let response = agg.search(&SearchOptions::browse()).await;
    assert_eq!(response.servers.len(), 1);
}
