//! Integration tests for [`RegistryStore`] server-record operations —
//! upsert semantics, lookups, search filtering, and degraded mode.

use std::time::Duration;

use muninn::store::RegistryStore;
use muninn::types::{MetricKind, PackageRegistry, SearchOptions, ServerRecord, SortBy, SortOrder};

fn record(id: &str, name: &str) -> ServerRecord {
    ServerRecord::new(id, name, "pulse")
        .with_description("test server")
        .with_package(PackageRegistry::Npm, format!("pkg-{id}"))
}

async fn store() -> RegistryStore {
    RegistryStore::in_memory().await.expect("in-memory store")
}

// =============================================================================
// Upsert semantics
// =============================================================================

#[tokio::test]
async fn upsert_then_get_round_trips_all_fields() {
    let store = store().await;

    let mut original = ServerRecord::new("srv-1", "Weather", "pulse")
        .with_description("weather lookups")
        .with_author("acme")
        .with_repository_url("https://github.com/acme/weather")
        .with_package(PackageRegistry::Npm, "@acme/weather")
        .with_tag("weather")
        .with_tag("api")
        .with_category("tools");
    original.version = Some("1.2.0".into());
    original.homepage = Some("https://acme.dev/weather".into());
    original.license = Some("MIT".into());
    original.install_count = Some(5_000);
    original.rating = Some(4.5);
    original.star_count = Some(321);

    store.upsert_server(&original).await.unwrap();

    let fetched = store.get_server("srv-1").await.expect("record present");
    assert_eq!(fetched.name, "Weather");
    assert_eq!(fetched.description, "weather lookups");
    assert_eq!(fetched.author.as_deref(), Some("acme"));
    assert_eq!(fetched.version.as_deref(), Some("1.2.0"));
    assert_eq!(fetched.homepage.as_deref(), Some("https://acme.dev/weather"));
    assert_eq!(
        fetched.repository_url.as_deref(),
        Some("https://github.com/acme/weather")
    );
    assert_eq!(fetched.package_registry, Some(PackageRegistry::Npm));
    assert_eq!(fetched.package_name.as_deref(), Some("@acme/weather"));
    assert_eq!(fetched.tags, vec!["weather", "api"]);
    assert_eq!(fetched.category.as_deref(), Some("tools"));
    assert_eq!(fetched.license.as_deref(), Some("MIT"));
    assert_eq!(fetched.registry, "pulse");
    assert_eq!(fetched.install_count, Some(5_000));
    assert_eq!(fetched.rating, Some(4.5));
    assert_eq!(fetched.star_count, Some(321));
    assert!(fetched.is_active);
    assert!(fetched.created_at_ms > 0);
    assert!(fetched.updated_at_ms >= fetched.created_at_ms);
}

#[tokio::test]
async fn reupsert_without_popularity_keeps_enriched_values() {
    let store = store().await;

    let mut enriched = record("srv-1", "Weather");
    enriched.star_count = Some(900);
    enriched.install_count = Some(40_000);
    store.upsert_server(&enriched).await.unwrap();

    // A later catalog page knows nothing about popularity.
    let mut page_copy = record("srv-1", "Weather v2");
    page_copy.star_count = None;
    page_copy.install_count = None;
    store.upsert_server(&page_copy).await.unwrap();

    let fetched = store.get_server("srv-1").await.unwrap();
    assert_eq!(fetched.name, "Weather v2");
    assert_eq!(fetched.star_count, Some(900));
    assert_eq!(fetched.install_count, Some(40_000));
}

#[tokio::test]
async fn reupsert_preserves_created_at() {
    let store = store().await;

    store.upsert_server(&record("srv-1", "first")).await.unwrap();
    let first = store.get_server("srv-1").await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    store.upsert_server(&record("srv-1", "second")).await.unwrap();
    let second = store.get_server("srv-1").await.unwrap();

    assert_eq!(second.created_at_ms, first.created_at_ms);
    assert!(second.updated_at_ms > first.updated_at_ms);
}

#[tokio::test]
async fn active_package_name_is_unique() {
    let store = store().await;

    let a = ServerRecord::new("a", "first", "pulse").with_package(PackageRegistry::Npm, "shared");
    let b =
        ServerRecord::new("b", "second", "mcp_registry").with_package(PackageRegistry::Npm, "shared");

    store.upsert_server(&a).await.unwrap();
    let err = store.upsert_server(&b).await.unwrap_err();
    assert!(
        matches!(err, muninn::MuninnError::Conflict(_)),
        "expected Conflict, got {err:?}"
    );
}

#[tokio::test]
async fn inactive_records_release_their_package_name() {
    let store = store().await;

    let mut a = ServerRecord::new("a", "first", "pulse").with_package(PackageRegistry::Npm, "shared");
    a.is_active = false;
    store.upsert_server(&a).await.unwrap();

    // The partial index only covers active rows, so "b" can claim the name.
    let b = ServerRecord::new("b", "second", "pulse").with_package(PackageRegistry::Npm, "shared");
    store.upsert_server(&b).await.unwrap();

    let holder = store.get_server_by_package_name("shared").await.unwrap();
    assert_eq!(holder.id, "b");
}

#[tokio::test]
async fn update_by_package_name_rewrites_existing_row() {
    let store = store().await;

    let original =
        ServerRecord::new("a", "old name", "pulse").with_package(PackageRegistry::Npm, "shared");
    store.upsert_server(&original).await.unwrap();

    let replacement = ServerRecord::new("ignored-id", "new name", "mcp_registry")
        .with_package(PackageRegistry::Npm, "shared")
        .with_description("rewritten");
    let updated = store.update_server_by_package_name(&replacement).await.unwrap();
    assert_eq!(updated, 1);

    // The row keeps its id but takes everything else.
    let fetched = store.get_server("a").await.unwrap();
    assert_eq!(fetched.name, "new name");
    assert_eq!(fetched.registry, "mcp_registry");
    assert_eq!(fetched.description, "rewritten");
    assert!(store.get_server("ignored-id").await.is_none());
}

#[tokio::test]
async fn update_by_package_name_misses_return_zero() {
    let store = store().await;
    let replacement =
        ServerRecord::new("x", "x", "pulse").with_package(PackageRegistry::Npm, "nobody-has-this");
    assert_eq!(store.update_server_by_package_name(&replacement).await.unwrap(), 0);

    let no_package = ServerRecord::new("y", "y", "pulse");
    assert_eq!(store.update_server_by_package_name(&no_package).await.unwrap(), 0);
}

#[tokio::test]
async fn popularity_updates_route_by_metric() {
    let store = store().await;
    store.upsert_server(&record("srv-1", "Weather")).await.unwrap();

    assert!(
        store
            .update_server_popularity("srv-1", MetricKind::GithubStars, 777)
            .await
            .unwrap()
    );
    assert!(
        store
            .update_server_popularity("srv-1", MetricKind::NpmDownloads, 12_000)
            .await
            .unwrap()
    );
    // Unknown id changes nothing.
    assert!(
        !store
            .update_server_popularity("ghost", MetricKind::GithubStars, 1)
            .await
            .unwrap()
    );

    let fetched = store.get_server("srv-1").await.unwrap();
    assert_eq!(fetched.star_count, Some(777));
    assert_eq!(fetched.install_count, Some(12_000));
}

// =============================================================================
// Lookups
// =============================================================================

#[tokio::test]
async fn get_servers_preserves_order_and_omits_missing() {
    let store = store().await;
    for id in ["a", "b", "c"] {
        store.upsert_server(&record(id, id)).await.unwrap();
    }

    let ids = vec!["c".to_string(), "ghost".to_string(), "a".to_string()];
    let fetched = store.get_servers(&ids).await;
    let got: Vec<&str> = fetched.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(got, vec!["c", "a"]);

    assert!(store.get_servers(&[]).await.is_empty());
}

#[tokio::test]
async fn registry_scan_excludes_inactive_and_other_registries() {
    let store = store().await;
    store.upsert_server(&record("a", "alpha")).await.unwrap();

    let mut inactive = record("b", "beta");
    inactive.is_active = false;
    store.upsert_server(&inactive).await.unwrap();

    let mut other = record("c", "gamma");
    other.registry = "mcp_registry".into();
    store.upsert_server(&other).await.unwrap();

    let pulse = store.get_servers_by_registry("pulse", None).await;
    let ids: Vec<&str> = pulse.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["a"]);
}

#[tokio::test]
async fn registry_scan_honors_max_age() {
    let store = store().await;
    store.upsert_server(&record("a", "alpha")).await.unwrap();

    // Recent enough under a generous window.
    assert_eq!(store.get_servers_by_registry("pulse", Some(60_000)).await.len(), 1);

    // Let the record age past a tiny window.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.get_servers_by_registry("pulse", Some(10)).await.is_empty());
}

// =============================================================================
// Search
// =============================================================================

#[tokio::test]
async fn search_matches_query_against_derived_text() {
    let store = store().await;
    store
        .upsert_server(&record("a", "Weather Service").with_description("forecast lookups"))
        .await
        .unwrap();
    store
        .upsert_server(&record("b", "Wallet").with_description("payments"))
        .await
        .unwrap();

    let (hits, total) = store
        .search_servers(&SearchOptions::with_query("forecast"))
        .await;
    assert_eq!(total, 1);
    assert_eq!(hits[0].id, "a");

    // Query text is matched case-insensitively via normalization.
    let (hits, _) = store
        .search_servers(&SearchOptions::with_query("WEATHER"))
        .await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "a");
}

#[tokio::test]
async fn search_requires_every_tag() {
    let store = store().await;
    store
        .upsert_server(&record("a", "alpha").with_tag("iot").with_tag("api"))
        .await
        .unwrap();
    store
        .upsert_server(&record("b", "beta").with_tag("iot"))
        .await
        .unwrap();

    let both = SearchOptions {
        tags: vec!["iot".into(), "api".into()],
        ..SearchOptions::default()
    };
    let (hits, total) = store.search_servers(&both).await;
    assert_eq!(total, 1);
    assert_eq!(hits[0].id, "a");
}

#[tokio::test]
async fn search_category_matches_column_then_tags() {
    let store = store().await;
    store
        .upsert_server(&record("a", "alpha").with_category("Tools"))
        .await
        .unwrap();
    store
        .upsert_server(&record("b", "beta").with_tag("tools"))
        .await
        .unwrap();
    store.upsert_server(&record("c", "gamma")).await.unwrap();

    let options = SearchOptions {
        category: Some("tools".into()),
        sort_by: SortBy::Name,
        sort_order: SortOrder::Asc,
        ..SearchOptions::default()
    };
    let (hits, total) = store.search_servers(&options).await;
    assert_eq!(total, 2);
    let ids: Vec<&str> = hits.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn search_author_filter_is_exact_case_insensitive() {
    let store = store().await;
    store
        .upsert_server(&record("a", "alpha").with_author("Acme"))
        .await
        .unwrap();
    store
        .upsert_server(&record("b", "beta").with_author("acme-labs"))
        .await
        .unwrap();

    let options = SearchOptions {
        author: Some("ACME".into()),
        ..SearchOptions::default()
    };
    let (hits, total) = store.search_servers(&options).await;
    assert_eq!(total, 1);
    assert_eq!(hits[0].id, "a");
}

#[tokio::test]
async fn search_escapes_like_metacharacters() {
    let store = store().await;
    store
        .upsert_server(&record("a", "literal").with_description("100%_done"))
        .await
        .unwrap();
    store
        .upsert_server(&record("b", "decoy").with_description("100X done"))
        .await
        .unwrap();

    // Unescaped, "%" and "_" would also match the decoy.
    let (hits, total) = store
        .search_servers(&SearchOptions::with_query("100%_done"))
        .await;
    assert_eq!(total, 1);
    assert_eq!(hits[0].id, "a");
}

#[tokio::test]
async fn search_pages_with_stable_totals() {
    let store = store().await;
    for (id, stars) in [("a", 30), ("b", 20), ("c", 10)] {
        let mut r = record(id, id);
        r.star_count = Some(stars);
        store.upsert_server(&r).await.unwrap();
    }

    let page1 = SearchOptions {
        limit: 2,
        ..SearchOptions::default()
    };
    let (hits, total) = store.search_servers(&page1).await;
    assert_eq!(total, 3);
    let ids: Vec<&str> = hits.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);

    let page2 = SearchOptions {
        limit: 2,
        offset: 2,
        ..SearchOptions::default()
    };
    let (hits, total) = store.search_servers(&page2).await;
    assert_eq!(total, 3);
    assert_eq!(hits[0].id, "c");
}

#[tokio::test]
async fn search_excludes_inactive() {
    let store = store().await;
    let mut hidden = record("a", "alpha");
    hidden.is_active = false;
    store.upsert_server(&hidden).await.unwrap();

    let (hits, total) = store.search_servers(&SearchOptions::browse()).await;
    assert!(hits.is_empty());
    assert_eq!(total, 0);
}

// =============================================================================
// Enrichment candidates
// =============================================================================

#[tokio::test]
async fn enrichment_candidates_prefer_packages_then_repos_then_oldest() {
    let store = store().await;

    let mut repo_only = ServerRecord::new("repo", "repo", "pulse")
        .with_repository_url("https://github.com/acme/repo");
    repo_only.star_count = None;
    store.upsert_server(&repo_only).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let bare = ServerRecord::new("bare", "bare", "pulse");
    store.upsert_server(&bare).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    store.upsert_server(&record("pkg", "pkg")).await.unwrap();

    // A fully enriched record is not a candidate at all.
    let mut done = record("done", "done");
    done.star_count = Some(10);
    done.install_count = Some(10);
    store.upsert_server(&done).await.unwrap();

    let candidates = store.enrichment_candidates(10).await;
    let ids: Vec<&str> = candidates.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["pkg", "repo", "bare"]);

    let capped = store.enrichment_candidates(1).await;
    assert_eq!(capped.len(), 1);
    assert_eq!(capped[0].id, "pkg");
}

// =============================================================================
// Administration and stats
// =============================================================================

#[tokio::test]
async fn clear_registry_only_touches_one_registry() {
    let store = store().await;
    store.upsert_server(&record("a", "alpha")).await.unwrap();
    let mut other = ServerRecord::new("b", "beta", "mcp_registry");
    other.package_registry = Some(PackageRegistry::Npm);
    other.package_name = Some("pkg-b".into());
    store.upsert_server(&other).await.unwrap();

    let removed = store.clear_registry("pulse").await.unwrap();
    assert_eq!(removed, 1);
    assert!(store.get_server("a").await.is_none());
    assert!(store.get_server("b").await.is_some());
}

#[tokio::test]
async fn stats_aggregate_counts_and_perf() {
    let store = store().await;
    store.upsert_server(&record("a", "alpha")).await.unwrap();
    let mut other = ServerRecord::new("b", "beta", "mcp_registry");
    store.upsert_server(&other.clone()).await.unwrap();
    other.is_active = false;
    other.id = "c".into();
    store.upsert_server(&other).await.unwrap();

    store.record_perf_sample(10, true, 5, 0).await;
    store.record_perf_sample(30, false, 2, 0).await;

    let stats = store.stats().await;
    assert_eq!(stats.total_servers, 2);
    assert_eq!(stats.servers_by_registry.get("pulse"), Some(&1));
    assert_eq!(stats.servers_by_registry.get("mcp_registry"), Some(&1));
    assert!((stats.average_response_time_ms - 20.0).abs() < f64::EPSILON);
    assert!((stats.cache_hit_rate - 0.5).abs() < f64::EPSILON);
    assert!(stats.oldest_entry_ms.is_some());
    assert!(stats.newest_entry_ms.is_some());
}

// =============================================================================
// Degraded mode
// =============================================================================

#[tokio::test]
async fn disabled_store_degrades_every_operation() {
    let store = RegistryStore::disabled();
    assert!(!store.is_available());

    // Writes are accepted no-ops, reads are empty, admin ops succeed.
    store.upsert_server(&record("a", "alpha")).await.unwrap();
    assert!(store.get_server("a").await.is_none());
    assert!(store.get_servers(&["a".to_string()]).await.is_empty());
    assert!(store.get_server_by_package_name("pkg-a").await.is_none());
    assert!(store.get_servers_by_registry("pulse", None).await.is_empty());

    let (hits, total) = store.search_servers(&SearchOptions::browse()).await;
    assert!(hits.is_empty());
    assert_eq!(total, 0);

    assert!(store.enrichment_candidates(10).await.is_empty());
    assert_eq!(store.clear_registry("pulse").await.unwrap(), 0);

    let stats = store.stats().await;
    assert_eq!(stats.total_servers, 0);
    assert_eq!(stats.cache_entries, 0);
}

#[tokio::test]
async fn open_with_unwritable_path_degrades_instead_of_failing() {
    // Parent creation fails (not running as a privileged user in tests),
    // yielding a degraded store rather than an error.
    let store = RegistryStore::open(std::path::Path::new("/proc/no-such-dir/registry.db")).await;
    assert!(!store.is_available());
}

#[tokio::test]
async fn open_on_disk_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.db");

    let store = RegistryStore::open(&path).await;
    assert!(store.is_available());
    store.upsert_server(&record("a", "alpha")).await.unwrap();
    assert!(store.get_server("a").await.is_some());

    // Reopening sees the same data; schema creation is idempotent.
    drop(store);
    let reopened = RegistryStore::open(&path).await;
    assert!(reopened.get_server("a").await.is_some());
}
