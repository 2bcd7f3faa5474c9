//! Integration tests for per-(server, metric) fetch bookkeeping — success
//! and error write paths, retry accounting, and the backoff schedule.

use muninn::store::RegistryStore;
use muninn::types::{MetricKind, MetricState};

async fn store() -> RegistryStore {
    RegistryStore::in_memory().await.expect("in-memory store")
}

#[tokio::test]
async fn unknown_pair_has_no_status() {
    let store = store().await;
    assert!(
        store
            .get_metric_status("srv", MetricKind::GithubStars)
            .await
            .is_none()
    );
}

#[tokio::test]
async fn metrics_for_one_server_are_tracked_independently() {
    let store = store().await;
    store
        .record_metric_success("srv", MetricKind::GithubStars, Some(10), None, 1_000)
        .await
        .unwrap();
    store
        .record_metric_error("srv", MetricKind::NpmDownloads, "http_500", "boom", 2_000, false)
        .await
        .unwrap();

    let stars = store.get_metric_status("srv", MetricKind::GithubStars).await.unwrap();
    assert_eq!(stars.status, MetricState::Success);
    assert_eq!(stars.value, Some(10));

    let downloads = store.get_metric_status("srv", MetricKind::NpmDownloads).await.unwrap();
    assert_eq!(downloads.status, MetricState::Error);
    assert!(downloads.value.is_none());
}

#[tokio::test]
async fn success_records_value_schedule_and_etag() {
    let store = store().await;
    store
        .record_metric_success("srv", MetricKind::GithubStars, Some(321), Some("W/\"abc\""), 9_999)
        .await
        .unwrap();

    let status = store.get_metric_status("srv", MetricKind::GithubStars).await.unwrap();
    assert_eq!(status.server_id, "srv");
    assert_eq!(status.kind, MetricKind::GithubStars);
    assert_eq!(status.status, MetricState::Success);
    assert_eq!(status.value, Some(321));
    assert_eq!(status.etag.as_deref(), Some("W/\"abc\""));
    assert_eq!(status.next_update_at_ms, Some(9_999));
    assert_eq!(status.retry_count, 0);
    assert!(status.last_attempt_at_ms.is_some());
    assert_eq!(status.last_attempt_at_ms, status.last_success_at_ms);
    assert!(status.error_code.is_none());
    assert!(status.error_message.is_none());
}

#[tokio::test]
async fn not_modified_success_keeps_value_and_etag() {
    let store = store().await;
    store
        .record_metric_success("srv", MetricKind::GithubStars, Some(321), Some("W/\"abc\""), 1_000)
        .await
        .unwrap();

    // 304 path: no new value, no new etag, schedule extends anyway.
    store
        .record_metric_success("srv", MetricKind::GithubStars, None, None, 5_000)
        .await
        .unwrap();

    let status = store.get_metric_status("srv", MetricKind::GithubStars).await.unwrap();
    assert_eq!(status.value, Some(321));
    assert_eq!(status.etag.as_deref(), Some("W/\"abc\""));
    assert_eq!(status.next_update_at_ms, Some(5_000));
}

#[tokio::test]
async fn new_etag_replaces_stored_one() {
    let store = store().await;
    store
        .record_metric_success("srv", MetricKind::GithubStars, Some(1), Some("W/\"v1\""), 1_000)
        .await
        .unwrap();
    store
        .record_metric_success("srv", MetricKind::GithubStars, Some(2), Some("W/\"v2\""), 2_000)
        .await
        .unwrap();

    let status = store.get_metric_status("srv", MetricKind::GithubStars).await.unwrap();
    assert_eq!(status.value, Some(2));
    assert_eq!(status.etag.as_deref(), Some("W/\"v2\""));
}

#[tokio::test]
async fn errors_accumulate_retries_until_success() {
    let store = store().await;
    for attempt in 1..=3 {
        store
            .record_metric_error("srv", MetricKind::NpmDownloads, "http_500", "boom", 1_000, false)
            .await
            .unwrap();
        let status = store.get_metric_status("srv", MetricKind::NpmDownloads).await.unwrap();
        assert_eq!(status.retry_count, attempt);
        assert_eq!(status.error_code.as_deref(), Some("http_500"));
        assert_eq!(status.error_message.as_deref(), Some("boom"));
    }

    store
        .record_metric_success("srv", MetricKind::NpmDownloads, Some(7), None, 2_000)
        .await
        .unwrap();
    let status = store.get_metric_status("srv", MetricKind::NpmDownloads).await.unwrap();
    assert_eq!(status.retry_count, 0);
    assert!(status.error_code.is_none());
}

#[tokio::test]
async fn error_keeps_last_success_and_value() {
    let store = store().await;
    store
        .record_metric_success("srv", MetricKind::GithubStars, Some(55), None, 1_000)
        .await
        .unwrap();
    let success_at = store
        .get_metric_status("srv", MetricKind::GithubStars)
        .await
        .unwrap()
        .last_success_at_ms;

    store
        .record_metric_error("srv", MetricKind::GithubStars, "http_503", "flaky", 3_000, false)
        .await
        .unwrap();

    let status = store.get_metric_status("srv", MetricKind::GithubStars).await.unwrap();
    assert_eq!(status.status, MetricState::Error);
    assert_eq!(status.value, Some(55), "stored value survives a failed refresh");
    assert_eq!(status.last_success_at_ms, success_at);
}

#[tokio::test]
async fn error_schedule_never_moves_backwards() {
    let store = store().await;
    store
        .record_metric_error("srv", MetricKind::GithubStars, "http_500", "a", 10_000, false)
        .await
        .unwrap();

    // A shorter backoff from a later attempt cannot shrink the schedule.
    store
        .record_metric_error("srv", MetricKind::GithubStars, "http_500", "b", 4_000, false)
        .await
        .unwrap();
    let status = store.get_metric_status("srv", MetricKind::GithubStars).await.unwrap();
    assert_eq!(status.next_update_at_ms, Some(10_000));

    // A longer one extends it.
    store
        .record_metric_error("srv", MetricKind::GithubStars, "http_500", "c", 20_000, false)
        .await
        .unwrap();
    let status = store.get_metric_status("srv", MetricKind::GithubStars).await.unwrap();
    assert_eq!(status.next_update_at_ms, Some(20_000));
}

#[tokio::test]
async fn provider_reset_overrides_the_ratchet() {
    let store = store().await;
    store
        .record_metric_error("srv", MetricKind::GithubStars, "http_500", "a", 50_000, false)
        .await
        .unwrap();

    // A rate-limit reset time wins even when earlier than the backoff.
    store
        .record_metric_error("srv", MetricKind::GithubStars, "rate_limited", "429", 8_000, true)
        .await
        .unwrap();

    let status = store.get_metric_status("srv", MetricKind::GithubStars).await.unwrap();
    assert_eq!(status.next_update_at_ms, Some(8_000));
    assert_eq!(status.error_code.as_deref(), Some("rate_limited"));
}

#[tokio::test]
async fn success_schedule_is_taken_verbatim() {
    let store = store().await;
    store
        .record_metric_error("srv", MetricKind::GithubStars, "http_500", "a", 50_000, false)
        .await
        .unwrap();

    // The success path trusts its schedule; the error ratchet does not apply.
    store
        .record_metric_success("srv", MetricKind::GithubStars, Some(1), None, 2_000)
        .await
        .unwrap();
    let status = store.get_metric_status("srv", MetricKind::GithubStars).await.unwrap();
    assert_eq!(status.next_update_at_ms, Some(2_000));
}

#[tokio::test]
async fn disabled_store_swallows_metric_writes() {
    let store = RegistryStore::disabled();
    store
        .record_metric_success("srv", MetricKind::GithubStars, Some(1), None, 1_000)
        .await
        .unwrap();
    store
        .record_metric_error("srv", MetricKind::GithubStars, "x", "y", 1_000, false)
        .await
        .unwrap();
    assert!(store.get_metric_status("srv", MetricKind::GithubStars).await.is_none());
}
