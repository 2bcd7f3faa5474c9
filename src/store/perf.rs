//! Performance samples and the aggregated stats view.

use tracing::warn;

use crate::freshness::now_ms;
use crate::types::CacheStats;

use super::RegistryStore;

/// Samples retained for the rolling stats window; older rows are pruned on
/// insert so a long-lived process doesn't grow the table unboundedly.
const MAX_PERF_SAMPLES: i64 = 1_000;

impl RegistryStore {
    /// Record one search's performance sample; best-effort.
    pub async fn record_perf_sample(
        &self,
        duration_ms: i64,
        cache_hit: bool,
        result_count: i64,
        error_count: i64,
    ) {
        let Some(pool) = self.pool() else {
            return;
        };
        let insert = sqlx::query(
            "INSERT INTO perf_samples (recorded_at, duration_ms, cache_hit, result_count, \
             error_count) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(now_ms())
        .bind(duration_ms)
        .bind(cache_hit)
        .bind(result_count)
        .bind(error_count)
        .execute(pool)
        .await;
        if let Err(e) = insert {
            warn!(error = %e, "perf sample insert failed");
            return;
        }

        let prune = sqlx::query(
            "DELETE FROM perf_samples WHERE id NOT IN \
             (SELECT id FROM perf_samples ORDER BY id DESC LIMIT ?)",
        )
        .bind(MAX_PERF_SAMPLES)
        .execute(pool)
        .await;
        if let Err(e) = prune {
            warn!(error = %e, "perf sample prune failed");
        }
    }

    /// Aggregated store and performance statistics.
    ///
    /// Degrades to an all-zero view; each sub-query degrades independently
    /// so one failure doesn't blank the rest.
    pub async fn stats(&self) -> CacheStats {
        let Some(pool) = self.pool() else {
            return CacheStats::default();
        };
        let mut stats = CacheStats::default();

        match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM servers WHERE is_active = 1")
            .fetch_one(pool)
            .await
        {
            Ok(total) => stats.total_servers = total,
            Err(e) => warn!(error = %e, "server count failed"),
        }

        match sqlx::query_as::<_, (String, i64)>(
            "SELECT registry, COUNT(*) FROM servers WHERE is_active = 1 GROUP BY registry",
        )
        .fetch_all(pool)
        .await
        {
            Ok(rows) => stats.servers_by_registry = rows.into_iter().collect(),
            Err(e) => warn!(error = %e, "per-registry count failed"),
        }

        stats.cache_entries = self.count_search_entries().await;

        match sqlx::query_as::<_, (Option<f64>, Option<f64>)>(
            "SELECT AVG(duration_ms), AVG(cache_hit) FROM perf_samples",
        )
        .fetch_one(pool)
        .await
        {
            Ok((avg_duration, hit_rate)) => {
                stats.average_response_time_ms = avg_duration.unwrap_or(0.0);
                stats.cache_hit_rate = hit_rate.unwrap_or(0.0);
            }
            Err(e) => warn!(error = %e, "perf aggregate failed"),
        }

        match sqlx::query_as::<_, (Option<i64>, Option<i64>)>(
            "SELECT MIN(created_at), MAX(updated_at) FROM servers WHERE is_active = 1",
        )
        .fetch_one(pool)
        .await
        {
            Ok((oldest, newest)) => {
                stats.oldest_entry_ms = oldest;
                stats.newest_entry_ms = newest;
            }
            Err(e) => warn!(error = %e, "entry age aggregate failed"),
        }

        stats
    }
}
