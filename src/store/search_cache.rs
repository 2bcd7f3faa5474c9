//! Search-cache table operations.

use tracing::warn;

use crate::error::Result;
use crate::freshness::now_ms;

use super::RegistryStore;
use super::rows::{SearchCacheRow, encode_string_list};

/// One persisted search result: the ordered id list for a query hash plus
/// its freshness window and hit counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCacheEntry {
    /// SHA-256 hex of the canonical normalized options.
    pub query_hash: String,
    /// Matching record ids, in result order.
    pub server_ids: Vec<String>,
    /// Total matches before paging.
    pub total_count: i64,
    /// Whether more pages existed.
    pub has_more: bool,
    /// When this entry was created or last refreshed, epoch ms.
    pub created_at_ms: i64,
    /// When this entry stops counting as present, epoch ms.
    pub expires_at_ms: i64,
    /// Times this entry has been served.
    pub hit_count: i64,
}

impl SearchCacheEntry {
    /// The TTL window this entry was written with.
    pub fn ttl_ms(&self) -> i64 {
        (self.expires_at_ms - self.created_at_ms).max(0)
    }
}

impl RegistryStore {
    /// Look up a cache entry by query hash.
    pub async fn get_search_entry(&self, query_hash: &str) -> Option<SearchCacheEntry> {
        let pool = self.pool()?;
        match sqlx::query_as::<_, SearchCacheRow>(
            "SELECT query_hash, server_ids, total_count, has_more, created_at, expires_at, \
             hit_count FROM search_cache WHERE query_hash = ?",
        )
        .bind(query_hash)
        .fetch_optional(pool)
        .await
        {
            Ok(row) => row.map(SearchCacheRow::into_entry),
            Err(e) => {
                warn!(query_hash, error = %e, "search cache lookup failed");
                None
            }
        }
    }

    /// Write (or refresh) the entry for `query_hash` with a new TTL window.
    ///
    /// A refresh restarts the entry's life: creation time moves to `now`
    /// and the hit counter resets.
    pub async fn put_search_entry(
        &self,
        query_hash: &str,
        server_ids: &[String],
        total_count: i64,
        has_more: bool,
        ttl_ms: i64,
    ) -> Result<()> {
        let Some(pool) = self.pool() else {
            return Ok(());
        };
        let now = now_ms();
        sqlx::query(
            r#"
            INSERT INTO search_cache (
                query_hash, server_ids, total_count, has_more, created_at, expires_at, hit_count
            )
            VALUES (?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(query_hash) DO UPDATE SET
                server_ids = excluded.server_ids,
                total_count = excluded.total_count,
                has_more = excluded.has_more,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at,
                hit_count = 0
            "#,
        )
        .bind(query_hash)
        .bind(encode_string_list(server_ids))
        .bind(total_count)
        .bind(has_more)
        .bind(now)
        .bind(now + ttl_ms.max(0))
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Increment an entry's hit counter; best-effort.
    pub async fn bump_search_hit(&self, query_hash: &str) {
        let Some(pool) = self.pool() else {
            return;
        };
        if let Err(e) = sqlx::query(
            "UPDATE search_cache SET hit_count = hit_count + 1 WHERE query_hash = ?",
        )
        .bind(query_hash)
        .execute(pool)
        .await
        {
            warn!(query_hash, error = %e, "hit counter update failed");
        }
    }

    /// Drop expired entries, then trim oldest-created entries beyond
    /// `max_entries`. Returns the number of rows removed.
    pub async fn prune_search_cache(&self, max_entries: i64) -> Result<u64> {
        let Some(pool) = self.pool() else {
            return Ok(0);
        };
        let expired = sqlx::query("DELETE FROM search_cache WHERE expires_at <= ?")
            .bind(now_ms())
            .execute(pool)
            .await?
            .rows_affected();

        let live: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM search_cache")
            .fetch_one(pool)
            .await?;
        let overflow = (live - max_entries).max(0);
        let mut trimmed = 0;
        if overflow > 0 {
            trimmed = sqlx::query(
                "DELETE FROM search_cache WHERE query_hash IN \
                 (SELECT query_hash FROM search_cache ORDER BY created_at ASC LIMIT ?)",
            )
            .bind(overflow)
            .execute(pool)
            .await?
            .rows_affected();
        }
        Ok(expired + trimmed)
    }

    /// Live entry count.
    pub async fn count_search_entries(&self) -> i64 {
        let Some(pool) = self.pool() else {
            return 0;
        };
        match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM search_cache")
            .fetch_one(pool)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "search cache count failed");
                0
            }
        }
    }

    /// Drop every cache entry. Administrative; propagates store failures.
    pub async fn clear_search_cache(&self) -> Result<()> {
        let Some(pool) = self.pool() else {
            return Ok(());
        };
        sqlx::query("DELETE FROM search_cache").execute(pool).await?;
        Ok(())
    }
}
