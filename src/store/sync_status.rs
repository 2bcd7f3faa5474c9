//! Registry-sync bookkeeping table operations.

use tracing::warn;

use crate::error::Result;
use crate::freshness::now_ms;
use crate::types::{RegistrySyncStatus, SyncDetails, SyncState};

use super::RegistryStore;
use super::rows::RegistrySyncRow;

const SYNC_COLUMNS: &str = "registry, status, last_sync_at, last_success_at, next_sync_at, \
     server_count, error_message, sync_duration_ms";

impl RegistryStore {
    /// Current sync bookkeeping for one registry.
    pub async fn get_sync_status(&self, registry: &str) -> Option<RegistrySyncStatus> {
        let pool = self.pool()?;
        let sql = format!("SELECT {SYNC_COLUMNS} FROM registry_sync WHERE registry = ?");
        match sqlx::query_as::<_, RegistrySyncRow>(&sql)
            .bind(registry)
            .fetch_optional(pool)
            .await
        {
            Ok(row) => row.map(RegistrySyncRow::into_status),
            Err(e) => {
                warn!(registry, error = %e, "sync status lookup failed");
                None
            }
        }
    }

    /// Sync bookkeeping for every registry seen so far.
    pub async fn all_sync_statuses(&self) -> Vec<RegistrySyncStatus> {
        let Some(pool) = self.pool() else {
            return Vec::new();
        };
        let sql = format!("SELECT {SYNC_COLUMNS} FROM registry_sync ORDER BY registry ASC");
        match sqlx::query_as::<_, RegistrySyncRow>(&sql).fetch_all(pool).await {
            Ok(rows) => rows.into_iter().map(RegistrySyncRow::into_status).collect(),
            Err(e) => {
                warn!(error = %e, "sync snapshot failed");
                Vec::new()
            }
        }
    }

    /// Record a sync-state transition.
    ///
    /// Every transition stamps `last_sync_at`; a `Success` transition also
    /// stamps `last_success_at` and clears the error message. Fields absent
    /// from `details` keep their previous values. Administrative; propagates
    /// store failures.
    pub async fn update_sync(
        &self,
        registry: &str,
        state: SyncState,
        details: &SyncDetails,
        next_sync_at_ms: Option<i64>,
    ) -> Result<()> {
        let Some(pool) = self.pool() else {
            return Ok(());
        };
        let now = now_ms();
        let success_at = (state == SyncState::Success).then_some(now);
        let clear_error = state == SyncState::Success;

        sqlx::query(
            r#"
            INSERT INTO registry_sync (
                registry, status, last_sync_at, last_success_at, next_sync_at,
                server_count, error_message, sync_duration_ms
            )
            VALUES (?, ?, ?, ?, ?, COALESCE(?, 0), ?, ?)
            ON CONFLICT(registry) DO UPDATE SET
                status = excluded.status,
                last_sync_at = excluded.last_sync_at,
                last_success_at = COALESCE(excluded.last_success_at, registry_sync.last_success_at),
                next_sync_at = COALESCE(excluded.next_sync_at, registry_sync.next_sync_at),
                server_count = COALESCE(?, registry_sync.server_count),
                error_message = CASE WHEN ? THEN NULL
                                     ELSE COALESCE(excluded.error_message,
                                                   registry_sync.error_message) END,
                sync_duration_ms = COALESCE(excluded.sync_duration_ms,
                                            registry_sync.sync_duration_ms)
            "#,
        )
        .bind(registry)
        .bind(state.as_str())
        .bind(now)
        .bind(success_at)
        .bind(next_sync_at_ms)
        .bind(details.server_count)
        .bind(&details.error_message)
        .bind(details.sync_duration_ms)
        .bind(details.server_count)
        .bind(clear_error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Drop all sync bookkeeping. Administrative; propagates store failures.
    pub async fn clear_sync_statuses(&self) -> Result<()> {
        let Some(pool) = self.pool() else {
            return Ok(());
        };
        sqlx::query("DELETE FROM registry_sync").execute(pool).await?;
        Ok(())
    }
}
