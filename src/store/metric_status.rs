//! Per-(server, metric) fetch bookkeeping.
//!
//! Two write paths, one per outcome. The error path enforces the schedule
//! invariant in SQL: `next_update_at` never moves backwards across
//! consecutive errors unless the provider handed us an explicit reset time
//! (rate-limit responses), which overrides the backoff schedule.

use tracing::warn;

use crate::error::Result;
use crate::freshness::now_ms;
use crate::types::{MetricKind, MetricStatus};

use super::RegistryStore;
use super::rows::MetricStatusRow;

const METRIC_COLUMNS: &str = "server_id, metric_type, status, last_attempt_at, last_success_at, \
     next_update_at, value, retry_count, error_code, error_message, etag";

impl RegistryStore {
    /// Fetch bookkeeping for one (server, metric) pair.
    pub async fn get_metric_status(
        &self,
        server_id: &str,
        kind: MetricKind,
    ) -> Option<MetricStatus> {
        let pool = self.pool()?;
        let sql = format!(
            "SELECT {METRIC_COLUMNS} FROM metric_status WHERE server_id = ? AND metric_type = ?"
        );
        match sqlx::query_as::<_, MetricStatusRow>(&sql)
            .bind(server_id)
            .bind(kind.as_str())
            .fetch_optional(pool)
            .await
        {
            Ok(row) => row.and_then(MetricStatusRow::into_status),
            Err(e) => {
                warn!(server_id, metric = kind.as_str(), error = %e, "metric status lookup failed");
                None
            }
        }
    }

    /// Record a successful fetch.
    ///
    /// `value = None` is the `304 Not Modified` case: freshness extends and
    /// the retry counter resets, but the stored value is untouched. The etag
    /// is replaced when the provider sent a new one, kept otherwise.
    pub async fn record_metric_success(
        &self,
        server_id: &str,
        kind: MetricKind,
        value: Option<i64>,
        etag: Option<&str>,
        next_update_at_ms: i64,
    ) -> Result<()> {
        let Some(pool) = self.pool() else {
            return Ok(());
        };
        let now = now_ms();
        sqlx::query(
            r#"
            INSERT INTO metric_status (
                server_id, metric_type, status, last_attempt_at, last_success_at,
                next_update_at, value, retry_count, error_code, error_message, etag
            )
            VALUES (?, ?, 'success', ?, ?, ?, ?, 0, NULL, NULL, ?)
            ON CONFLICT(server_id, metric_type) DO UPDATE SET
                status = 'success',
                last_attempt_at = excluded.last_attempt_at,
                last_success_at = excluded.last_success_at,
                next_update_at = excluded.next_update_at,
                value = COALESCE(excluded.value, metric_status.value),
                retry_count = 0,
                error_code = NULL,
                error_message = NULL,
                etag = COALESCE(excluded.etag, metric_status.etag)
            "#,
        )
        .bind(server_id)
        .bind(kind.as_str())
        .bind(now)
        .bind(now)
        .bind(next_update_at_ms)
        .bind(value)
        .bind(etag)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record a failed fetch, bumping the retry counter.
    ///
    /// With `provider_reset = false` the schedule only moves forward
    /// (`MAX` against the stored value); with `provider_reset = true` the
    /// provider-supplied time wins outright.
    pub async fn record_metric_error(
        &self,
        server_id: &str,
        kind: MetricKind,
        error_code: &str,
        error_message: &str,
        next_update_at_ms: i64,
        provider_reset: bool,
    ) -> Result<()> {
        let Some(pool) = self.pool() else {
            return Ok(());
        };
        let now = now_ms();
        sqlx::query(
            r#"
            INSERT INTO metric_status (
                server_id, metric_type, status, last_attempt_at, last_success_at,
                next_update_at, value, retry_count, error_code, error_message, etag
            )
            VALUES (?, ?, 'error', ?, NULL, ?, NULL, 1, ?, ?, NULL)
            ON CONFLICT(server_id, metric_type) DO UPDATE SET
                status = 'error',
                last_attempt_at = excluded.last_attempt_at,
                next_update_at = CASE WHEN ?
                    THEN excluded.next_update_at
                    ELSE MAX(COALESCE(metric_status.next_update_at, 0),
                             excluded.next_update_at) END,
                retry_count = metric_status.retry_count + 1,
                error_code = excluded.error_code,
                error_message = excluded.error_message
            "#,
        )
        .bind(server_id)
        .bind(kind.as_str())
        .bind(now)
        .bind(next_update_at_ms)
        .bind(error_code)
        .bind(error_message)
        .bind(provider_reset)
        .execute(pool)
        .await?;
        Ok(())
    }
}
