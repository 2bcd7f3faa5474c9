//! Persistent SQLite store for the catalog engine.
//!
//! [`RegistryStore`] owns the connection pool and the five tables: server
//! records, search-cache entries, per-registry sync status, per-metric
//! status, and performance samples. Operations live in per-table modules;
//! typed row structs with converters at the boundary are in [`rows`].
//!
//! # Degraded mode
//!
//! A store that could not be opened is a permanent, non-error state. Reads
//! return empty/`None`, writes become no-ops, and the engine above keeps
//! serving best-effort results from upstream. [`RegistryStore::open`]
//! therefore never fails — it logs and hands back a degraded instance.
//! Administrative operations still propagate genuine query failures from an
//! otherwise healthy store; those are explicit operator actions.

mod metric_status;
mod perf;
mod rows;
mod search_cache;
mod servers;
mod sync_status;

pub use search_cache::SearchCacheEntry;

use std::path::{Path, PathBuf};

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::{debug, warn};

use crate::error::Result;

/// Default on-disk database location: `<data dir>/muninn/registry.db`.
pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("muninn")
        .join("registry.db")
}

/// SQLite-backed store with first-class degraded mode.
///
/// Cheap to clone; clones share one pool.
#[derive(Clone)]
pub struct RegistryStore {
    pool: Option<SqlitePool>,
}

impl RegistryStore {
    /// Open (or create) the database at `path`.
    ///
    /// Never fails: any setup error is logged and yields a degraded store.
    pub async fn open(path: &Path) -> Self {
        match Self::try_open(path).await {
            Ok(store) => store,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "store unavailable, running degraded");
                Self { pool: None }
            }
        }
    }

    async fn try_open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| crate::MuninnError::Store(e.to_string()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await?;
        create_schema(&pool).await?;
        debug!(path = %path.display(), "store opened");
        Ok(Self { pool: Some(pool) })
    }

    /// Fresh in-memory database with the full schema; used by tests and the
    /// builder's in-memory mode.
    ///
    /// The pool is pinned to a single connection — every pooled connection
    /// to `:memory:` is otherwise its own empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        create_schema(&pool).await?;
        Ok(Self { pool: Some(pool) })
    }

    /// A store that is permanently degraded (no persistence at all).
    pub fn disabled() -> Self {
        Self { pool: None }
    }

    /// Whether persistence is available.
    pub fn is_available(&self) -> bool {
        self.pool.is_some()
    }

    pub(crate) fn pool(&self) -> Option<&SqlitePool> {
        self.pool.as_ref()
    }
}

/// Create all tables and indexes. Idempotent.
async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS servers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            author TEXT,
            version TEXT,
            homepage TEXT,
            repository_url TEXT,
            package_registry TEXT,
            package_name TEXT,
            install_command TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            category TEXT,
            license TEXT,
            registry TEXT NOT NULL,
            install_count INTEGER,
            rating REAL,
            star_count INTEGER,
            is_active INTEGER NOT NULL DEFAULT 1,
            search_text TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Secondary identity: one active record per package name.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_servers_package_name \
         ON servers(package_name) WHERE package_name IS NOT NULL AND is_active = 1",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_servers_registry ON servers(registry)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_servers_stars ON servers(star_count)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_cache (
            query_hash TEXT PRIMARY KEY,
            server_ids TEXT NOT NULL DEFAULT '[]',
            total_count INTEGER NOT NULL DEFAULT 0,
            has_more INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            hit_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Pruning walks oldest-created-first.
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_search_cache_created ON search_cache(created_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS registry_sync (
            registry TEXT PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'pending',
            last_sync_at INTEGER,
            last_success_at INTEGER,
            next_sync_at INTEGER,
            server_count INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            sync_duration_ms INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metric_status (
            server_id TEXT NOT NULL,
            metric_type TEXT NOT NULL,
            status TEXT NOT NULL,
            last_attempt_at INTEGER,
            last_success_at INTEGER,
            next_update_at INTEGER,
            value INTEGER,
            retry_count INTEGER NOT NULL DEFAULT 0,
            error_code TEXT,
            error_message TEXT,
            etag TEXT,
            PRIMARY KEY (server_id, metric_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS perf_samples (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recorded_at INTEGER NOT NULL,
            duration_ms INTEGER NOT NULL,
            cache_hit INTEGER NOT NULL,
            result_count INTEGER NOT NULL,
            error_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
