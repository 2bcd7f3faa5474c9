//! Server-record table operations.
//!
//! Writes key on `id` with update-on-conflict; a violation of the partial
//! unique index on active `package_name` surfaces as
//! [`MuninnError::Conflict`](crate::MuninnError::Conflict) for the record
//! cache to resolve with a targeted update. Reads degrade to empty when the
//! store is unavailable.

use std::collections::HashMap;

use tracing::warn;

use crate::error::Result;
use crate::freshness::now_ms;
use crate::types::{MetricKind, SearchOptions, ServerRecord, SortBy, SortOrder};

use super::RegistryStore;
use super::rows::{SERVER_COLUMNS, ServerRow, encode_string_list};

impl RegistryStore {
    /// Insert or update one record, keyed on `id`.
    ///
    /// Popularity columns only move forward: a page that lacks stars or
    /// installs does not wipe values the enricher already wrote. `created_at`
    /// is preserved on update.
    pub async fn upsert_server(&self, record: &ServerRecord) -> Result<()> {
        let Some(pool) = self.pool() else {
            return Ok(());
        };
        let now = now_ms();
        let created_at = if record.created_at_ms > 0 {
            record.created_at_ms
        } else {
            now
        };

        sqlx::query(
            r#"
            INSERT INTO servers (
                id, name, description, author, version, homepage, repository_url,
                package_registry, package_name, install_command, tags, category, license,
                registry, install_count, rating, star_count, is_active, search_text,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                author = excluded.author,
                version = excluded.version,
                homepage = excluded.homepage,
                repository_url = excluded.repository_url,
                package_registry = excluded.package_registry,
                package_name = excluded.package_name,
                install_command = excluded.install_command,
                tags = excluded.tags,
                category = excluded.category,
                license = excluded.license,
                registry = excluded.registry,
                install_count = COALESCE(excluded.install_count, servers.install_count),
                rating = COALESCE(excluded.rating, servers.rating),
                star_count = COALESCE(excluded.star_count, servers.star_count),
                is_active = excluded.is_active,
                search_text = excluded.search_text,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.author)
        .bind(&record.version)
        .bind(&record.homepage)
        .bind(&record.repository_url)
        .bind(record.package_registry.map(|r| r.as_str()))
        .bind(&record.package_name)
        .bind(&record.install_command)
        .bind(encode_string_list(&record.tags))
        .bind(&record.category)
        .bind(&record.license)
        .bind(&record.registry)
        .bind(record.install_count)
        .bind(record.rating)
        .bind(record.star_count)
        .bind(record.is_active)
        .bind(record.search_text())
        .bind(created_at)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Targeted update of the active record holding `package_name`.
    ///
    /// The conflict-resolution path for a write race on the package-name
    /// index: the existing row keeps its `id`, everything else is replaced.
    /// Returns the number of rows updated (zero when no such row exists).
    pub async fn update_server_by_package_name(&self, record: &ServerRecord) -> Result<u64> {
        let Some(pool) = self.pool() else {
            return Ok(0);
        };
        let Some(package_name) = record.package_name.as_deref() else {
            return Ok(0);
        };

        let result = sqlx::query(
            r#"
            UPDATE servers SET
                name = ?, description = ?, author = ?, version = ?, homepage = ?,
                repository_url = ?, package_registry = ?, install_command = ?, tags = ?,
                category = ?, license = ?, registry = ?,
                install_count = COALESCE(?, install_count),
                rating = COALESCE(?, rating),
                star_count = COALESCE(?, star_count),
                search_text = ?, updated_at = ?
            WHERE package_name = ? AND is_active = 1
            "#,
        )
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.author)
        .bind(&record.version)
        .bind(&record.homepage)
        .bind(&record.repository_url)
        .bind(record.package_registry.map(|r| r.as_str()))
        .bind(&record.install_command)
        .bind(encode_string_list(&record.tags))
        .bind(&record.category)
        .bind(&record.license)
        .bind(&record.registry)
        .bind(record.install_count)
        .bind(record.rating)
        .bind(record.star_count)
        .bind(record.search_text())
        .bind(now_ms())
        .bind(package_name)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Write an enriched popularity value through to the record.
    ///
    /// Stars for [`MetricKind::GithubStars`], installs for the download
    /// metrics. Returns whether a row changed.
    pub async fn update_server_popularity(
        &self,
        id: &str,
        kind: MetricKind,
        value: i64,
    ) -> Result<bool> {
        let Some(pool) = self.pool() else {
            return Ok(false);
        };
        let sql = match kind {
            MetricKind::GithubStars => "UPDATE servers SET star_count = ?, updated_at = ? WHERE id = ?",
            MetricKind::NpmDownloads | MetricKind::PypiDownloads => {
                "UPDATE servers SET install_count = ?, updated_at = ? WHERE id = ?"
            }
        };
        let result = sqlx::query(sql)
            .bind(value)
            .bind(now_ms())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Look up one record by id.
    pub async fn get_server(&self, id: &str) -> Option<ServerRecord> {
        let pool = self.pool()?;
        let sql = format!("SELECT {SERVER_COLUMNS} FROM servers WHERE id = ?");
        match sqlx::query_as::<_, ServerRow>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
        {
            Ok(row) => row.map(ServerRow::into_record),
            Err(e) => {
                warn!(id, error = %e, "server lookup failed");
                None
            }
        }
    }

    /// Look up many records, preserving input order; missing ids are omitted.
    pub async fn get_servers(&self, ids: &[String]) -> Vec<ServerRecord> {
        let Some(pool) = self.pool() else {
            return Vec::new();
        };
        if ids.is_empty() {
            return Vec::new();
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("SELECT {SERVER_COLUMNS} FROM servers WHERE id IN ({placeholders})");
        let mut query = sqlx::query_as::<_, ServerRow>(&sql);
        for id in ids {
            query = query.bind(id);
        }

        match query.fetch_all(pool).await {
            Ok(fetched) => {
                let mut by_id: HashMap<String, ServerRecord> = fetched
                    .into_iter()
                    .map(|row| (row.id.clone(), row.into_record()))
                    .collect();
                ids.iter().filter_map(|id| by_id.remove(id)).collect()
            }
            Err(e) => {
                warn!(count = ids.len(), error = %e, "batch server lookup failed");
                Vec::new()
            }
        }
    }

    /// Look up the active record holding `package_name`.
    pub async fn get_server_by_package_name(&self, package_name: &str) -> Option<ServerRecord> {
        let pool = self.pool()?;
        let sql =
            format!("SELECT {SERVER_COLUMNS} FROM servers WHERE package_name = ? AND is_active = 1");
        match sqlx::query_as::<_, ServerRow>(&sql)
            .bind(package_name)
            .fetch_optional(pool)
            .await
        {
            Ok(row) => row.map(ServerRow::into_record),
            Err(e) => {
                warn!(package_name, error = %e, "package lookup failed");
                None
            }
        }
    }

    /// Active records from one registry, optionally limited to those
    /// refreshed within `max_age_ms`.
    pub async fn get_servers_by_registry(
        &self,
        registry: &str,
        max_age_ms: Option<i64>,
    ) -> Vec<ServerRecord> {
        let Some(pool) = self.pool() else {
            return Vec::new();
        };

        let mut sql = format!(
            "SELECT {SERVER_COLUMNS} FROM servers WHERE registry = ? AND is_active = 1"
        );
        if max_age_ms.is_some() {
            sql.push_str(" AND updated_at >= ?");
        }
        sql.push_str(" ORDER BY COALESCE(star_count, 0) DESC, name COLLATE NOCASE ASC");

        let mut query = sqlx::query_as::<_, ServerRow>(&sql).bind(registry);
        if let Some(max_age) = max_age_ms {
            query = query.bind(now_ms() - max_age);
        }

        match query.fetch_all(pool).await {
            Ok(rows) => rows.into_iter().map(ServerRow::into_record).collect(),
            Err(e) => {
                warn!(registry, error = %e, "registry scan failed");
                Vec::new()
            }
        }
    }

    /// Search active records with the normalized options, returning the
    /// requested page and the total match count.
    pub async fn search_servers(&self, options: &SearchOptions) -> (Vec<ServerRecord>, i64) {
        let Some(pool) = self.pool() else {
            return (Vec::new(), 0);
        };
        let n = options.normalized();

        let mut where_sql = String::from("is_active = 1");
        let mut binds: Vec<String> = Vec::new();

        if let Some(query) = &n.query {
            where_sql.push_str(" AND search_text LIKE ? ESCAPE '\\'");
            binds.push(format!("%{}%", escape_like(query)));
        }
        for tag in &n.tags {
            where_sql.push_str(" AND tags LIKE ? ESCAPE '\\'");
            binds.push(format!("%\"{}\"%", escape_like(tag)));
        }
        if let Some(category) = &n.category {
            // category column first, tags as the fallback match
            where_sql.push_str(" AND (LOWER(COALESCE(category, '')) = ? OR tags LIKE ? ESCAPE '\\')");
            binds.push(category.clone());
            binds.push(format!("%\"{}\"%", escape_like(category)));
        }
        if let Some(author) = &n.author {
            where_sql.push_str(" AND LOWER(COALESCE(author, '')) = ?");
            binds.push(author.clone());
        }

        let count_sql = format!("SELECT COUNT(*) FROM servers WHERE {where_sql}");
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for bind in &binds {
            count_query = count_query.bind(bind);
        }
        let total = match count_query.fetch_one(pool).await {
            Ok(total) => total,
            Err(e) => {
                warn!(error = %e, "search count failed");
                return (Vec::new(), 0);
            }
        };

        let select_sql = format!(
            "SELECT {SERVER_COLUMNS} FROM servers WHERE {where_sql} {} LIMIT ? OFFSET ?",
            order_clause(n.sort_by, n.sort_order)
        );
        let mut query = sqlx::query_as::<_, ServerRow>(&select_sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let query = query.bind(n.limit as i64).bind(n.offset as i64);

        match query.fetch_all(pool).await {
            Ok(rows) => (rows.into_iter().map(ServerRow::into_record).collect(), total),
            Err(e) => {
                warn!(error = %e, "search query failed");
                (Vec::new(), 0)
            }
        }
    }

    /// Active records still missing a popularity metric, best candidates
    /// first: has a package name, then has a repository URL, then oldest
    /// refresh.
    pub async fn enrichment_candidates(&self, limit: usize) -> Vec<ServerRecord> {
        let Some(pool) = self.pool() else {
            return Vec::new();
        };
        let sql = format!(
            "SELECT {SERVER_COLUMNS} FROM servers \
             WHERE is_active = 1 AND (star_count IS NULL OR install_count IS NULL) \
             ORDER BY (package_name IS NOT NULL) DESC, (repository_url IS NOT NULL) DESC, \
                      updated_at ASC \
             LIMIT ?"
        );
        match sqlx::query_as::<_, ServerRow>(&sql)
            .bind(limit as i64)
            .fetch_all(pool)
            .await
        {
            Ok(rows) => rows.into_iter().map(ServerRow::into_record).collect(),
            Err(e) => {
                warn!(error = %e, "enrichment candidate query failed");
                Vec::new()
            }
        }
    }

    /// Delete every record sourced from `registry`. Administrative;
    /// propagates store failures. Returns the number of rows deleted.
    pub async fn clear_registry(&self, registry: &str) -> Result<u64> {
        let Some(pool) = self.pool() else {
            return Ok(0);
        };
        let result = sqlx::query("DELETE FROM servers WHERE registry = ?")
            .bind(registry)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// ORDER BY clause for a normalized sort request. Popularity sorts carry
/// deterministic tie-breaks so pagination is stable.
fn order_clause(sort_by: SortBy, sort_order: SortOrder) -> String {
    let dir = match sort_order {
        SortOrder::Desc => "DESC",
        SortOrder::Asc => "ASC",
    };
    match sort_by {
        SortBy::Stars => format!(
            "ORDER BY COALESCE(star_count, 0) {dir}, COALESCE(install_count, 0) {dir}, \
             name COLLATE NOCASE {dir}"
        ),
        SortBy::Installs => {
            format!("ORDER BY COALESCE(install_count, 0) {dir}, name COLLATE NOCASE {dir}")
        }
        SortBy::Name => format!("ORDER BY name COLLATE NOCASE {dir}"),
        SortBy::Updated => format!("ORDER BY updated_at {dir}, name COLLATE NOCASE {dir}"),
    }
}

/// Escape LIKE metacharacters so user text matches literally.
fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
