//! Typed row structs for each table, with converters to domain types.
//!
//! The storage boundary is the only place that sees raw columns; everything
//! above works with the shaped types from [`crate::types`]. JSON-array
//! columns (`tags`, `server_ids`) decode leniently — a corrupt value reads
//! back as empty rather than failing the row.

use crate::types::{
    MetricKind, MetricState, MetricStatus, PackageRegistry, RegistrySyncStatus, ServerRecord,
    SyncState,
};

use super::search_cache::SearchCacheEntry;

/// Column list matching [`ServerRow`]; keep the two in sync.
pub(crate) const SERVER_COLUMNS: &str = "id, name, description, author, version, homepage, \
     repository_url, package_registry, package_name, install_command, tags, category, license, \
     registry, install_count, rating, star_count, is_active, created_at, updated_at";

#[derive(sqlx::FromRow)]
pub(crate) struct ServerRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub author: Option<String>,
    pub version: Option<String>,
    pub homepage: Option<String>,
    pub repository_url: Option<String>,
    pub package_registry: Option<String>,
    pub package_name: Option<String>,
    pub install_command: Option<String>,
    pub tags: String,
    pub category: Option<String>,
    pub license: Option<String>,
    pub registry: String,
    pub install_count: Option<i64>,
    pub rating: Option<f64>,
    pub star_count: Option<i64>,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ServerRow {
    pub(crate) fn into_record(self) -> ServerRecord {
        ServerRecord {
            id: self.id,
            name: self.name,
            description: self.description,
            author: self.author,
            version: self.version,
            homepage: self.homepage,
            repository_url: self.repository_url,
            package_registry: self.package_registry.as_deref().and_then(PackageRegistry::parse),
            package_name: self.package_name,
            install_command: self.install_command,
            tags: decode_string_list(&self.tags),
            category: self.category,
            license: self.license,
            registry: self.registry,
            install_count: self.install_count,
            rating: self.rating,
            star_count: self.star_count,
            is_active: self.is_active,
            created_at_ms: self.created_at,
            updated_at_ms: self.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct SearchCacheRow {
    pub query_hash: String,
    pub server_ids: String,
    pub total_count: i64,
    pub has_more: bool,
    pub created_at: i64,
    pub expires_at: i64,
    pub hit_count: i64,
}

impl SearchCacheRow {
    pub(crate) fn into_entry(self) -> SearchCacheEntry {
        SearchCacheEntry {
            query_hash: self.query_hash,
            server_ids: decode_string_list(&self.server_ids),
            total_count: self.total_count,
            has_more: self.has_more,
            created_at_ms: self.created_at,
            expires_at_ms: self.expires_at,
            hit_count: self.hit_count,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct RegistrySyncRow {
    pub registry: String,
    pub status: String,
    pub last_sync_at: Option<i64>,
    pub last_success_at: Option<i64>,
    pub next_sync_at: Option<i64>,
    pub server_count: i64,
    pub error_message: Option<String>,
    pub sync_duration_ms: Option<i64>,
}

impl RegistrySyncRow {
    pub(crate) fn into_status(self) -> RegistrySyncStatus {
        RegistrySyncStatus {
            registry: self.registry,
            status: SyncState::parse(&self.status),
            last_sync_at_ms: self.last_sync_at,
            last_success_at_ms: self.last_success_at,
            next_sync_at_ms: self.next_sync_at,
            server_count: self.server_count,
            error_message: self.error_message,
            sync_duration_ms: self.sync_duration_ms,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct MetricStatusRow {
    pub server_id: String,
    pub metric_type: String,
    pub status: String,
    pub last_attempt_at: Option<i64>,
    pub last_success_at: Option<i64>,
    pub next_update_at: Option<i64>,
    pub value: Option<i64>,
    pub retry_count: i64,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub etag: Option<String>,
}

impl MetricStatusRow {
    pub(crate) fn into_status(self) -> Option<MetricStatus> {
        Some(MetricStatus {
            server_id: self.server_id,
            kind: MetricKind::parse(&self.metric_type)?,
            status: MetricState::parse(&self.status),
            last_attempt_at_ms: self.last_attempt_at,
            last_success_at_ms: self.last_success_at,
            next_update_at_ms: self.next_update_at,
            value: self.value,
            retry_count: u32::try_from(self.retry_count.max(0)).unwrap_or(u32::MAX),
            error_code: self.error_code,
            error_message: self.error_message,
            etag: self.etag,
        })
    }
}

/// Decode a JSON string-array column; anything malformed reads as empty.
pub(crate) fn decode_string_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// Encode a string list for a JSON-array column.
pub(crate) fn encode_string_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_list_round_trip() {
        let tags = vec!["weather".to_string(), "api".to_string()];
        assert_eq!(decode_string_list(&encode_string_list(&tags)), tags);
    }

    #[test]
    fn malformed_list_decodes_empty() {
        assert!(decode_string_list("not json").is_empty());
        assert!(decode_string_list("{\"a\":1}").is_empty());
        assert!(decode_string_list("").is_empty());
    }
}
