//! Search options, normalization, and the cache key derived from them.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::server::ServerRecord;
use crate::freshness::Freshness;

/// Hard ceiling on page size, matching what upstream catalogs will serve.
pub const MAX_PAGE_SIZE: usize = 100;

/// Default page size for searches that don't specify one.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Sort key for search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    /// Source-repository star count.
    #[default]
    Stars,
    /// Install/download count.
    Installs,
    /// Display name.
    Name,
    /// Last update time.
    Updated,
}

impl SortBy {
    /// Stable form used in canonical query strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Stars => "stars",
            SortBy::Installs => "installs",
            SortBy::Name => "name",
            SortBy::Updated => "updated",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Descending (default: most popular first).
    #[default]
    Desc,
    /// Ascending.
    Asc,
}

impl SortOrder {
    /// Stable form used in canonical query strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Desc => "desc",
            SortOrder::Asc => "asc",
        }
    }
}

/// Parameters for a catalog search.
///
/// Two option values that normalize identically are the same logical query
/// and share one search-cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Free-text query over the derived search text.
    pub query: Option<String>,
    /// Tags the record must carry (all of them).
    pub tags: Vec<String>,
    /// Category filter; matches the category column or, failing that, tags.
    pub category: Option<String>,
    /// Author filter (exact, case-insensitive).
    pub author: Option<String>,
    /// Page size; clamped to `1..=MAX_PAGE_SIZE`.
    pub limit: usize,
    /// Page offset in records.
    pub offset: usize,
    /// Sort key.
    pub sort_by: SortBy,
    /// Sort direction.
    pub sort_order: SortOrder,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            query: None,
            tags: Vec::new(),
            category: None,
            author: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
            sort_by: SortBy::default(),
            sort_order: SortOrder::default(),
        }
    }
}

impl SearchOptions {
    /// Options for an unconstrained first-page browse.
    pub fn browse() -> Self {
        Self::default()
    }

    /// Options for a free-text query with defaults elsewhere.
    pub fn with_query(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    /// Canonicalize: trim and lowercase text fields, drop empties, sort and
    /// dedupe tags, clamp paging. Idempotent.
    pub fn normalized(&self) -> SearchOptions {
        let clean = |s: &Option<String>| {
            s.as_deref()
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty())
        };

        let mut tags: Vec<String> = self
            .tags
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        tags.sort();
        tags.dedup();

        SearchOptions {
            query: clean(&self.query),
            tags,
            category: clean(&self.category),
            author: clean(&self.author),
            limit: self.limit.clamp(1, MAX_PAGE_SIZE),
            offset: self.offset,
            sort_by: self.sort_by,
            sort_order: self.sort_order,
        }
    }

    /// Whether this is an unconstrained browse of the first page — the only
    /// shape that fans out to assemble a full initial catalog.
    pub fn is_unconstrained_browse(&self) -> bool {
        let n = self.normalized();
        n.query.is_none()
            && n.tags.is_empty()
            && n.category.is_none()
            && n.author.is_none()
            && n.offset == 0
    }

    /// Deterministic canonical text form of the normalized options.
    pub fn canonical_string(&self) -> String {
        let n = self.normalized();
        format!(
            "q={}|tags={}|cat={}|author={}|limit={}|offset={}|sort={}.{}",
            n.query.as_deref().unwrap_or(""),
            n.tags.join(","),
            n.category.as_deref().unwrap_or(""),
            n.author.as_deref().unwrap_or(""),
            n.limit,
            n.offset,
            n.sort_by.as_str(),
            n.sort_order.as_str(),
        )
    }

    /// Search-cache key: SHA-256 of the canonical string, hex-encoded.
    ///
    /// Entries outlive the process, so the hash must be stable across runs
    /// (rules out the std sip hasher, which is randomly keyed).
    pub fn query_hash(&self) -> String {
        let digest = Sha256::digest(self.canonical_string().as_bytes());
        let mut hex = String::with_capacity(64);
        for byte in digest {
            use std::fmt::Write;
            let _ = write!(hex, "{byte:02x}");
        }
        hex
    }
}

/// Result of a catalog search. Always produced, never an error: degraded
/// paths return an empty response annotated accordingly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Matching records, in final sort order.
    pub servers: Vec<ServerRecord>,
    /// Total matches before paging.
    pub total: usize,
    /// Whether more pages exist past `offset + servers.len()`.
    pub has_more: bool,
    /// Whether the result came from the search cache.
    pub from_cache: bool,
    /// Freshness tier of the data served.
    pub staleness: Freshness,
    /// Time spent serving this search, in milliseconds.
    pub query_time_ms: u64,
}

impl SearchResponse {
    /// An empty, authoritative-looking miss (degraded mode, no matches).
    pub fn empty() -> Self {
        Self {
            servers: Vec::new(),
            total: 0,
            has_more: false,
            from_cache: false,
            staleness: Freshness::Expired,
            query_time_ms: 0,
        }
    }
}
