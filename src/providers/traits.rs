//! Catalog provider trait and page types.
//!
//! Upstream registries differ in pagination style (offset/count vs.
//! cursor) but both reduce to "give me one page of server records". The
//! aggregator drives whichever provider it holds through this one trait,
//! so fallback chains and budget gating stay provider-agnostic.
//!
//! # Fallback semantics
//!
//! Providers return their own errors untranslated; the aggregator decides
//! what is retryable (via [`MuninnError::is_transient`]) and when to move
//! to the next provider. A page with zero decodable entries surfaces as
//! [`MuninnError::EmptyPage`] so callers can distinguish "registry is
//! empty" from "payload was garbage".
//!
//! [`MuninnError::is_transient`]: crate::MuninnError::is_transient
//! [`MuninnError::EmptyPage`]: crate::MuninnError::EmptyPage

use async_trait::async_trait;

use crate::Result;
use crate::types::ServerRecord;

/// One page request against an upstream catalog.
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    /// Free-text query; `None` browses the whole catalog.
    pub query: Option<String>,
    /// Requested page size.
    pub limit: usize,
    /// Zero-based record offset (offset-paged providers).
    pub offset: usize,
    /// Opaque continuation token (cursor-paged providers).
    pub cursor: Option<String>,
}

impl PageRequest {
    /// Browse request for one page of the unfiltered catalog.
    pub fn browse(limit: usize, offset: usize) -> Self {
        Self {
            query: None,
            limit,
            offset,
            cursor: None,
        }
    }

    /// Filtered request.
    pub fn query(text: impl Into<String>, limit: usize, offset: usize) -> Self {
        Self {
            query: Some(text.into()),
            limit,
            offset,
            cursor: None,
        }
    }

    /// Continue from a provider-supplied cursor.
    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }
}

/// One page of catalog results.
#[derive(Debug, Clone)]
pub struct CatalogPage {
    /// Decoded records; malformed upstream entries are dropped, never
    /// failing the page.
    pub servers: Vec<ServerRecord>,
    /// Continuation token for cursor-paged providers.
    pub next_cursor: Option<String>,
    /// Whether the provider reports more results past this page.
    pub has_more: bool,
    /// Total matching records, when the provider reports it.
    pub total: Option<i64>,
}

/// An upstream server catalog.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Provider name for budget accounting, logging, and metrics.
    fn name(&self) -> &str;

    /// Fetch one page.
    async fn fetch_page(&self, request: &PageRequest) -> Result<CatalogPage>;
}
