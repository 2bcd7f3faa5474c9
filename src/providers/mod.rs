//! Upstream catalog providers.
//!
//! This module contains clients for the server catalogs the aggregator
//! can pull from: PulseMCP (offset-paged, text query) and the official
//! MCP registry (cursor-paged). Both implement [`CatalogProvider`] and
//! normalize their payloads into [`ServerRecord`]s on the way in.
//!
//! [`ServerRecord`]: crate::types::ServerRecord

pub mod mcp_registry;
pub mod pulse;
pub mod retry;
pub mod traits;

pub use mcp_registry::McpRegistryClient;
pub use pulse::PulseCatalogClient;
pub use retry::RetryConfig;
pub use traits::{CatalogPage, CatalogProvider, PageRequest};

use crate::types::parse_github_repo;

// ============================================================================
// Shared payload normalization
// ============================================================================

/// Canonicalize recognizable GitHub URLs (`git+…`, `git@…`, `github:`)
/// to `https://github.com/{owner}/{repo}`; anything else passes through.
pub(crate) fn canonical_repo_url(url: &str) -> String {
    match parse_github_repo(url) {
        Some((owner, repo)) => format!("https://github.com/{}/{}", owner, repo),
        None => url.to_string(),
    }
}

/// npm naming rules: lowercase, URL-safe segment characters, at most one
/// `@scope/` prefix. Catalogs routinely carry display names in the
/// package field; this keeps them out of install commands.
pub(crate) fn is_valid_npm_package_name(name: &str) -> bool {
    fn valid_segment(segment: &str) -> bool {
        !segment.is_empty()
            && segment.chars().all(|ch| {
                ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '.' | '-' | '_')
            })
    }

    if name.is_empty() || name.chars().any(|ch| ch.is_ascii_uppercase()) {
        return false;
    }

    if let Some(rest) = name.strip_prefix('@') {
        let mut parts = rest.split('/');
        let scope = parts.next().unwrap_or_default();
        let pkg = parts.next().unwrap_or_default();
        if parts.next().is_some() {
            return false;
        }
        return valid_segment(scope) && valid_segment(pkg);
    }

    valid_segment(name)
}
