//! Summary types returned by administrative and background operations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Aggregated view of the store and its recent performance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Active server records in the store.
    pub total_servers: i64,
    /// Active record count per owning registry.
    pub servers_by_registry: HashMap<String, i64>,
    /// Live search-cache entries.
    pub cache_entries: i64,
    /// Mean search duration over the retained perf samples, ms.
    pub average_response_time_ms: f64,
    /// Fraction of retained searches served from cache, `0.0..=1.0`.
    pub cache_hit_rate: f64,
    /// Oldest record's creation time, epoch ms.
    pub oldest_entry_ms: Option<i64>,
    /// Newest record's update time, epoch ms.
    pub newest_entry_ms: Option<i64>,
}

/// Outcome of one enrichment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichReport {
    /// Servers pulled through the worker pool.
    pub processed: usize,
    /// Servers whose popularity fields actually changed.
    pub updated: usize,
}

impl EnrichReport {
    /// Fold another worker's tally into this one.
    pub fn absorb(&mut self, other: EnrichReport) {
        self.processed += other.processed;
        self.updated += other.updated;
    }
}

/// Outcome of one background sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCycleReport {
    /// Registries synced to completion.
    pub synced: usize,
    /// Registries skipped because their tier was still fresh.
    pub skipped: usize,
    /// Registries whose sync errored.
    pub failed: usize,
    /// Records written through the record cache across the cycle.
    pub servers_cached: usize,
}
