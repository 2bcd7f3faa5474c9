//! Server record cache: the deduplicating, conflict-resolving write path.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::Result;
use crate::store::RegistryStore;
use crate::types::{SearchOptions, ServerRecord};
use crate::MuninnError;

/// Write and lookup layer for server records.
///
/// Everything here is best-effort: a degraded store turns writes into
/// no-ops and reads into empty results, and a genuine write failure is
/// logged per record rather than failing a whole batch.
#[derive(Clone)]
pub struct ServerRecordCache {
    store: RegistryStore,
}

impl ServerRecordCache {
    /// Create a cache over `store`.
    pub fn new(store: RegistryStore) -> Self {
        Self { store }
    }

    /// Cache one record. Returns whether the write succeeded.
    pub async fn upsert(&self, record: &ServerRecord) -> bool {
        match self.upsert_resolving(record).await {
            Ok(()) => true,
            Err(e) => {
                warn!(id = %record.id, error = %e, "record upsert failed");
                false
            }
        }
    }

    /// Cache a batch. Returns the number of records written.
    ///
    /// The batch is first deduplicated by `id` and by non-null package name
    /// (first occurrence wins) so the write loop cannot trip the uniqueness
    /// constraints over its own input; residual conflicts from concurrent
    /// writers are resolved per record.
    pub async fn bulk_upsert(&self, records: Vec<ServerRecord>) -> usize {
        let deduped = dedupe_batch(records);
        let mut written = 0;
        for record in &deduped {
            match self.upsert_resolving(record).await {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!(id = %record.id, error = %e, "record upsert failed, continuing batch")
                }
            }
        }
        written
    }

    /// Insert-or-update with conflict fallback.
    ///
    /// A uniqueness violation on the active-package-name index (a race with
    /// another writer) converts into a targeted update of the existing row;
    /// the conflict is only re-raised when that row cannot be found.
    async fn upsert_resolving(&self, record: &ServerRecord) -> Result<()> {
        match self.store.upsert_server(record).await {
            Ok(()) => Ok(()),
            Err(MuninnError::Conflict(detail)) => {
                debug!(id = %record.id, detail, "package name conflict, updating existing row");
                let updated = self.store.update_server_by_package_name(record).await?;
                if updated == 0 {
                    return Err(MuninnError::Conflict(detail));
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Look up one record by id.
    pub async fn get(&self, id: &str) -> Option<ServerRecord> {
        self.store.get_server(id).await
    }

    /// Look up many records, preserving input order; missing ids omitted.
    pub async fn get_many(&self, ids: &[String]) -> Vec<ServerRecord> {
        self.store.get_servers(ids).await
    }

    /// Look up the active record holding `package_name`.
    pub async fn get_by_package_name(&self, package_name: &str) -> Option<ServerRecord> {
        self.store.get_server_by_package_name(package_name).await
    }

    /// Active records from one registry, optionally age-limited.
    pub async fn by_registry(&self, registry: &str, max_age_ms: Option<i64>) -> Vec<ServerRecord> {
        self.store.get_servers_by_registry(registry, max_age_ms).await
    }

    /// Search the store directly (the live-search backend for the
    /// aggregator when the search cache misses).
    pub async fn search(&self, options: &SearchOptions) -> (Vec<ServerRecord>, i64) {
        self.store.search_servers(options).await
    }
}

/// Drop batch-internal duplicates by id and by non-null package name.
/// First occurrence wins; drops are logged at debug.
fn dedupe_batch(records: Vec<ServerRecord>) -> Vec<ServerRecord> {
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut seen_packages: HashSet<String> = HashSet::new();
    let mut deduped = Vec::with_capacity(records.len());

    for record in records {
        if !seen_ids.insert(record.id.clone()) {
            debug!(id = %record.id, "duplicate id in batch, dropped");
            continue;
        }
        if let Some(package) = record.package_name.as_deref().map(str::trim)
            && !package.is_empty()
        {
            if !seen_packages.insert(package.to_lowercase()) {
                debug!(id = %record.id, package, "duplicate package name in batch, dropped");
                continue;
            }
        }
        deduped.push(record);
    }
    deduped
}
