//! Caching subsystem.
//!
//! Two caches layered over the persistent store:
//!
//! - [`ServerRecordCache`] — the write path for server records: batch
//!   deduplication, insert-or-update keyed on `id`, and conflict
//!   resolution against the active-package-name uniqueness index. All
//!   public operations are best-effort and never fail the caller.
//!
//! - [`SearchCache`] — persisted query results served under
//!   stale-while-revalidate semantics, with a single-flight claim per
//!   query hash so a burst of stale hits schedules exactly one
//!   revalidation.

pub mod records;
pub mod search;

pub use records::ServerRecordCache;
pub use search::{CacheLookup, SearchCache, SearchCacheConfig};
