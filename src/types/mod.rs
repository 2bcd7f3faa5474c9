//! Public types for the muninn API.

mod report;
mod search;
mod server;
mod status;

pub use report::{CacheStats, EnrichReport, SyncCycleReport};
pub use search::{
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, SearchOptions, SearchResponse, SortBy, SortOrder,
};
pub use server::{PackageRegistry, ServerRecord, parse_github_repo};
pub use status::{
    MetricKind, MetricState, MetricStatus, RegistrySyncStatus, SyncDetails, SyncState,
};
