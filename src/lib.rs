//! Muninn - registry cache and enrichment engine for MCP server catalogs
//!
//! This crate caches third-party MCP server catalogs locally, tracks how
//! fresh each piece of cached data is, and backfills popularity metrics
//! (stars, download counts) from the relevant upstream APIs. Searches are
//! served stale-while-revalidate: cached answers return immediately while
//! refreshes run in the background, and upstream providers are only
//! consulted when the local catalog cannot stand in for an answer.
//!
//! # Search Example
//!
//! ```rust,no_run
//! use muninn::{Muninn, SearchOptions};
//!
//! #[tokio::main]
//! async fn main() -> muninn::Result<()> {
//!     let catalog = Muninn::builder()
//!         .github_token("ghp_your_token")
//!         .build()
//!         .await?;
//!
//!     let response = catalog
//!         .search(&SearchOptions::with_query("weather"))
//!         .await;
//!
//!     for server in &response.servers {
//!         println!("{} ({:?} stars)", server.name, server.star_count);
//!     }
//!     println!("stale: {}", response.staleness.as_str());
//!     Ok(())
//! }
//! ```
//!
//! # Background Sync Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use muninn::Muninn;
//!
//! #[tokio::main]
//! async fn main() -> muninn::Result<()> {
//!     let catalog = Muninn::builder()
//!         .sync_interval(Duration::from_secs(3600))
//!         .build()
//!         .await?;
//!
//!     // First cycle right away; the timer handles the rest.
//!     let report = catalog.run_sync_cycle().await;
//!     println!("synced {} registries", report.synced);
//!
//!     // Backfill metrics for records that arrived without them.
//!     let enriched = catalog.enrich_missing(50, 4).await;
//!     println!("updated {} servers", enriched.updated);
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod budget;
pub mod cache;
pub mod catalog;
pub mod enrich;
pub mod error;
pub mod freshness;
pub mod providers;
pub mod store;
pub mod telemetry;
pub mod types;

// Re-export main types at crate root
pub use error::{MuninnError, Result};

pub use aggregator::{AggregatorConfig, RegistryAggregator};
pub use budget::ProviderBudget;
pub use cache::{SearchCache, SearchCacheConfig, ServerRecordCache};
pub use catalog::{Muninn, MuninnBuilder, ServerCatalog};
pub use enrich::{EnricherConfig, MetricsEnricher};
pub use freshness::{Freshness, FreshnessPolicy};
pub use providers::{CatalogPage, CatalogProvider, PageRequest, RetryConfig};
pub use store::RegistryStore;

// Re-export all domain types
pub use types::{
    CacheStats, EnrichReport, MetricKind, MetricState, MetricStatus, PackageRegistry,
    RegistrySyncStatus, SearchOptions, SearchResponse, ServerRecord, SortBy, SortOrder,
    SyncCycleReport, SyncDetails, SyncState,
};
