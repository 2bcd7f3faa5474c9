//! Builder for assembling catalog instances.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::ServerCatalog;
use crate::aggregator::{AggregatorConfig, RegistryAggregator};
use crate::budget::ProviderBudget;
use crate::cache::{SearchCache, SearchCacheConfig, ServerRecordCache};
use crate::enrich::{
    EnricherConfig, GithubStarsClient, MetricsEnricher, NpmDownloadsClient, PypiDownloadsClient,
};
use crate::freshness::FreshnessPolicy;
use crate::providers::{CatalogProvider, McpRegistryClient, PulseCatalogClient, RetryConfig};
use crate::store::{RegistryStore, default_store_path};
use crate::{MuninnError, Result};

/// Daily request allowance per catalog provider unless overridden.
const DEFAULT_DAILY_BUDGET: u32 = 1_000;

/// Main entry point for creating catalog instances.
pub struct Muninn;

impl Muninn {
    /// Create a new builder for configuring the catalog.
    pub fn builder() -> MuninnBuilder {
        MuninnBuilder::new()
    }
}

/// Where the persistent store lives.
enum StoreMode {
    /// On-disk database; `None` means the platform default path.
    OnDisk(Option<PathBuf>),
    /// Fresh in-memory database (tests, ephemeral deployments).
    InMemory,
    /// No persistence at all: permanent degraded mode.
    Disabled,
}

/// Builder for configuring catalog instances.
///
/// Everything has a working default: `Muninn::builder().build().await`
/// yields a catalog over the on-disk store with both upstream registries,
/// anonymous GitHub access, and the stock budgets and policies.
pub struct MuninnBuilder {
    store: StoreMode,
    github_token: Option<String>,
    pulse_base_url: Option<String>,
    mcp_registry_base_url: Option<String>,
    github_base_url: Option<String>,
    npm_base_url: Option<String>,
    pypi_base_url: Option<String>,
    budgets: Vec<(String, u32)>,
    search_cache: SearchCacheConfig,
    aggregator: AggregatorConfig,
    enricher: EnricherConfig,
    sync_interval: Option<Duration>,
}

impl MuninnBuilder {
    pub fn new() -> Self {
        Self {
            store: StoreMode::OnDisk(None),
            github_token: None,
            pulse_base_url: None,
            mcp_registry_base_url: None,
            github_base_url: None,
            npm_base_url: None,
            pypi_base_url: None,
            budgets: Vec::new(),
            search_cache: SearchCacheConfig::new(),
            aggregator: AggregatorConfig::new(),
            enricher: EnricherConfig::new(),
            sync_interval: None,
        }
    }

    /// Put the store at an explicit path instead of the platform default.
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store = StoreMode::OnDisk(Some(path.into()));
        self
    }

    /// Use a fresh in-memory store (nothing survives the process).
    pub fn in_memory_store(mut self) -> Self {
        self.store = StoreMode::InMemory;
        self
    }

    /// Run without any store: queries work, nothing is persisted.
    pub fn without_store(mut self) -> Self {
        self.store = StoreMode::Disabled;
        self
    }

    /// Authenticate star fetches against the source host.
    ///
    /// Without a token the enricher limits itself to one concurrent star
    /// worker to stay inside the anonymous rate limit.
    pub fn github_token(mut self, token: impl Into<String>) -> Self {
        self.github_token = Some(token.into());
        self
    }

    /// Override the primary catalog's base URL (tests point this at a
    /// local mock server).
    pub fn pulse_base_url(mut self, url: impl Into<String>) -> Self {
        self.pulse_base_url = Some(url.into());
        self
    }

    /// Override the secondary catalog's base URL.
    pub fn mcp_registry_base_url(mut self, url: impl Into<String>) -> Self {
        self.mcp_registry_base_url = Some(url.into());
        self
    }

    /// Override the repository API base URL.
    pub fn github_base_url(mut self, url: impl Into<String>) -> Self {
        self.github_base_url = Some(url.into());
        self
    }

    /// Override the npm downloads API base URL.
    pub fn npm_base_url(mut self, url: impl Into<String>) -> Self {
        self.npm_base_url = Some(url.into());
        self
    }

    /// Override the PyPI downloads API base URL.
    pub fn pypi_base_url(mut self, url: impl Into<String>) -> Self {
        self.pypi_base_url = Some(url.into());
        self
    }

    /// Set a provider's daily request budget (default 1000 per provider).
    pub fn budget(mut self, provider: impl Into<String>, daily_limit: u32) -> Self {
        self.budgets.push((provider.into(), daily_limit));
        self
    }

    /// Tune the search cache (TTL, fresh fraction, entry cap).
    pub fn search_cache(mut self, config: SearchCacheConfig) -> Self {
        self.search_cache = config;
        self
    }

    /// Set the registry-level freshness policy.
    pub fn registry_policy(mut self, policy: FreshnessPolicy) -> Self {
        self.aggregator = self.aggregator.registry_policy(policy);
        self
    }

    /// Set the retry policy for upstream page fetches.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.aggregator = self.aggregator.retry(retry);
        self
    }

    /// Concurrent first pages fetched when assembling an initial catalog.
    pub fn browse_fan_out(mut self, fan_out: usize) -> Self {
        self.aggregator = self.aggregator.browse_fan_out(fan_out);
        self
    }

    /// Page size for browse and fan-out requests.
    pub fn browse_page_size(mut self, size: usize) -> Self {
        self.aggregator = self.aggregator.browse_page_size(size);
        self
    }

    /// Page size for background sync pagination.
    pub fn sync_page_size(mut self, size: usize) -> Self {
        self.aggregator = self.aggregator.sync_page_size(size);
        self
    }

    /// How long a fresh-catalog search waits on its live refresh.
    pub fn live_race_timeout(mut self, timeout: Duration) -> Self {
        self.aggregator = self.aggregator.live_race_timeout(timeout);
        self
    }

    /// Tune the metrics enricher (backoff base delay, pause fallback).
    pub fn enricher(mut self, config: EnricherConfig) -> Self {
        self.enricher = config;
        self
    }

    /// Run a background sync cycle on this interval.
    ///
    /// The timer stops when the catalog is dropped. Without this, sync
    /// runs only when triggered (explicitly or by stale reads).
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Assemble the catalog.
    ///
    /// Fails on a budget naming an unknown provider or an in-memory store
    /// that cannot come up; an on-disk store that cannot be opened
    /// degrades rather than failing the build.
    pub async fn build(self) -> Result<ServerCatalog> {
        let store = match self.store {
            StoreMode::OnDisk(Some(path)) => RegistryStore::open(&path).await,
            StoreMode::OnDisk(None) => RegistryStore::open(&default_store_path()).await,
            StoreMode::InMemory => RegistryStore::in_memory().await?,
            StoreMode::Disabled => RegistryStore::disabled(),
        };

        let records = ServerRecordCache::new(store.clone());
        let search_cache = SearchCache::new(store.clone(), self.search_cache);

        // Primary first: the fallback chain and the sync cycle both walk
        // this order.
        let pulse: Arc<dyn CatalogProvider> = Arc::new(match self.pulse_base_url {
            Some(url) => PulseCatalogClient::with_base_url(url),
            None => PulseCatalogClient::new(),
        });
        let mcp_registry: Arc<dyn CatalogProvider> = Arc::new(match self.mcp_registry_base_url {
            Some(url) => McpRegistryClient::with_base_url(url),
            None => McpRegistryClient::new(),
        });
        let providers = vec![pulse, mcp_registry];

        for (provider, _) in &self.budgets {
            if !providers.iter().any(|p| p.name() == provider) {
                return Err(MuninnError::Configuration(format!(
                    "budget for unknown provider '{provider}'"
                )));
            }
        }

        let mut budgets: HashMap<String, ProviderBudget> = HashMap::new();
        for (provider, limit) in self.budgets {
            budgets.insert(provider.clone(), ProviderBudget::new(provider, limit));
        }
        for provider in &providers {
            let name = provider.name();
            if !budgets.contains_key(name) {
                budgets.insert(name.to_owned(), ProviderBudget::new(name, DEFAULT_DAILY_BUDGET));
            }
        }

        let registry_policy = self.aggregator.registry_policy;
        let aggregator = Arc::new(RegistryAggregator::new(
            store.clone(),
            records.clone(),
            search_cache,
            providers,
            budgets,
            self.aggregator,
        ));

        let github = match self.github_base_url {
            Some(url) => GithubStarsClient::with_base_url(self.github_token, url),
            None => GithubStarsClient::new(self.github_token),
        };
        let npm = match self.npm_base_url {
            Some(url) => NpmDownloadsClient::with_base_url(url),
            None => NpmDownloadsClient::new(),
        };
        let pypi = match self.pypi_base_url {
            Some(url) => PypiDownloadsClient::with_base_url(url),
            None => PypiDownloadsClient::new(),
        };
        let enricher = MetricsEnricher::new(store.clone(), github, npm, pypi, self.enricher);

        let sync_timer = self
            .sync_interval
            .map(|interval| aggregator.spawn_sync_timer(interval));

        Ok(ServerCatalog::new(
            store,
            records,
            aggregator,
            enricher,
            registry_policy,
            sync_timer,
        ))
    }
}

impl Default for MuninnBuilder {
    fn default() -> Self {
        Self::new()
    }
}
