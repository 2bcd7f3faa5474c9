//! Server record types.
//!
//! [`ServerRecord`] is the canonical shape for one catalog entry, identical
//! across upstream providers, the persistent store, and the public API.
//! Identity is the registry-scoped `id`; a non-null `package_name` acts as a
//! secondary uniqueness key among active records.

use serde::{Deserialize, Serialize};

/// Package ecosystem a server is distributed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageRegistry {
    /// npm (Node.js).
    Npm,
    /// PyPI (Python).
    #[serde(rename = "pypi")]
    PyPi,
}

impl PackageRegistry {
    /// Stable string form used in the store and in canonical query strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageRegistry::Npm => "npm",
            PackageRegistry::PyPi => "pypi",
        }
    }

    /// Parse a registry name leniently (upstreams disagree on casing).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "npm" => Some(PackageRegistry::Npm),
            "pypi" | "pip" => Some(PackageRegistry::PyPi),
            _ => None,
        }
    }
}

/// One cached catalog entry.
///
/// Timestamps are epoch milliseconds. Popularity metrics are `None` until
/// the enricher (or an upstream payload) produces a value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Registry-scoped identifier (primary key).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Short description.
    pub description: String,
    /// Author or publisher, if known.
    pub author: Option<String>,
    /// Version string, if known.
    pub version: Option<String>,
    /// Homepage URL.
    pub homepage: Option<String>,
    /// Source repository URL.
    pub repository_url: Option<String>,
    /// Package ecosystem, when the server ships as a package.
    pub package_registry: Option<PackageRegistry>,
    /// Package name within `package_registry`.
    pub package_name: Option<String>,
    /// Explicit install command, when the upstream provides one.
    pub install_command: Option<String>,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Category, when the upstream assigns one.
    pub category: Option<String>,
    /// SPDX-ish license string.
    pub license: Option<String>,
    /// Upstream registry this record was sourced from.
    pub registry: String,
    /// Download/install count, when known.
    pub install_count: Option<i64>,
    /// Upstream rating, when known.
    pub rating: Option<f64>,
    /// Source-repository star count, when known.
    pub star_count: Option<i64>,
    /// Inactive records are hidden from search and release their
    /// `package_name` uniqueness claim.
    pub is_active: bool,
    /// First cached, epoch ms.
    pub created_at_ms: i64,
    /// Last written, epoch ms.
    pub updated_at_ms: i64,
}

impl ServerRecord {
    /// Create a minimal active record; everything else via `with_*`.
    pub fn new(id: impl Into<String>, name: impl Into<String>, registry: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            author: None,
            version: None,
            homepage: None,
            repository_url: None,
            package_registry: None,
            package_name: None,
            install_command: None,
            tags: Vec::new(),
            category: None,
            license: None,
            registry: registry.into(),
            install_count: None,
            rating: None,
            star_count: None,
            is_active: true,
            created_at_ms: 0,
            updated_at_ms: 0,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the author.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Set the source repository URL.
    pub fn with_repository_url(mut self, url: impl Into<String>) -> Self {
        self.repository_url = Some(url.into());
        self
    }

    /// Set the package ecosystem and name.
    pub fn with_package(mut self, registry: PackageRegistry, name: impl Into<String>) -> Self {
        self.package_registry = Some(registry);
        self.package_name = Some(name.into());
        self
    }

    /// Add a tag (duplicates ignored).
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Derived lowercase text blob the store indexes for substring search.
    pub fn search_text(&self) -> String {
        let mut parts: Vec<&str> = vec![&self.name, &self.description];
        if let Some(author) = &self.author {
            parts.push(author);
        }
        if let Some(package) = &self.package_name {
            parts.push(package);
        }
        for tag in &self.tags {
            parts.push(tag);
        }
        if let Some(license) = &self.license {
            parts.push(license);
        }
        parts.join(" ").to_lowercase()
    }

    /// Resolve the runnable install command for this record, if any.
    ///
    /// Resolution order: explicit command, then ecosystem convention
    /// (`npx -y` for npm, `uvx` for PyPI), then a GitHub repository URL
    /// normalized to an `npx` github spec.
    pub fn resolved_install_command(&self) -> Option<String> {
        if let Some(cmd) = &self.install_command {
            let cmd = cmd.trim();
            if !cmd.is_empty() {
                return Some(cmd.to_string());
            }
        }
        if let Some(name) = self.package_name.as_deref().map(str::trim)
            && !name.is_empty()
        {
            match self.package_registry {
                Some(PackageRegistry::Npm) => return Some(format!("npx -y {name}")),
                Some(PackageRegistry::PyPi) => return Some(format!("uvx {name}")),
                None => {}
            }
        }
        if let Some((owner, repo)) = self.repository_url.as_deref().and_then(parse_github_repo) {
            return Some(format!("npx -y github:{owner}/{repo}"));
        }
        None
    }

    /// Whether this record resolves to a runnable install command.
    pub fn is_installable(&self) -> bool {
        self.resolved_install_command().is_some()
    }

    /// Key used to deduplicate records across providers: package name,
    /// else repository URL, else lowercased name.
    pub fn dedup_key(&self) -> String {
        if let Some(package) = self.package_name.as_deref().map(str::trim)
            && !package.is_empty()
        {
            return format!("pkg:{}", package.to_lowercase());
        }
        if let Some(repo) = self.repository_url.as_deref().map(str::trim)
            && !repo.is_empty()
        {
            return format!("repo:{}", repo.trim_end_matches('/').to_lowercase());
        }
        format!("name:{}", self.name.trim().to_lowercase())
    }
}

/// Extract `(owner, repo)` from the GitHub URL forms that appear in
/// registry payloads: https/http/git schemes, `git+` prefixes, ssh remotes,
/// bare `github.com/...`, `github:owner/repo` shorthand, and trailing `.git`.
pub fn parse_github_repo(url: &str) -> Option<(String, String)> {
    let trimmed = url.trim().trim_start_matches("git+");
    let rest = trimmed
        .strip_prefix("https://github.com/")
        .or_else(|| trimmed.strip_prefix("http://github.com/"))
        .or_else(|| trimmed.strip_prefix("git://github.com/"))
        .or_else(|| trimmed.strip_prefix("git@github.com:"))
        .or_else(|| trimmed.strip_prefix("github.com/"))
        .or_else(|| trimmed.strip_prefix("github:"))?;

    let mut parts = rest.split('/');
    let owner = parts.next()?.trim();
    let repo = parts.next()?.trim();
    let repo = repo
        .split(['?', '#'])
        .next()
        .unwrap_or(repo)
        .trim_end_matches(".git");

    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}
