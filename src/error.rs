//! Muninn error types

use std::time::Duration;

/// Muninn error types
#[derive(Debug, thiserror::Error)]
pub enum MuninnError {
    // Upstream/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("server not found: {0}")]
    ServerNotFound(String),

    /// Daily request budget for this provider is spent until the next UTC
    /// midnight. The aggregator should try the next provider in the chain.
    #[error("request budget exhausted for provider '{provider}'")]
    BudgetExhausted { provider: String },

    #[error("empty page from provider")]
    EmptyPage,

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Store errors
    #[error("store error: {0}")]
    Store(String),

    /// A write collided with an existing row on a unique key (id or active
    /// package name). Callers with enough context resolve this by updating
    /// the existing row instead.
    #[error("conflicting record: {0}")]
    Conflict(String),

    // Configuration errors
    #[error("no provider configured")]
    NoProvider,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl MuninnError {
    /// Whether a retry of the same request may plausibly succeed.
    ///
    /// Rate limits count as transient: the retry layer is expected to honor
    /// [`retry_after`](Self::retry_after) rather than hammering the upstream.
    pub fn is_transient(&self) -> bool {
        match self {
            MuninnError::Http(_) | MuninnError::RateLimited { .. } | MuninnError::EmptyPage => true,
            MuninnError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Upstream-instructed delay before the next attempt, if one was given.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            MuninnError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for MuninnError {
    fn from(err: reqwest::Error) -> Self {
        MuninnError::Http(err.to_string())
    }
}

impl From<sqlx::Error> for MuninnError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed") => {
                MuninnError::Conflict(db.message().to_string())
            }
            sqlx::Error::RowNotFound => MuninnError::ServerNotFound("row not found".to_string()),
            _ => MuninnError::Store(err.to_string()),
        }
    }
}

/// Result type alias for Muninn operations
pub type Result<T> = std::result::Result<T, MuninnError>;
