//! Freshness tiers and the policy that assigns them.
//!
//! Every cached artifact in muninn — search-cache entries, per-registry sync
//! state, per-server metric values — ages through the same three tiers:
//!
//! - [`Freshness::Fresh`]: serve directly, no background work.
//! - [`Freshness::Stale`]: serve, but refresh in the background.
//! - [`Freshness::Expired`]: treat as absent; refresh in the foreground.
//!
//! A [`FreshnessPolicy`] is just the pair of windows that separates the
//! tiers. The tier computation is a pure function of `(now, reference)`,
//! which keeps every caller trivially testable with pinned clocks.
//!
//! ```rust
//! # use muninn::{Freshness, FreshnessPolicy};
//! let policy = FreshnessPolicy::new(60_000, 300_000);
//! assert_eq!(policy.tier(100_000, Some(50_000)), Freshness::Fresh);
//! assert_eq!(policy.tier(200_000, Some(50_000)), Freshness::Stale);
//! assert_eq!(policy.tier(400_000, Some(50_000)), Freshness::Expired);
//! ```

use serde::{Deserialize, Serialize};

/// Age tier of a cached artifact relative to a [`FreshnessPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Within the fresh window: serve as-is.
    Fresh,
    /// Past the fresh window but within the TTL: serve and revalidate.
    Stale,
    /// Past the TTL, or never recorded: treat as absent.
    Expired,
}

impl Freshness {
    /// Label used for metrics and structured log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Fresh => "fresh",
            Freshness::Stale => "stale",
            Freshness::Expired => "expired",
        }
    }
}

/// Two-window freshness policy, in epoch milliseconds.
///
/// `fresh_ms` must not exceed `ttl_ms`; [`FreshnessPolicy::new`] clamps
/// rather than panics so a misconfigured policy degrades to "everything
/// revalidates" instead of aborting the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    /// Age up to which an artifact is served without any refresh.
    pub fresh_ms: i64,
    /// Age past which an artifact no longer counts as present.
    pub ttl_ms: i64,
}

impl FreshnessPolicy {
    /// Create a policy with an explicit fresh window and TTL.
    pub fn new(fresh_ms: i64, ttl_ms: i64) -> Self {
        Self {
            fresh_ms: fresh_ms.min(ttl_ms),
            ttl_ms,
        }
    }

    /// Policy whose fresh window is half the TTL.
    ///
    /// The common split for metric schedules and the search cache default.
    pub fn halved(ttl_ms: i64) -> Self {
        Self::new(ttl_ms / 2, ttl_ms)
    }

    /// Compute the tier of an artifact last refreshed at `reference_ms`.
    ///
    /// `None` (never refreshed) is `Expired`. A reference in the future
    /// (clock skew, restored backup) has age zero and is `Fresh`.
    pub fn tier(&self, now_ms: i64, reference_ms: Option<i64>) -> Freshness {
        let Some(reference_ms) = reference_ms else {
            return Freshness::Expired;
        };
        let age = (now_ms - reference_ms).max(0);
        if age <= self.fresh_ms {
            Freshness::Fresh
        } else if age <= self.ttl_ms {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    /// Whether an artifact refreshed at `reference_ms` is still fresh.
    pub fn is_fresh(&self, now_ms: i64, reference_ms: Option<i64>) -> bool {
        self.tier(now_ms, reference_ms) == Freshness::Fresh
    }
}

/// Current time as epoch milliseconds.
///
/// The single clock read used across the crate; tests pass explicit
/// `now_ms` values instead of stubbing this.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
