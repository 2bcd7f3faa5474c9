//! Per-provider daily request budgets.
//!
//! Upstream catalog registries tolerate a bounded number of requests per
//! day. [`ProviderBudget`] is a token bucket that refills in full at UTC
//! midnight; consumption is checked before every upstream call. A denied
//! request is not an error — the aggregator redirects flow (fallback
//! provider, or cache-only) instead.
//!
//! The reset is lazy: no timer task, just a window check on first use past
//! the boundary. State is process-local by design; budgets guard courtesy
//! limits, not hard quotas, so restarts forgiving a day's spend is fine.

use std::sync::Mutex;

use crate::telemetry;

const DAY_MS: i64 = 86_400_000;

/// Daily request budget for one upstream provider.
///
/// Shared across tasks behind `Arc`; interior state is a small mutex, held
/// only for the arithmetic.
#[derive(Debug)]
pub struct ProviderBudget {
    provider: String,
    daily_limit: u32,
    window: Mutex<BudgetWindow>,
}

#[derive(Debug)]
struct BudgetWindow {
    consumed: u32,
    resets_at_ms: i64,
}

impl ProviderBudget {
    /// Create a budget of `daily_limit` requests per UTC day.
    pub fn new(provider: impl Into<String>, daily_limit: u32) -> Self {
        Self {
            provider: provider.into(),
            daily_limit,
            window: Mutex::new(BudgetWindow {
                consumed: 0,
                resets_at_ms: 0,
            }),
        }
    }

    /// Provider this budget guards.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Configured daily limit.
    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    /// Consume one request from today's budget.
    ///
    /// Returns `false` when the day's allowance is spent; the caller must
    /// not issue the request. Emits a denial counter so exhaustion shows up
    /// in dashboards before users notice degraded search.
    pub fn try_consume(&self, now_ms: i64) -> bool {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        if now_ms >= window.resets_at_ms {
            window.consumed = 0;
            window.resets_at_ms = next_utc_midnight_ms(now_ms);
        }
        if window.consumed >= self.daily_limit {
            metrics::counter!(telemetry::BUDGET_DENIED_TOTAL,
                "provider" => self.provider.clone(),
            )
            .increment(1);
            return false;
        }
        window.consumed += 1;
        true
    }

    /// Requests left in the current UTC day.
    pub fn remaining(&self, now_ms: i64) -> u32 {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        if now_ms >= window.resets_at_ms {
            window.consumed = 0;
            window.resets_at_ms = next_utc_midnight_ms(now_ms);
        }
        self.daily_limit.saturating_sub(window.consumed)
    }

    /// Epoch-ms instant at which the budget next refills.
    pub fn resets_at(&self, now_ms: i64) -> i64 {
        let window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        if now_ms >= window.resets_at_ms {
            next_utc_midnight_ms(now_ms)
        } else {
            window.resets_at_ms
        }
    }
}

/// The UTC midnight strictly after `now_ms`.
///
/// The epoch is itself a UTC midnight, so day arithmetic is exact; no
/// calendar lookup needed.
fn next_utc_midnight_ms(now_ms: i64) -> i64 {
    (now_ms.div_euclid(DAY_MS) + 1) * DAY_MS
}
