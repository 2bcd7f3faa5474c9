//! Retry-delay computation for failed metric fetches.

/// Exponent saturates here; beyond it only the cap matters.
const MAX_EXPONENT: u32 = 5;

/// Jitter spread around the computed delay (fraction of the delay).
const JITTER_FRACTION: f64 = 0.1;

/// Delay before the next attempt after `retry_count` consecutive failures.
///
/// Doubles per retry from `base_delay_ms`, saturating the exponent at
/// 2^5, and never exceeds half of the metric's TTL so a flapping metric
/// still gets at least two attempts per TTL window. The returned delay
/// carries ±10% jitter to spread retries from servers that failed
/// together.
pub fn retry_delay_ms(base_delay_ms: i64, retry_count: u32, ttl_ms: i64) -> i64 {
    let exponent = retry_count.min(MAX_EXPONENT);
    let raw = base_delay_ms.saturating_mul(1_i64 << exponent);
    let capped = raw.min(ttl_ms / 2);
    jitter(capped)
}

/// Apply ±10% multiplicative jitter.
fn jitter(delay_ms: i64) -> i64 {
    let factor = 1.0 - JITTER_FRACTION + rand::random::<f64>() * (2.0 * JITTER_FRACTION);
    (delay_ms as f64 * factor) as i64
}
