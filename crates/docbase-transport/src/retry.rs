//! Retry/backoff policy for the request engine (spec §4.4).

use std::time::Duration;

use rand::Rng;

/// Retry and timing policy for [`crate::RequestEngine`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts allowed, including the first. `3` by default.
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Cap on any single backoff delay.
    pub max_delay: Duration,
    /// Symmetric jitter fraction applied to each delay, in `[0.0, 1.0]`.
    pub jitter_factor: f64,
    /// Per-attempt wall-clock timeout for the HTTP round trip.
    pub attempt_timeout: Duration,
    /// Cap on the number of response bytes read per attempt.
    pub response_cap_bytes: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2000),
            jitter_factor: 0.25,
            attempt_timeout: Duration::from_secs(30),
            response_cap_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Compute the backoff delay that precedes the `failed_count`-th retry
/// (1-indexed: `failed_count=1` is the sleep after the first failed
/// attempt).
///
/// `min(base * 2^(failed_count - 1), cap) * (1 ± jitter)`, jitter sign
/// drawn uniformly.
pub fn compute_delay(config: &RetryConfig, failed_count: u32) -> Duration {
    compute_delay_with_rng(config, failed_count, &mut rand::thread_rng())
}

pub(crate) fn compute_delay_with_rng(config: &RetryConfig, failed_count: u32, rng: &mut impl Rng) -> Duration {
    let exponent = failed_count.saturating_sub(1);
    let nominal_ms = (config.base_delay.as_millis() as u64)
        .saturating_mul(2u64.saturating_pow(exponent))
        .min(config.max_delay.as_millis() as u64);

    let jitter = config.jitter_factor.clamp(0.0, 1.0);
    if jitter == 0.0 || nominal_ms == 0 {
        return Duration::from_millis(nominal_ms);
    }

    let sign: f64 = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
    let factor = 1.0 + sign * jitter;
    let millis = (nominal_ms as f64 * factor).max(0.0).round() as u64;
    Duration::from_millis(millis)
}
