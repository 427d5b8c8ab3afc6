//! Exponential backoff with jitter for marketplace requests.

use std::time::Duration;

use rand::{Rng, thread_rng};

use crate::config::RateLimitPolicyConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per page, first request included
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
    pub jitter_factor: f64,
}

impl RetryPolicy {
    /// Delay before the retry following failed attempt number `attempt` (0-based).
    ///
    /// `min(base * 2^attempt, max)`, raised to the server's Retry-After hint,
    /// plus jitter in `[0, jitter_factor * delay)`. Never exceeds `max`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt.min(31)))
            .min(self.max);
        let delay = retry_after.map_or(exp, |hint| exp.max(hint));

        let jitter_cap = delay.as_secs_f64() * self.jitter_factor;
        let jitter = if jitter_cap > 0.0 {
            thread_rng().gen_range(0.0..jitter_cap)
        } else {
            0.0
        };

        (delay + Duration::from_secs_f64(jitter)).min(self.max)
    }
}

impl From<&RateLimitPolicyConfig> for RetryPolicy {
    fn from(cfg: &RateLimitPolicyConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base: Duration::from_millis(cfg.base_ms),
            max: Duration::from_millis(cfg.max_ms),
            jitter_factor: cfg.jitter_factor,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RateLimitPolicyConfig::default())
    }
}
