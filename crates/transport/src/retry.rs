//! Retry logic with exponential backoff and jitter.

use std::time::Duration;

use invokelens_config::RetryConfig;
use invokelens_core::DeliveryError;
use rand::Rng;

/// How failed HTTP deliveries are retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Growth factor between consecutive retries.
    pub multiplier: f64,
    /// Ceiling for the un-jittered delay.
    pub max_backoff: Duration,
    /// Jitter factor (0.0 to 1.0): the delay is scaled by a uniform
    /// factor in `[1 - jitter, 1 + jitter]`.
    pub jitter: f64,
    /// Retry 4xx responses like any other failure.
    pub retry_client_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff(),
            multiplier: config.multiplier,
            max_backoff: config.max_backoff(),
            jitter: config.jitter.clamp(0.0, 1.0),
            retry_client_errors: config.retry_client_errors,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries (single attempt only).
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Un-jittered delay before retry number `retry` (0-indexed):
    /// `initial_backoff * multiplier^retry`, capped at `max_backoff`.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exp = self.multiplier.powi(retry.min(64) as i32);
        let millis = self.initial_backoff.as_millis() as f64 * exp;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Delay before retry number `retry`, with jitter applied.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::rng().random_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        base.mul_f64(factor)
    }

    /// Whether another attempt should follow attempt number `attempt` (1-based)
    /// that failed with `error`.
    pub fn should_retry(&self, error: &DeliveryError, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        match error {
            DeliveryError::Serialization(_) => false,
            e if e.is_client_error() => self.retry_client_errors,
            _ => true,
        }
    }
}
