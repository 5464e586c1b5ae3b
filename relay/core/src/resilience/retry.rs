//! Retry Policy
//!
//! Exponential backoff between attempts against a single adapter:
//! `delay = base_delay * multiplier^(retry - 1)`, capped at `max_delay`.
//! A rate-limit retry-after hint raises the delay for that retry.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AdapterError;

/// Retry configuration for failed adapter calls
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_delay_ms: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f64,

    /// Maximum backoff delay
    pub max_delay_ms: u64,

    /// Add up to 25% jitter to each delay
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            use_jitter: false,
        }
    }
}

/// Computes backoff delays from a [`RetryConfig`]
#[derive(Clone, Debug, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Retries allowed after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Backoff before retry N (1-indexed)
    pub fn backoff_for_retry(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.config.base_delay_ms as f64 * self.config.backoff_multiplier.powi(exponent);
        let capped = base.min(self.config.max_delay_ms as f64);

        let duration_ms = if self.config.use_jitter {
            let jitter = rand::random::<f64>() * 0.25;
            (capped * (1.0 + jitter)).min(self.config.max_delay_ms as f64)
        } else {
            capped
        };

        Duration::from_millis(duration_ms as u64)
    }

    /// Backoff before retry N after `error`, honouring a retry-after hint
    pub fn delay_for(&self, retry: u32, error: &AdapterError) -> Duration {
        let computed = self.backoff_for_retry(retry);
        match error.retry_after() {
            Some(hint) => hint
                .max(computed)
                .min(Duration::from_millis(self.config.max_delay_ms)),
            None => computed,
        }
    }
}
