//! Error Classifier
//!
//! Maps an [`AdapterError`] to severity, retryability and a recovery
//! strategy. The resilience manager consults the classification after every
//! failed attempt to decide between retrying, falling back and aborting.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, AdapterErrorKind};

/// Attempt cap enforced by [`should_retry`] regardless of configuration
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// How serious a failure is
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// How an adapter is expected to recover
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Retry right away
    Immediate,
    /// Retry after a cooldown
    Delayed,
    /// Needs operator action (credentials, billing, config)
    Manual,
    /// Let the circuit breaker decide when to probe again
    CircuitBreaker,
}

/// Result of classifying a failure
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    /// Effective kind (an `Unknown` error mentioning connection failure becomes `NetworkError`)
    pub kind: AdapterErrorKind,
    pub severity: Severity,
    pub retryable: bool,
    pub fallback_recommended: bool,
    pub recovery_strategy: RecoveryStrategy,
    pub estimated_recovery: Option<Duration>,
}

impl ErrorClassification {
    fn new(
        kind: AdapterErrorKind,
        severity: Severity,
        retryable: bool,
        recovery_strategy: RecoveryStrategy,
    ) -> Self {
        Self {
            kind,
            severity,
            retryable,
            fallback_recommended: true,
            recovery_strategy,
            estimated_recovery: None,
        }
    }

    fn recovers_in(mut self, after: Duration) -> Self {
        self.estimated_recovery = Some(after);
        self
    }

    fn without_fallback(mut self) -> Self {
        self.fallback_recommended = false;
        self
    }
}

/// Message fragments that mark an otherwise unknown error as a network failure
const NETWORK_MARKERS: &[&str] = &[
    "connection refused",
    "econnrefused",
    "enotfound",
    "dns",
    "connection reset",
];

fn looks_like_network(message: &str) -> bool {
    let lowered = message.to_lowercase();
    NETWORK_MARKERS.iter().any(|m| lowered.contains(m))
}

/// Classify a failure
pub fn classify(error: &AdapterError) -> ErrorClassification {
    use AdapterErrorKind as K;
    use RecoveryStrategy::{CircuitBreaker, Delayed, Immediate, Manual};
    use Severity::{Critical, High, Low, Medium};

    match error {
        AdapterError::RateLimited { retry_after, .. } => {
            ErrorClassification::new(K::RateLimited, Medium, true, Delayed)
                .recovers_in(retry_after.unwrap_or(Duration::from_secs(60)))
        }
        AdapterError::QuotaExceeded(_) => {
            ErrorClassification::new(K::QuotaExceeded, High, false, Manual)
        }
        AdapterError::ModelUnavailable(_) => {
            ErrorClassification::new(K::ModelUnavailable, High, true, CircuitBreaker)
                .recovers_in(Duration::from_secs(30))
        }
        AdapterError::AuthenticationFailed(_) => {
            ErrorClassification::new(K::AuthenticationFailed, Critical, false, Manual)
        }
        AdapterError::Timeout { .. } => {
            ErrorClassification::new(K::Timeout, Medium, true, Immediate)
        }
        AdapterError::NetworkError(_) => {
            ErrorClassification::new(K::NetworkError, High, true, Delayed)
                .recovers_in(Duration::from_secs(5))
        }
        AdapterError::InitializationFailed(_) => {
            ErrorClassification::new(K::InitializationFailed, High, false, Manual)
        }
        AdapterError::InvalidConfig(_) => {
            ErrorClassification::new(K::InvalidConfig, Critical, false, Manual).without_fallback()
        }
        AdapterError::RequestFailed(_) => {
            ErrorClassification::new(K::RequestFailed, Medium, true, Immediate)
        }
        AdapterError::InvalidResponse(_) => {
            ErrorClassification::new(K::InvalidResponse, Low, true, Immediate)
        }
        AdapterError::Unknown(message) if looks_like_network(message) => {
            ErrorClassification::new(K::NetworkError, High, true, Delayed)
                .recovers_in(Duration::from_secs(5))
        }
        AdapterError::Unknown(_) => ErrorClassification::new(K::Unknown, Medium, false, Manual),
    }
}

/// Whether another attempt should be made after `attempts` failed attempts
pub fn should_retry(error: &AdapterError, attempts: u32) -> bool {
    classify(error).retryable && attempts < MAX_RETRY_ATTEMPTS
}

/// Whether the next fallback candidate should be tried
pub fn should_fallback(error: &AdapterError) -> bool {
    classify(error).fallback_recommended
}
