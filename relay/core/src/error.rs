//! Error Types
//!
//! Two layers of errors flow through the relay:
//!
//! - [`AdapterError`]: a failure raised by a single adapter call. These are
//!   classified (see [`crate::resilience::classifier`]) and drive retry,
//!   fallback and circuit breaker decisions. Callers never see them directly
//!   unless the failure is terminal by policy.
//! - [`RelayError`]: the single terminal failure returned to callers of the
//!   orchestrator.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

// ============================================================================
// Adapter Errors
// ============================================================================

/// Fieldless discriminant of [`AdapterError`], used for classification and metrics
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorKind {
    InitializationFailed,
    ModelUnavailable,
    InvalidConfig,
    RequestFailed,
    Timeout,
    RateLimited,
    InvalidResponse,
    QuotaExceeded,
    AuthenticationFailed,
    NetworkError,
    Unknown,
}

impl std::fmt::Display for AdapterErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InitializationFailed => "initialization_failed",
            Self::ModelUnavailable => "model_unavailable",
            Self::InvalidConfig => "invalid_config",
            Self::RequestFailed => "request_failed",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::InvalidResponse => "invalid_response",
            Self::QuotaExceeded => "quota_exceeded",
            Self::AuthenticationFailed => "authentication_failed",
            Self::NetworkError => "network_error",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A failure raised by an adapter call
#[derive(Clone, Debug, Error, PartialEq)]
pub enum AdapterError {
    /// Adapter could not be initialized
    #[error("adapter initialization failed: {0}")]
    InitializationFailed(String),

    /// The backing model is not loaded or not serving
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Adapter configuration is invalid
    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),

    /// Request was rejected or failed in a generic way
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// The call did not complete before its deadline
    #[error("request timed out after {after:?}")]
    Timeout {
        /// Deadline that elapsed
        after: Duration,
    },

    /// Backend is throttling requests
    #[error("rate limited: {message}")]
    RateLimited {
        /// Backend message
        message: String,
        /// Retry-after hint supplied by the backend, if any
        retry_after: Option<Duration>,
    },

    /// Response failed validation at the adapter boundary
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Usage quota is exhausted
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Credentials were rejected
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Transport-level failure (connection refused, DNS, reset)
    #[error("network error: {0}")]
    NetworkError(String),

    /// Anything else
    #[error("unknown adapter error: {0}")]
    Unknown(String),
}

impl AdapterError {
    /// Get the fieldless kind of this error
    #[must_use]
    pub fn kind(&self) -> AdapterErrorKind {
        match self {
            Self::InitializationFailed(_) => AdapterErrorKind::InitializationFailed,
            Self::ModelUnavailable(_) => AdapterErrorKind::ModelUnavailable,
            Self::InvalidConfig(_) => AdapterErrorKind::InvalidConfig,
            Self::RequestFailed(_) => AdapterErrorKind::RequestFailed,
            Self::Timeout { .. } => AdapterErrorKind::Timeout,
            Self::RateLimited { .. } => AdapterErrorKind::RateLimited,
            Self::InvalidResponse(_) => AdapterErrorKind::InvalidResponse,
            Self::QuotaExceeded(_) => AdapterErrorKind::QuotaExceeded,
            Self::AuthenticationFailed(_) => AdapterErrorKind::AuthenticationFailed,
            Self::NetworkError(_) => AdapterErrorKind::NetworkError,
            Self::Unknown(_) => AdapterErrorKind::Unknown,
        }
    }

    /// Retry-after hint, only present on rate limiting
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Shorthand for a rate limit without a hint
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }
}

// ============================================================================
// Relay Errors
// ============================================================================

/// Terminal failure returned to orchestrator callers
#[derive(Debug, Error)]
pub enum RelayError {
    /// Every candidate in the fallback chain was ineligible or failed
    #[error("no healthy adapter available (attempted: [{}]){}", .attempted.join(", "), .last_error.as_ref().map(|e| format!(", last error: {e}")).unwrap_or_default())]
    NoHealthyAdapter {
        /// Adapters that were actually called, in order
        attempted: Vec<String>,
        /// Last failure observed, if any adapter was called
        last_error: Option<AdapterError>,
    },

    /// A failure that policy forbids retrying or falling back from
    #[error("adapter {adapter} failed: {source}")]
    Adapter {
        /// Adapter that raised the failure
        adapter: String,
        /// The failure
        #[source]
        source: AdapterError,
    },

    /// No adapter with this id is registered
    #[error("adapter not found: {0}")]
    AdapterNotFound(String),

    /// An adapter with this id is already registered
    #[error("adapter already registered: {0}")]
    DuplicateAdapter(String),

    /// Adapter failed to initialize during registration
    #[error("adapter {adapter} failed to initialize: {source}")]
    Initialization {
        /// Adapter being registered
        adapter: String,
        /// The failure
        #[source]
        source: AdapterError,
    },

    /// The orchestrator was disposed while the operation was waiting
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration could not be loaded or validated
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RelayError {
    /// Check if this is the aggregated "no healthy adapter" condition
    #[must_use]
    pub fn is_no_healthy_adapter(&self) -> bool {
        matches!(self, Self::NoHealthyAdapter { .. })
    }
}

/// Result alias for orchestrator operations
pub type RelayResult<T> = Result<T, RelayError>;
