//! Resilience Layer
//!
//! Everything between "call this operation" and "an adapter was called":
//!
//! - [`circuit_breaker`]: per-adapter failure gates
//! - [`cache`]: tagged TTL cache with LRU eviction, per level
//! - [`classifier`]: failure severity, retryability and recovery strategy
//! - [`fallback`]: ordered candidate chains per request
//! - [`timeout`]: deadline and cancellation racing
//! - [`retry`]: exponential backoff
//! - [`bulkhead`]: per-group concurrency isolation
//! - [`manager`]: the composition of all of the above
//!
//! # Thread Safety
//!
//! All types here are designed for concurrent access:
//! - Breakers use one mutex per adapter, never a global lock
//! - Caches use a mutex per level, never held across an await
//! - Counters use atomics

pub mod bulkhead;
pub mod cache;
pub mod circuit_breaker;
pub mod classifier;
pub mod fallback;
pub mod manager;
pub mod retry;
pub mod timeout;

pub use bulkhead::{BulkheadStats, Bulkheads, IsolationGroupConfig};
pub use cache::{Cache, CacheConfig, CacheEntry, CacheLevel, CacheLevelConfig, CacheStats};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitMetrics, CircuitState,
    Transition,
};
pub use classifier::{
    classify, should_fallback, should_retry, ErrorClassification, RecoveryStrategy, Severity,
};
pub use fallback::{
    FallbackChain, FallbackChainResolver, FallbackConfig, FallbackEntry, FallbackStrategy,
};
pub use manager::{
    AdapterHealth, Execution, ExecutionCounters, Rejection, ResilienceManager, ResilienceStats,
};
pub use retry::{RetryConfig, RetryPolicy};
pub use timeout::{AttemptError, TimeoutConfig, TimeoutExecutor};
