//! Resilience Manager
//!
//! Composes breakers, caches, classifier, resolver, retry policy, timeouts and
//! bulkheads behind one contract: [`ResilienceManager::execute_with_resilience`].
//!
//! # Execution
//!
//! ```text
//! resolve chain ──> for each candidate, strictly in order:
//!                     breaker.can_execute()?  ── no ──> skip
//!                     adapter.is_available()? ── no ──> record failure, skip
//!                     loop:
//!                       bulkhead permit + timeout-bounded attempt
//!                       ok  ──> breaker.on_success(), return
//!                       err ──> breaker.on_failure(), classify
//!                               abort | retry after backoff | advance
//!                   ──> NoHealthyAdapter
//! ```
//!
//! Candidates are never raced against each other; hedging is not performed.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::bulkhead::{BulkheadStats, Bulkheads};
use super::cache::{Cache, CacheLevel, CacheStats};
use super::circuit_breaker::{
    CircuitBreaker, CircuitBreakerRegistry, CircuitMetrics, CircuitState, Transition,
};
use super::classifier::{self, classify};
use super::fallback::{FallbackChain, FallbackChainResolver};
use super::retry::RetryPolicy;
use super::timeout::{AttemptError, TimeoutExecutor};
use crate::adapter::{AdapterIdentity, ModelAdapter, PrivacyLevel};
use crate::config::RelayConfig;
use crate::context::RequestContext;
use crate::error::{AdapterError, RelayError, RelayResult};

// ============================================================================
// Results and Stats
// ============================================================================

/// A successful execution and how it was reached
#[derive(Clone, Debug)]
pub struct Execution<T> {
    /// The operation's value
    pub value: T,
    /// Adapter that produced it
    pub adapter: String,
    /// Adapters actually called, in order
    pub adapters_used: Vec<String>,
    /// Retries across all candidates
    pub retries: u32,
    /// Position of the serving adapter in the chain (0 = primary)
    pub fallback_depth: usize,
}

/// Health view of one adapter derived from its breaker, without probing it
#[derive(Clone, Debug, Serialize)]
pub struct AdapterHealth {
    pub adapter_id: String,
    pub privacy: PrivacyLevel,
    pub circuit_state: CircuitState,
    /// Whether the breaker currently lets calls through
    pub healthy: bool,
    pub total_successes: u64,
    pub total_failures: u64,
}

/// Cumulative counters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionCounters {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    /// Times execution advanced past a candidate
    pub fallbacks: u64,
    pub circuit_trips: u64,
}

#[derive(Default)]
struct Counters {
    executions: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    fallbacks: AtomicU64,
    circuit_trips: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ExecutionCounters {
        ExecutionCounters {
            executions: self.executions.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            circuit_trips: self.circuit_trips.load(Ordering::Relaxed),
        }
    }
}

/// Why an adapter was not called
#[derive(Clone, Debug, PartialEq)]
pub enum Rejection {
    /// Its breaker is not admitting calls
    CircuitOpen,
    /// It failed the live availability probe
    Unavailable(AdapterError),
}

/// Read-only resilience snapshot
#[derive(Clone, Debug, Serialize)]
pub struct ResilienceStats {
    pub generated_at: DateTime<Utc>,
    pub circuits: Vec<CircuitMetrics>,
    pub caches: BTreeMap<CacheLevel, CacheStats>,
    pub bulkheads: Vec<BulkheadStats>,
    pub health: Vec<AdapterHealth>,
    pub counters: ExecutionCounters,
}

// ============================================================================
// Resilience Manager
// ============================================================================

/// Owns per-adapter breakers and per-level caches
pub struct ResilienceManager {
    breakers: CircuitBreakerRegistry,
    caches: BTreeMap<CacheLevel, Cache<serde_json::Value>>,
    cache_enabled: bool,
    resolver: FallbackChainResolver,
    retry: RetryPolicy,
    timeouts: TimeoutExecutor,
    bulkheads: Bulkheads,
    counters: Counters,
}

impl ResilienceManager {
    /// Build from configuration; `cancel` aborts every wait when cancelled
    #[must_use]
    pub fn new(config: &RelayConfig, cancel: CancellationToken) -> Self {
        let caches = CacheLevel::ALL
            .into_iter()
            .filter(|level| config.cache.level(*level).enabled)
            .map(|level| {
                (
                    level,
                    Cache::new(level.to_string(), config.cache.level(level).clone()),
                )
            })
            .collect();

        Self {
            breakers: CircuitBreakerRegistry::new(
                config.circuit_breaker.clone(),
                config.circuit_breaker_overrides.clone(),
            ),
            caches,
            cache_enabled: config.cache.enabled,
            resolver: FallbackChainResolver::new(config.fallback.clone(), config.privacy_level),
            retry: RetryPolicy::new(config.retry.clone()),
            timeouts: TimeoutExecutor::new(config.timeouts.clone(), cancel),
            bulkheads: Bulkheads::new(&config.isolation_groups),
            counters: Counters::default(),
        }
    }

    pub fn resolver(&self) -> &FallbackChainResolver {
        &self.resolver
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn timeouts(&self) -> &TimeoutExecutor {
        &self.timeouts
    }

    /// Resolve the chain for `context` over `adapters`
    pub fn resolve_chain(
        &self,
        adapters: &[Arc<dyn ModelAdapter>],
        context: &RequestContext,
    ) -> Option<FallbackChain> {
        let identities: Vec<AdapterIdentity> =
            adapters.iter().map(|a| a.identity().clone()).collect();
        self.resolver.resolve(context, &identities)
    }

    fn record_failure(&self, breaker: &CircuitBreaker) {
        if breaker.on_failure() == Transition::Opened {
            self.counters.circuit_trips.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Gate and probe one adapter, recording a failed probe on its breaker
    ///
    /// Returns the breaker when the adapter may be called.
    pub async fn admit(&self, adapter: &dyn ModelAdapter) -> Result<Arc<CircuitBreaker>, Rejection> {
        let breaker = self.breakers.get_or_create(adapter.id());
        if !breaker.can_execute() {
            tracing::debug!(adapter = %adapter.id(), "Skipping adapter, circuit open");
            return Err(Rejection::CircuitOpen);
        }
        if !adapter.is_available().await {
            self.record_failure(&breaker);
            tracing::info!(adapter = %adapter.id(), "Adapter failed availability probe");
            return Err(Rejection::Unavailable(AdapterError::ModelUnavailable(format!(
                "{} failed availability probe",
                adapter.id()
            ))));
        }
        Ok(breaker)
    }

    /// One bulkhead-bounded, timeout-bounded attempt, recorded on the breaker
    pub async fn attempt<T, Fut>(
        &self,
        adapter_id: &str,
        breaker: &CircuitBreaker,
        context: &RequestContext,
        operation: Fut,
    ) -> Result<T, AttemptError>
    where
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let deadline = self.timeouts.timeout_for(context.complexity);
        let outcome = {
            let _permit = self.bulkheads.acquire(adapter_id).await?;
            self.timeouts.execute(deadline, operation).await
        };

        match &outcome {
            Ok(_) => {
                breaker.on_success();
            }
            Err(AttemptError::Adapter(_)) => self.record_failure(breaker),
            Err(AttemptError::Cancelled) => {}
        }
        outcome
    }

    /// Execute `operation` against the fallback chain for `context`
    ///
    /// `adapters` is the registry snapshot in registration order. Per-candidate
    /// failures are logged; only the final blocking condition is returned.
    pub async fn execute_with_resilience<T, F, Fut>(
        &self,
        adapters: &[Arc<dyn ModelAdapter>],
        context: &RequestContext,
        operation: F,
    ) -> RelayResult<Execution<T>>
    where
        F: Fn(Arc<dyn ModelAdapter>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, AdapterError>> + Send,
        T: Send,
    {
        if self.timeouts.is_cancelled() {
            return Err(RelayError::Cancelled);
        }
        self.counters.executions.fetch_add(1, Ordering::Relaxed);

        let result = self.walk_chain(adapters, context, &operation).await;
        match &result {
            Ok(_) => self.counters.successes.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.counters.failures.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    async fn walk_chain<T, F, Fut>(
        &self,
        adapters: &[Arc<dyn ModelAdapter>],
        context: &RequestContext,
        operation: &F,
    ) -> RelayResult<Execution<T>>
    where
        F: Fn(Arc<dyn ModelAdapter>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, AdapterError>> + Send,
        T: Send,
    {
        let Some(chain) = self.resolve_chain(adapters, context) else {
            tracing::warn!("No registered adapter satisfies the request policy");
            return Err(RelayError::NoHealthyAdapter {
                attempted: Vec::new(),
                last_error: None,
            });
        };

        let mut attempted: Vec<String> = Vec::new();
        let mut last_error: Option<AdapterError> = None;
        let mut retries_total = 0u32;

        for (depth, adapter_id) in chain.candidates().enumerate() {
            if depth > 0 {
                self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(adapter = %adapter_id, depth, "Advancing fallback chain");
            }
            let Some(adapter) = adapters.iter().find(|a| a.id() == adapter_id) else {
                continue;
            };

            let breaker = match self.admit(adapter.as_ref()).await {
                Ok(breaker) => breaker,
                Err(Rejection::CircuitOpen) => continue,
                Err(Rejection::Unavailable(err)) => {
                    last_error = Some(err);
                    continue;
                }
            };
            attempted.push(adapter_id.to_string());

            let mut retry = 0u32;
            loop {
                let outcome = self
                    .attempt(adapter_id, &breaker, context, operation(adapter.clone()))
                    .await;

                let err = match outcome {
                    Ok(value) => {
                        return Ok(Execution {
                            value,
                            adapter: adapter_id.to_string(),
                            adapters_used: attempted,
                            retries: retries_total,
                            fallback_depth: depth,
                        });
                    }
                    Err(AttemptError::Cancelled) => return Err(RelayError::Cancelled),
                    Err(AttemptError::Adapter(err)) => err,
                };

                let classification = classify(&err);
                tracing::warn!(
                    adapter = %adapter_id,
                    attempt = retry + 1,
                    kind = %classification.kind,
                    error = %err,
                    "Adapter attempt failed"
                );

                if !classification.retryable && !classification.fallback_recommended {
                    return Err(RelayError::Adapter {
                        adapter: adapter_id.to_string(),
                        source: err,
                    });
                }

                let may_retry =
                    retry < self.retry.max_retries() && classifier::should_retry(&err, retry);
                if !may_retry {
                    last_error = Some(err);
                    break;
                }

                retry += 1;
                retries_total += 1;
                self.counters.retries.fetch_add(1, Ordering::Relaxed);

                let delay = self.retry.delay_for(retry, &err);
                last_error = Some(err);
                tracing::debug!(adapter = %adapter_id, retry, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                if let Err(AttemptError::Cancelled) = self.timeouts.sleep(delay).await {
                    return Err(RelayError::Cancelled);
                }

                if !breaker.can_execute() {
                    tracing::info!(adapter = %adapter_id, "Circuit stopped admitting calls, abandoning retries");
                    break;
                }
            }
        }

        tracing::warn!(
            attempted = ?attempted,
            last_error = ?last_error.as_ref().map(ToString::to_string),
            "Fallback chain exhausted"
        );
        Err(RelayError::NoHealthyAdapter {
            attempted,
            last_error,
        })
    }

    // ------------------------------------------------------------------------
    // Caching
    // ------------------------------------------------------------------------

    /// Whether result caching is on
    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled && !self.caches.is_empty()
    }

    /// Cache for one level, if that level is enabled
    pub fn cache(&self, level: CacheLevel) -> Option<&Cache<serde_json::Value>> {
        self.caches.get(&level)
    }

    /// Look a key up level by level, promoting hits into faster levels
    pub fn cache_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.cache_enabled() {
            return None;
        }

        let mut missed: Vec<&Cache<serde_json::Value>> = Vec::new();
        for cache in self.caches.values() {
            if let Some(value) = cache.get(key) {
                let tags = cache.entry(key).map(|e| e.tags).unwrap_or_default();
                for faster in missed {
                    faster.set(key, value.clone(), None, tags.iter().cloned());
                }
                return serde_json::from_value(value).ok();
            }
            missed.push(cache);
        }
        None
    }

    /// Write a value to every enabled level
    pub fn cache_set<T: Serialize>(&self, key: &str, value: &T, tags: &[String]) {
        if !self.cache_enabled() {
            return;
        }
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(key, error = %e, "Skipping cache write for unserializable value");
                return;
            }
        };
        for cache in self.caches.values() {
            cache.set(key, value.clone(), None, tags.iter().cloned());
        }
    }

    /// Invalidate tagged entries across levels; returns the count removed
    pub fn invalidate_by_tags(&self, tags: &[&str]) -> usize {
        self.caches
            .values()
            .map(|c| c.invalidate_by_tags(tags))
            .sum()
    }

    pub fn clear_caches(&self) {
        for cache in self.caches.values() {
            cache.clear();
        }
    }

    // ------------------------------------------------------------------------
    // Stats and lifecycle
    // ------------------------------------------------------------------------

    pub fn counters(&self) -> ExecutionCounters {
        self.counters.snapshot()
    }

    /// Health derived from breakers; adapters are not probed
    pub fn health(&self, adapters: &[Arc<dyn ModelAdapter>]) -> Vec<AdapterHealth> {
        adapters
            .iter()
            .map(|adapter| {
                // An adapter that was never called has no breaker yet and reads as closed
                let (circuit_state, total_successes, total_failures) =
                    match self.breakers.get(adapter.id()) {
                        Some(breaker) => {
                            let metrics = breaker.metrics();
                            (metrics.state, metrics.total_successes, metrics.total_failures)
                        }
                        None => (CircuitState::Closed, 0, 0),
                    };
                AdapterHealth {
                    adapter_id: adapter.id().to_string(),
                    privacy: adapter.identity().privacy,
                    healthy: circuit_state != CircuitState::Open,
                    circuit_state,
                    total_successes,
                    total_failures,
                }
            })
            .collect()
    }

    pub fn stats(&self, adapters: &[Arc<dyn ModelAdapter>]) -> ResilienceStats {
        ResilienceStats {
            generated_at: Utc::now(),
            health: self.health(adapters),
            circuits: self.breakers.all_metrics(),
            caches: self
                .caches
                .iter()
                .map(|(level, cache)| (*level, cache.get_stats()))
                .collect(),
            bulkheads: self.bulkheads.stats(),
            counters: self.counters.snapshot(),
        }
    }

    /// Forget an adapter's breaker
    pub fn forget_adapter(&self, adapter_id: &str) {
        self.breakers.remove(adapter_id);
    }

    /// Fail every bulkhead waiter; used on shutdown
    pub fn close(&self) {
        self.bulkheads.close();
    }
}

impl std::fmt::Debug for ResilienceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceManager")
            .field("breakers", &self.breakers.len())
            .field("cache_levels", &self.caches.keys().collect::<Vec<_>>())
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
