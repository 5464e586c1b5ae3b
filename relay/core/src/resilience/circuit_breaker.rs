//! Per-Adapter Circuit Breaker
//!
//! A pure gate that prevents calls to an adapter during sustained failure.
//! No retries happen inside the breaker; callers check [`CircuitBreaker::can_execute`]
//! before every attempt and report the outcome with `on_success` / `on_failure`.
//!
//! # State Machine
//!
//! ```text
//! +--------+   failure_count >= threshold   +------+   recovery_timeout elapsed   +-----------+
//! | Closed | -----------------------------> | Open | ---------------------------> | Half-Open |
//! +--------+                                +------+      (first call)            +-----------+
//!     ^                                         ^                                       |
//!     |                                         |            any failure                |
//!     |                                         +---------------------------------------+
//!     |                  half_open_max_calls successes                                  |
//!     +---------------------------------------------------------------------------------+
//! ```
//!
//! - **Closed**: calls allowed; a success decrements the failure count by one
//! - **Open**: calls rejected until `next_attempt_at`
//! - **Half-Open**: up to `half_open_max_calls` probe calls admitted
//!
//! # Thread Safety
//!
//! Each breaker guards its state with its own mutex, so adapters never contend
//! with each other. Lifetime counters are atomics. [`CircuitBreakerRegistry`]
//! uses `DashMap` for concurrent access to the per-adapter table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// ============================================================================
// Configuration
// ============================================================================

/// Thresholds for one circuit breaker
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures (net of decay) before the circuit opens
    pub failure_threshold: u32,

    /// How long the circuit stays open before admitting a probe
    pub recovery_timeout_ms: u64,

    /// Probe calls admitted while half-open; this many successes close the circuit
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

// ============================================================================
// Circuit State
// ============================================================================

/// Circuit breaker state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    #[default]
    Closed,

    /// Rejecting calls
    Open,

    /// Admitting a limited number of probe calls
    HalfOpen,
}

/// State change caused by a breaker operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// No state change
    None,
    /// Circuit tripped open
    Opened,
    /// Recovery timeout elapsed, probing
    HalfOpened,
    /// Probes succeeded, circuit closed
    Closed,
}

#[derive(Clone, Debug, Default)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
    half_open_probes_used: u32,
}

// ============================================================================
// Circuit Breaker
// ============================================================================

/// Circuit breaker for a single adapter
pub struct CircuitBreaker {
    adapter_id: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    total_calls: AtomicU64,
    rejected_calls: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    trips: AtomicU64,
}

impl CircuitBreaker {
    /// Create a breaker with default thresholds
    pub fn new(adapter_id: impl Into<String>) -> Self {
        Self::with_config(adapter_id, CircuitBreakerConfig::default())
    }

    /// Create with custom thresholds
    pub fn with_config(adapter_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            config,
            state: Mutex::new(BreakerState::default()),
            total_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            trips: AtomicU64::new(0),
        }
    }

    /// Adapter this breaker guards
    pub fn adapter_id(&self) -> &str {
        &self.adapter_id
    }

    /// Thresholds in use
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state without side effects
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Current failure count
    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    /// The single gate callers check before attempting work
    ///
    /// Counts every call for metrics. In the open state the first call after
    /// `recovery_timeout` moves the circuit to half-open and is admitted as the
    /// first probe.
    pub fn can_execute(&self) -> bool {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut state = self.state.lock();

        let admitted = match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let ready = state.next_attempt_at.map_or(true, |at| now >= at);
                if ready {
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    state.half_open_probes_used = 1;
                    tracing::info!(adapter = %self.adapter_id, "Circuit breaker half-open, admitting probe");
                }
                ready
            }
            CircuitState::HalfOpen => {
                if state.half_open_probes_used < self.config.half_open_max_calls {
                    state.half_open_probes_used += 1;
                    true
                } else {
                    false
                }
            }
        };

        if !admitted {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
        }
        admitted
    }

    /// Record a successful call
    pub fn on_success(&self) -> Transition {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed => {
                state.failure_count = state.failure_count.saturating_sub(1);
                Transition::None
            }
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.half_open_max_calls {
                    *state = BreakerState {
                        last_failure_at: state.last_failure_at,
                        ..BreakerState::default()
                    };
                    tracing::info!(adapter = %self.adapter_id, "Circuit breaker closed, adapter recovered");
                    Transition::Closed
                } else {
                    Transition::None
                }
            }
            // A call admitted before the trip finished late; the cooldown stands.
            CircuitState::Open => Transition::None,
        }
    }

    /// Record a failed call
    pub fn on_failure(&self) -> Transition {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut state = self.state.lock();

        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure_at = Some(now);

        match state.state {
            CircuitState::Closed if state.failure_count >= self.config.failure_threshold => {
                self.trip(&mut state, now);
                Transition::Opened
            }
            CircuitState::HalfOpen => {
                self.trip(&mut state, now);
                Transition::Opened
            }
            _ => Transition::None,
        }
    }

    fn trip(&self, state: &mut BreakerState, now: Instant) {
        state.state = CircuitState::Open;
        state.next_attempt_at = Some(now + self.config.recovery_timeout());
        state.success_count = 0;
        state.half_open_probes_used = 0;
        self.trips.fetch_add(1, Ordering::Relaxed);

        tracing::warn!(
            adapter = %self.adapter_id,
            failure_count = state.failure_count,
            recovery_timeout_ms = self.config.recovery_timeout_ms,
            "Circuit breaker opened"
        );
    }

    /// Administrative override: force closed with zeroed state counters
    ///
    /// Lifetime metrics (calls, trips) are kept.
    pub fn reset(&self) {
        *self.state.lock() = BreakerState::default();
        tracing::info!(adapter = %self.adapter_id, "Circuit breaker reset");
    }

    /// Snapshot for stats reporting
    pub fn metrics(&self) -> CircuitMetrics {
        let now = Instant::now();
        let state = self.state.lock().clone();

        CircuitMetrics {
            adapter_id: self.adapter_id.clone(),
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            half_open_probes_used: state.half_open_probes_used,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            trips: self.trips.load(Ordering::Relaxed),
            retry_in: match state.state {
                CircuitState::Open => state
                    .next_attempt_at
                    .map(|at| at.saturating_duration_since(now)),
                _ => None,
            },
            since_last_failure: state.last_failure_at.map(|at| now.duration_since(at)),
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CircuitBreaker")
            .field("adapter_id", &self.adapter_id)
            .field("state", &state.state)
            .field("failure_count", &state.failure_count)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of one breaker
#[derive(Clone, Debug, Serialize)]
pub struct CircuitMetrics {
    pub adapter_id: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub half_open_probes_used: u32,
    /// Gate checks, admitted or not
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    /// Times the circuit has opened
    pub trips: u64,
    /// Remaining cooldown while open
    pub retry_in: Option<Duration>,
    pub since_last_failure: Option<Duration>,
}

// ============================================================================
// Breaker Registry
// ============================================================================

/// Table of breakers, one per adapter id
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: RwLock<CircuitBreakerConfig>,
    overrides: RwLock<HashMap<String, CircuitBreakerConfig>>,
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new(
        default_config: CircuitBreakerConfig,
        overrides: HashMap<String, CircuitBreakerConfig>,
    ) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config: RwLock::new(default_config),
            overrides: RwLock::new(overrides),
        }
    }

    /// Config that a breaker for `adapter_id` is created with
    pub fn config_for(&self, adapter_id: &str) -> CircuitBreakerConfig {
        self.overrides
            .read()
            .get(adapter_id)
            .cloned()
            .unwrap_or_else(|| self.default_config.read().clone())
    }

    /// Get the breaker for an adapter, creating it on first use
    pub fn get_or_create(&self, adapter_id: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(adapter_id) {
            return existing.clone();
        }
        self.breakers
            .entry(adapter_id.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_config(
                    adapter_id,
                    self.config_for(adapter_id),
                ))
            })
            .clone()
    }

    /// Get the breaker for an adapter if one exists
    pub fn get(&self, adapter_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(adapter_id).map(|b| b.clone())
    }

    /// Drop the breaker for an adapter
    pub fn remove(&self, adapter_id: &str) {
        self.breakers.remove(adapter_id);
    }

    /// Reset one adapter's breaker
    pub fn reset(&self, adapter_id: &str) -> bool {
        self.get(adapter_id).map(|b| b.reset()).is_some()
    }

    /// Reset every breaker
    pub fn reset_all(&self) {
        for entry in &self.breakers {
            entry.value().reset();
        }
    }

    /// Metrics for every breaker, sorted by adapter id
    pub fn all_metrics(&self) -> Vec<CircuitMetrics> {
        let mut metrics: Vec<_> = self.breakers.iter().map(|e| e.value().metrics()).collect();
        metrics.sort_by(|a, b| a.adapter_id.cmp(&b.adapter_id));
        metrics
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default(), HashMap::new())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, recovery_ms: u64, probes: u32) -> CircuitBreaker {
        CircuitBreaker::with_config(
            "test-adapter",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout_ms: recovery_ms,
                half_open_max_calls: probes,
            },
        )
    }

    #[test]
    fn test_initial_state() {
        let cb = CircuitBreaker::new("a");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_admits_one_probe() {
        let cb = breaker(3, 1_000, 1);

        for _ in 0..3 {
            assert!(cb.can_execute());
            cb.on_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!cb.can_execute());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cb.can_execute(), "probe should be admitted after recovery timeout");
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.can_execute(), "only one probe allowed");

        assert_eq!(cb.on_success(), Transition::Closed);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert!(cb.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_with_fresh_timeout() {
        let cb = breaker(1, 500, 1);
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(cb.can_execute());
        assert_eq!(cb.on_failure(), Transition::Opened);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(499)).await;
        assert!(!cb.can_execute());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cb.can_execute());
        assert_eq!(cb.metrics().trips, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_budget() {
        let cb = breaker(1, 100, 3);
        cb.on_failure();
        tokio::time::advance(Duration::from_millis(100)).await;

        assert!(cb.can_execute());
        assert!(cb.can_execute());
        assert!(cb.can_execute());
        assert!(!cb.can_execute());

        assert_eq!(cb.on_success(), Transition::None);
        assert_eq!(cb.on_success(), Transition::None);
        assert_eq!(cb.on_success(), Transition::Closed);
    }

    #[test]
    fn test_success_decays_failure_count() {
        let cb = breaker(5, 1_000, 1);
        cb.on_failure();
        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.failure_count(), 3);

        cb.on_success();
        assert_eq!(cb.failure_count(), 2);

        cb.on_success();
        cb.on_success();
        cb.on_success();
        assert_eq!(cb.failure_count(), 0, "failure count never goes below zero");
    }

    #[test]
    fn test_decay_delays_trip() {
        let cb = breaker(3, 1_000, 1);
        cb.on_failure();
        cb.on_failure();
        cb.on_success();
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_reset_forces_closed() {
        let cb = breaker(1, 60_000, 1);
        cb.on_failure();
        assert!(!cb.can_execute());

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert!(cb.can_execute());
        assert_eq!(cb.metrics().trips, 1, "lifetime trips survive reset");
    }

    #[test]
    fn test_metrics_count_calls_and_rejections() {
        let cb = breaker(1, 60_000, 1);
        assert!(cb.can_execute());
        cb.on_failure();
        assert!(!cb.can_execute());
        assert!(!cb.can_execute());

        let metrics = cb.metrics();
        assert_eq!(metrics.total_calls, 3);
        assert_eq!(metrics.rejected_calls, 2);
        assert_eq!(metrics.total_failures, 1);
        assert_eq!(metrics.state, CircuitState::Open);
        assert!(metrics.retry_in.is_some());
    }

    #[test]
    fn test_registry_applies_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "fragile".to_string(),
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        );
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), overrides);

        let fragile = registry.get_or_create("fragile");
        let sturdy = registry.get_or_create("sturdy");
        assert_eq!(fragile.config().failure_threshold, 1);
        assert_eq!(sturdy.config().failure_threshold, 5);

        fragile.on_failure();
        assert_eq!(fragile.state(), CircuitState::Open);
        assert_eq!(sturdy.state(), CircuitState::Closed, "breakers are independent");

        assert!(Arc::ptr_eq(&fragile, &registry.get_or_create("fragile")));
        assert_eq!(registry.all_metrics().len(), 2);

        registry.remove("fragile");
        assert!(registry.get("fragile").is_none());
    }
}
