//! Orchestrator Metrics
//!
//! Monotonically accumulating counters for the orchestrator's lifetime plus a
//! latency histogram. Nothing here is reset short of recreating the
//! orchestrator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::resilience::ExecutionCounters;

// ============================================================================
// Histogram for Latency Tracking
// ============================================================================

/// A histogram for tracking latency distributions in milliseconds
#[derive(Debug)]
pub struct Histogram {
    /// Bucket upper bounds
    buckets: Vec<u64>,
    /// Count per bucket
    counts: Vec<AtomicU64>,
    total_count: AtomicU64,
    sum: AtomicU64,
    max: AtomicU64,
}

impl Histogram {
    pub fn new(buckets: Vec<u64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            total_count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    /// Default latency buckets
    pub fn latency_default() -> Self {
        Self::new(vec![
            10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000, 60_000, 120_000,
        ])
    }

    pub fn record(&self, value: u64) {
        let bucket_idx = self
            .buckets
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(self.buckets.len().saturating_sub(1));

        if let Some(count) = self.counts.get(bucket_idx) {
            count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let total = self.total_count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);
        let counts: Vec<u64> = self.counts.iter().map(|c| c.load(Ordering::Relaxed)).collect();

        HistogramSnapshot {
            p50: self.percentile(&counts, total, 0.50),
            p95: self.percentile(&counts, total, 0.95),
            mean: if total == 0 { 0.0 } else { sum as f64 / total as f64 },
            max: self.max.load(Ordering::Relaxed),
            count: total,
        }
    }

    /// Upper bound of the bucket holding the given percentile
    fn percentile(&self, counts: &[u64], total: u64, p: f64) -> u64 {
        if total == 0 {
            return 0;
        }
        let target = (total as f64 * p).ceil() as u64;
        let mut cumulative = 0;
        for (bound, count) in self.buckets.iter().zip(counts) {
            cumulative += count;
            if cumulative >= target {
                return *bound;
            }
        }
        self.buckets.last().copied().unwrap_or(0)
    }
}

/// Point-in-time histogram summary
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub mean: f64,
    pub p50: u64,
    pub p95: u64,
    pub max: u64,
}

// ============================================================================
// Orchestrator Metrics
// ============================================================================

/// Snapshot of orchestrator counters
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OrchestratorMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retry_count: u64,
    /// Requests served by an adapter other than the chain's primary
    pub fallback_usage_count: u64,
    pub circuit_breaker_trips: u64,
    pub cache_hits: u64,
    pub cache_lookups: u64,
    /// `cache_hits / cache_lookups`, 0.0 before any lookup
    pub cache_hit_rate: f64,
    pub consensus_runs: u64,
    pub weak_consensus_count: u64,
    pub latency: HistogramSnapshot,
}

/// Live counters
#[derive(Debug)]
pub(crate) struct MetricsRecorder {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    fallback_usage_count: AtomicU64,
    cache_hits: AtomicU64,
    cache_lookups: AtomicU64,
    consensus_runs: AtomicU64,
    weak_consensus_count: AtomicU64,
    latency: Histogram,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            fallback_usage_count: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_lookups: AtomicU64::new(0),
            consensus_runs: AtomicU64::new(0),
            weak_consensus_count: AtomicU64::new(0),
            latency: Histogram::latency_default(),
        }
    }
}

impl MetricsRecorder {
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, fallback_used: bool, latency: Duration) {
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
        if fallback_used {
            self.fallback_usage_count.fetch_add(1, Ordering::Relaxed);
        }
        self.latency
            .record(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX));
    }

    pub fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        self.cache_lookups.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_consensus(&self, weak: bool) {
        self.consensus_runs.fetch_add(1, Ordering::Relaxed);
        if weak {
            self.weak_consensus_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Snapshot; retries and breaker trips come from the resilience manager,
    /// which sees every attempt whether or not the request succeeded
    pub fn snapshot(&self, execution: &ExecutionCounters) -> OrchestratorMetrics {
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_lookups = self.cache_lookups.load(Ordering::Relaxed);

        OrchestratorMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            retry_count: execution.retries,
            fallback_usage_count: self.fallback_usage_count.load(Ordering::Relaxed),
            circuit_breaker_trips: execution.circuit_trips,
            cache_hits,
            cache_lookups,
            cache_hit_rate: if cache_lookups == 0 {
                0.0
            } else {
                cache_hits as f64 / cache_lookups as f64
            },
            consensus_runs: self.consensus_runs.load(Ordering::Relaxed),
            weak_consensus_count: self.weak_consensus_count.load(Ordering::Relaxed),
            latency: self.latency.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_percentiles() {
        let h = Histogram::latency_default();
        for v in [5, 20, 40, 90, 200, 400, 800, 2_000, 4_000, 9_000] {
            h.record(v);
        }
        let snap = h.snapshot();
        assert_eq!(snap.count, 10);
        assert_eq!(snap.p50, 250);
        assert_eq!(snap.p95, 10_000);
        assert_eq!(snap.max, 9_000);
    }

    #[test]
    fn test_cache_hit_rate() {
        let m = MetricsRecorder::default();
        m.record_cache_lookup(false);
        m.record_cache_lookup(true);
        m.record_cache_lookup(true);
        m.record_cache_lookup(true);

        let snap = m.snapshot(&ExecutionCounters::default());
        assert_eq!(snap.cache_hits, 3);
        assert!((snap.cache_hit_rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_success_counts_retries_and_fallbacks() {
        let m = MetricsRecorder::default();
        m.record_request();
        m.record_success(true, Duration::from_millis(30));
        m.record_request();
        m.record_failure();

        let execution = ExecutionCounters {
            retries: 2,
            circuit_trips: 1,
            ..Default::default()
        };
        let snap = m.snapshot(&execution);
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.successful_requests, 1);
        assert_eq!(snap.failed_requests, 1);
        assert_eq!(snap.retry_count, 2);
        assert_eq!(snap.fallback_usage_count, 1);
        assert_eq!(snap.circuit_breaker_trips, 1);
    }
}
