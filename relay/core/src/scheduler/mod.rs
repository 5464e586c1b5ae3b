//! Batch Scheduler
//!
//! Processes large work lists without unbounded parallel model calls:
//!
//! ```text
//! items ──> chunks (sequential) ──> batches (concurrent within a chunk)
//!                                     │
//!                                     ├─ cache hit? ──> reuse result
//!                                     ├─ permit from the global semaphore (FIFO)
//!                                     ├─ truncate to the token budget
//!                                     └─ process, release permit
//! ```
//!
//! Truncation is lossy: once a batch's estimated tokens exceed
//! `max_batch_tokens`, that item and every later item in the batch are
//! dropped. The first item is always kept.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::{RelayError, RelayResult};
use crate::resilience::cache::{content_hash, Cache, CacheLevelConfig};

// ============================================================================
// Configuration and Types
// ============================================================================

/// Batch scheduler bounds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Items per chunk; chunks run one after another
    pub chunk_size: usize,
    /// Items per batch; batches within a chunk run concurrently
    pub batch_size: usize,
    /// Batches holding a permit at once, across all chunks
    pub max_concurrent_ai_calls: usize,
    /// Estimated token budget per batch
    pub max_batch_tokens: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            batch_size: 5,
            max_concurrent_ai_calls: 3,
            max_batch_tokens: 8000,
        }
    }
}

/// One file to process
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub path: String,
    pub content: String,
}

impl WorkItem {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// `ceil(chars / 4)`
    #[must_use]
    pub fn estimated_tokens(&self) -> usize {
        self.content.chars().count().div_ceil(4)
    }
}

/// Result of one batch
#[derive(Debug)]
pub struct BatchOutcome<R> {
    pub chunk: usize,
    pub batch: usize,
    /// Paths that were processed
    pub paths: Vec<String>,
    /// Paths dropped by the token budget
    pub truncated: Vec<String>,
    pub cached: bool,
    pub result: RelayResult<R>,
}

/// Aggregate counters for a run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub batches: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cached: usize,
    pub truncated_items: usize,
    /// Highest number of batches holding a permit at once
    pub peak_in_flight: usize,
}

/// Everything a run produced, in chunk then batch order
#[derive(Debug)]
pub struct BatchRun<R> {
    pub outcomes: Vec<BatchOutcome<R>>,
    pub stats: BatchStats,
}

/// Split a batch at the token budget, keeping the first item
fn truncate_batch(items: Vec<WorkItem>, max_tokens: usize) -> (Vec<WorkItem>, Vec<WorkItem>) {
    let mut budget_used = 0;
    let mut split = items.len();
    for (i, item) in items.iter().enumerate() {
        budget_used += item.estimated_tokens();
        if i > 0 && budget_used > max_tokens {
            split = i;
            break;
        }
    }
    let mut kept = items;
    let dropped = kept.split_off(split);
    (kept, dropped)
}

/// Key for a batch: hash of its sorted input paths
fn batch_key(items: &[WorkItem]) -> String {
    let mut paths: Vec<&str> = items.iter().map(|i| i.path.as_str()).collect();
    paths.sort_unstable();
    format!("batch:{}", content_hash(&paths.join("\n")))
}

struct InFlightGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl<'a> InFlightGuard<'a> {
    fn enter(in_flight: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        peak.fetch_max(now, Ordering::AcqRel);
        Self { in_flight }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Concurrency-bounded batch scheduler with a batch result cache
pub struct BatchScheduler<R> {
    config: BatchConfig,
    permits: Arc<Semaphore>,
    cache: Cache<R>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl<R> BatchScheduler<R>
where
    R: Clone + Serialize,
{
    pub fn new(config: BatchConfig, cache: CacheLevelConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_ai_calls.max(1)));
        Self {
            config,
            permits,
            cache: Cache::new("batch", cache),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Batch result cache
    pub fn cache(&self) -> &Cache<R> {
        &self.cache
    }

    /// Permits not currently held
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Highest concurrency observed over the scheduler's lifetime
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Acquire)
    }

    /// Fail batches still waiting for a permit with `RelayError::Cancelled`
    pub fn close(&self) {
        self.permits.close();
    }

    /// Process `items` with `process`, one call per batch
    pub async fn run<F, Fut>(&self, items: Vec<WorkItem>, process: F) -> BatchRun<R>
    where
        F: Fn(Vec<WorkItem>) -> Fut,
        Fut: Future<Output = RelayResult<R>>,
    {
        let chunk_size = self.config.chunk_size.max(1);
        let batch_size = self.config.batch_size.max(1);
        let peak_before = self.peak_in_flight.swap(0, Ordering::AcqRel);

        let mut outcomes = Vec::new();
        let mut chunks = Vec::new();
        let mut items = items.into_iter().peekable();
        while items.peek().is_some() {
            chunks.push(items.by_ref().take(chunk_size).collect::<Vec<_>>());
        }

        tracing::info!(
            chunks = chunks.len(),
            chunk_size,
            batch_size,
            max_concurrent = self.config.max_concurrent_ai_calls,
            "Starting batch run"
        );

        for (chunk_index, chunk) in chunks.into_iter().enumerate() {
            let batches: Vec<Vec<WorkItem>> =
                chunk.chunks(batch_size).map(<[WorkItem]>::to_vec).collect();
            let results = join_all(
                batches
                    .into_iter()
                    .enumerate()
                    .map(|(batch_index, batch)| self.run_batch(chunk_index, batch_index, batch, &process)),
            )
            .await;
            outcomes.extend(results);
            tracing::debug!(chunk = chunk_index, "Chunk complete");
        }

        let run_peak = self.peak_in_flight.load(Ordering::Acquire);
        self.peak_in_flight.fetch_max(peak_before, Ordering::AcqRel);

        let stats = BatchStats {
            batches: outcomes.len(),
            succeeded: outcomes.iter().filter(|o| o.result.is_ok()).count(),
            failed: outcomes.iter().filter(|o| o.result.is_err()).count(),
            cached: outcomes.iter().filter(|o| o.cached).count(),
            truncated_items: outcomes.iter().map(|o| o.truncated.len()).sum(),
            peak_in_flight: run_peak,
        };
        tracing::info!(
            batches = stats.batches,
            failed = stats.failed,
            cached = stats.cached,
            truncated_items = stats.truncated_items,
            peak_in_flight = stats.peak_in_flight,
            "Batch run complete"
        );

        BatchRun { outcomes, stats }
    }

    async fn run_batch<F, Fut>(
        &self,
        chunk: usize,
        batch: usize,
        items: Vec<WorkItem>,
        process: &F,
    ) -> BatchOutcome<R>
    where
        F: Fn(Vec<WorkItem>) -> Fut,
        Fut: Future<Output = RelayResult<R>>,
    {
        let key = batch_key(&items);
        if let Some(result) = self.cache.get(&key) {
            tracing::debug!(chunk, batch, "Batch served from cache");
            return BatchOutcome {
                chunk,
                batch,
                paths: items.into_iter().map(|i| i.path).collect(),
                truncated: Vec::new(),
                cached: true,
                result: Ok(result),
            };
        }

        let (kept, dropped) = truncate_batch(items, self.config.max_batch_tokens);
        let truncated: Vec<String> = dropped.into_iter().map(|i| i.path).collect();
        if !truncated.is_empty() {
            tracing::warn!(
                chunk,
                batch,
                kept = kept.len(),
                dropped = truncated.len(),
                max_tokens = self.config.max_batch_tokens,
                "Batch exceeds token budget, dropping later items"
            );
        }
        let paths: Vec<String> = kept.iter().map(|i| i.path.clone()).collect();

        let result = match self.permits.clone().acquire_owned().await {
            Ok(_permit) => {
                let _in_flight = InFlightGuard::enter(&self.in_flight, &self.peak_in_flight);
                process(kept).await
            }
            Err(_) => Err(RelayError::Cancelled),
        };

        match &result {
            Ok(value) => self.cache.insert(key, value.clone()),
            Err(e) => tracing::warn!(chunk, batch, error = %e, "Batch failed"),
        }

        BatchOutcome {
            chunk,
            batch,
            paths,
            truncated,
            cached: false,
            result,
        }
    }
}

impl<R> std::fmt::Debug for BatchScheduler<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("config", &self.config)
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}
