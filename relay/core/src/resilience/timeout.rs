//! Timeout-Bounded Executor
//!
//! Races an adapter call against a deadline and the relay's cancellation
//! token. When the deadline wins, the call's future is dropped and its result
//! discarded; any remote work it started is not reclaimed (best-effort).

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::context::Complexity;
use crate::error::AdapterError;

/// Request timeout bounds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Timeout for medium complexity requests, or every request when not adaptive
    pub default_ms: u64,

    /// Lower bound for any timeout
    pub min_ms: u64,

    /// Upper bound for any timeout
    pub max_ms: u64,

    /// Scale the timeout by the request's complexity hint
    pub adaptive: bool,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_ms: 30_000,
            min_ms: 5_000,
            max_ms: 120_000,
            adaptive: true,
        }
    }
}

/// Why an attempt produced no value
#[derive(Debug, Error)]
pub enum AttemptError {
    /// The adapter failed, or the deadline elapsed
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// The relay was shut down while waiting
    #[error("attempt cancelled")]
    Cancelled,
}

/// Executes futures under a deadline
#[derive(Clone, Debug)]
pub struct TimeoutExecutor {
    config: TimeoutConfig,
    cancel: CancellationToken,
}

impl TimeoutExecutor {
    #[must_use]
    pub fn new(config: TimeoutConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    /// Deadline for a request of the given complexity, clamped to `[min, max]`
    pub fn timeout_for(&self, complexity: Complexity) -> Duration {
        let base = self.config.default_ms as f64;
        let scaled = if self.config.adaptive {
            base * complexity.timeout_factor()
        } else {
            base
        };
        let clamped = (scaled as u64).clamp(self.config.min_ms, self.config.max_ms.max(self.config.min_ms));
        Duration::from_millis(clamped)
    }

    /// Run `operation`, failing with [`AdapterError::Timeout`] after `deadline`
    pub async fn execute<T, F>(&self, deadline: Duration, operation: F) -> Result<T, AttemptError>
    where
        F: Future<Output = Result<T, AdapterError>>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(AttemptError::Cancelled),
            outcome = tokio::time::timeout(deadline, operation) => match outcome {
                Ok(result) => result.map_err(AttemptError::Adapter),
                Err(_) => Err(AttemptError::Adapter(AdapterError::Timeout { after: deadline })),
            },
        }
    }

    /// Sleep for a backoff delay unless cancelled first
    pub async fn sleep(&self, delay: Duration) -> Result<(), AttemptError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(AttemptError::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Whether the relay has been shut down
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> TimeoutExecutor {
        TimeoutExecutor::new(TimeoutConfig::default(), CancellationToken::new())
    }

    #[test]
    fn test_adaptive_timeouts() {
        let exec = executor();
        assert_eq!(exec.timeout_for(Complexity::Simple), Duration::from_millis(15_000));
        assert_eq!(exec.timeout_for(Complexity::Medium), Duration::from_millis(30_000));
        assert_eq!(exec.timeout_for(Complexity::Complex), Duration::from_millis(60_000));
    }

    #[test]
    fn test_timeouts_clamped() {
        let exec = TimeoutExecutor::new(
            TimeoutConfig {
                default_ms: 8_000,
                min_ms: 5_000,
                max_ms: 12_000,
                adaptive: true,
            },
            CancellationToken::new(),
        );
        assert_eq!(exec.timeout_for(Complexity::Simple), Duration::from_millis(5_000));
        assert_eq!(exec.timeout_for(Complexity::Complex), Duration::from_millis(12_000));

        let fixed = TimeoutExecutor::new(
            TimeoutConfig {
                adaptive: false,
                ..Default::default()
            },
            CancellationToken::new(),
        );
        assert_eq!(fixed.timeout_for(Complexity::Complex), Duration::from_millis(30_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_discards_result() {
        let exec = executor();
        let result: Result<u32, _> = exec
            .execute(Duration::from_millis(100), async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(7)
            })
            .await;

        match result {
            Err(AttemptError::Adapter(AdapterError::Timeout { after })) => {
                assert_eq!(after, Duration::from_millis(100));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_passes_through_result() {
        let exec = executor();
        let ok: Result<u32, _> = exec.execute(Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err: Result<u32, _> = exec
            .execute(Duration::from_secs(1), async {
                Err(AdapterError::QuotaExceeded("q".into()))
            })
            .await;
        assert!(matches!(
            err,
            Err(AttemptError::Adapter(AdapterError::QuotaExceeded(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_wait() {
        let token = CancellationToken::new();
        let exec = TimeoutExecutor::new(TimeoutConfig::default(), token.clone());

        let waiter = tokio::spawn({
            let exec = exec.clone();
            async move {
                exec.execute(Duration::from_secs(60), async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok::<_, AdapterError>(())
                })
                .await
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(AttemptError::Cancelled)));
        assert!(matches!(
            exec.sleep(Duration::from_secs(1)).await,
            Err(AttemptError::Cancelled)
        ));
    }
}
