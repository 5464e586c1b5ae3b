//! Relay Core - Resilience and Orchestration for Model Adapters
//!
//! This crate sits between callers that need model output (analysis,
//! sentiment, patterns, completions, classification) and a set of
//! interchangeable adapters that produce it, some local and some remote.
//! Callers get either a result with full provenance or exactly one terminal
//! error, regardless of how many adapters failed along the way.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Orchestrator                            │
//! │   registry  ·  operations  ·  consensus  ·  metrics  ·  dispose  │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┴──────────────────────────────────┐
//! │                       Resilience Manager                         │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌─────────┐ ┌──────────┐ │
//! │  │ Breakers │ │ Fallback │ │ Timeouts │ │  Retry  │ │Bulkheads │ │
//! │  └──────────┘ └──────────┘ └──────────┘ └─────────┘ └──────────┘ │
//! │  ┌──────────────────────┐ ┌──────────────────────────────────┐   │
//! │  │ Error classifier     │ │ Cache (memory / disk / distrib.) │   │
//! │  └──────────────────────┘ └──────────────────────────────────┘   │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//!        ┌────────────────┬───────┴────────┬────────────────┐
//!   local adapter    hybrid adapter   cloud adapter       ...
//! ```
//!
//! The [`scheduler::BatchScheduler`] is separate: it bounds how many batches
//! of a bulk job call into the orchestrator at once.
//!
//! # Module Overview
//!
//! - [`adapter`]: the [`ModelAdapter`] trait, identities, typed responses
//! - [`context`]: per-request routing input
//! - [`config`]: TOML + environment configuration
//! - [`error`]: adapter failure taxonomy and the terminal relay error
//! - [`resilience`]: breakers, caches, classifier, fallback, timeouts, retry, bulkheads
//! - [`orchestrator`]: public operations, consensus voting, metrics
//! - [`scheduler`]: concurrency-bounded batch processing

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]

pub mod adapter;
pub mod config;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod resilience;
pub mod scheduler;

// Re-exports for convenience
pub use adapter::{
    AdapterIdentity, AnalysisResult, AnalysisType, Capability, ClassificationResult,
    CompletionOptions, CompletionResult, ModelAdapter, Pattern, PatternResult, PrivacyLevel,
    ScriptedAdapter, SentimentLabel, SentimentResult,
};
pub use context::{Complexity, ContentType, RequestContext, Urgency};
pub use error::{AdapterError, AdapterErrorKind, RelayError, RelayResult};
pub use orchestrator::{
    infer_category, AdapterStatus, AnalysisOptions, ConsensusConfig, ConsensusReport,
    Orchestrator, OrchestratorMetrics, PersonalAnalysis, Provenance, Routed, SentimentOutcome,
};
pub use resilience::{
    CacheConfig, CacheLevel, CircuitBreakerConfig, CircuitState, FallbackConfig, FallbackEntry,
    FallbackStrategy, IsolationGroupConfig, ResilienceStats, RetryConfig, TimeoutConfig,
};
pub use scheduler::{BatchConfig, BatchOutcome, BatchRun, BatchScheduler, BatchStats, WorkItem};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, RelayConfig,
};
