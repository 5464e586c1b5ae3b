//! Orchestrator
//!
//! The public face of the relay. The orchestrator owns the adapter registry,
//! the resilience manager and the lifetime metrics, and exposes one method per
//! model operation. Every operation routes through the same machinery:
//!
//! ```text
//! request ──> capability added to context ──> fallback chain
//!         ──> breaker gate + probe ──> timeout-bounded attempt ──> validate
//!         ──> retry / advance / abort ──> result + provenance
//! ```
//!
//! `analyze_personal_content` additionally consults the result cache, and
//! `analyze_sentiment` may vote across adapters (see [`consensus`]).
//!
//! # Thread Safety
//!
//! The registry is a read-mostly lock that is only held long enough to
//! snapshot the adapter list; it is never held across an `.await`.

pub mod consensus;
pub mod metrics;

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use consensus::{ConsensusConfig, ConsensusReport, LabelTally, Vote};
pub use metrics::{HistogramSnapshot, OrchestratorMetrics};

use crate::adapter::{
    AnalysisResult, AnalysisType, Capability, ClassificationResult, CompletionOptions,
    CompletionResult, ModelAdapter, PatternResult, PrivacyLevel, SentimentResult,
};
use crate::config::RelayConfig;
use crate::context::RequestContext;
use crate::error::{AdapterError, RelayError, RelayResult};
use crate::resilience::cache::content_hash;
use crate::resilience::{
    AttemptError, CircuitState, Execution, Rejection, ResilienceManager, ResilienceStats,
};
use metrics::MetricsRecorder;

/// Tag attached to every cached analysis
pub const ANALYSIS_TAG: &str = "analysis";

// ============================================================================
// Requests and Results
// ============================================================================

/// Options for [`Orchestrator::analyze_personal_content`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    pub analysis_type: AnalysisType,
    /// Consult and populate the result cache
    pub use_cache: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            analysis_type: AnalysisType::default(),
            use_cache: true,
        }
    }
}

impl AnalysisOptions {
    pub fn with_analysis_type(mut self, analysis_type: AnalysisType) -> Self {
        self.analysis_type = analysis_type;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

/// How a result was produced
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub request_id: Uuid,
    /// Adapter that produced the value; `None` for a consensus vote
    pub adapter: Option<String>,
    /// Adapters actually called for this request, in order
    pub adapters_used: Vec<String>,
    pub retries: u32,
    /// Position of the serving adapter in the fallback chain (0 = primary)
    pub fallback_depth: usize,
    pub cache_hit: bool,
}

impl Provenance {
    fn served<T>(request_id: Uuid, execution: &Execution<T>) -> Self {
        Self {
            request_id,
            adapter: Some(execution.adapter.clone()),
            adapters_used: execution.adapters_used.clone(),
            retries: execution.retries,
            fallback_depth: execution.fallback_depth,
            cache_hit: false,
        }
    }
}

/// A value together with its provenance
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Routed<T> {
    pub value: T,
    pub provenance: Provenance,
}

/// Result of [`Orchestrator::analyze_personal_content`]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PersonalAnalysis {
    pub analysis: AnalysisResult,
    /// Inferred content category, also used as the cache tag
    pub category: String,
    pub provenance: Provenance,
}

/// Result of [`Orchestrator::analyze_sentiment`]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SentimentOutcome {
    pub result: SentimentResult,
    /// Present when the result came from a vote
    pub consensus: Option<ConsensusReport>,
    pub provenance: Provenance,
}

/// Live status of one registered adapter
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AdapterStatus {
    pub adapter_id: String,
    pub privacy: PrivacyLevel,
    /// Result of a live availability probe
    pub available: bool,
    pub circuit_state: CircuitState,
    pub cost_per_call: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CachedAnalysis {
    analysis: AnalysisResult,
    category: String,
    adapter: String,
}

/// Infer the content category used to tag cached analyses
#[must_use]
pub fn infer_category(content: &str) -> &'static str {
    let lowered = content.to_lowercase();
    if lowered.contains("goal") {
        "goal-review"
    } else if lowered.contains("habit") {
        "habit-tracking"
    } else if ["today", "reflect", "journal", "grateful"]
        .iter()
        .any(|word| lowered.contains(word))
    {
        "daily-reflection"
    } else {
        "general"
    }
}

fn analysis_cache_key(content: &str, options: &AnalysisOptions) -> String {
    let analysis_type = serde_json::to_string(&options.analysis_type).unwrap_or_default();
    format!(
        "analysis:{}",
        content_hash(&format!("{analysis_type}\u{0}{content}"))
    )
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Coordinates model adapters behind the resilience layer
pub struct Orchestrator {
    config: RelayConfig,
    adapters: RwLock<Vec<Arc<dyn ModelAdapter>>>,
    resilience: ResilienceManager,
    metrics: MetricsRecorder,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator with no adapters
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Config` if the configuration is invalid.
    pub fn new(config: RelayConfig) -> RelayResult<Self> {
        config.validate()?;
        let cancel = CancellationToken::new();

        tracing::info!(
            privacy_level = ?config.privacy_level,
            max_retries = config.retry.max_retries,
            require_consensus = config.consensus.require_consensus,
            cache_enabled = config.cache.enabled,
            "Orchestrator created"
        );

        Ok(Self {
            resilience: ResilienceManager::new(&config, cancel.clone()),
            adapters: RwLock::new(Vec::new()),
            metrics: MetricsRecorder::default(),
            cancel,
            config,
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn resilience(&self) -> &ResilienceManager {
        &self.resilience
    }

    /// Whether `dispose` has been called
    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn ensure_active(&self) -> RelayResult<()> {
        if self.cancel.is_cancelled() {
            Err(RelayError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Snapshot of registered adapters in registration order
    pub fn adapters(&self) -> Vec<Arc<dyn ModelAdapter>> {
        self.adapters.read().clone()
    }

    pub fn adapter_ids(&self) -> Vec<String> {
        self.adapters.read().iter().map(|a| a.id().to_string()).collect()
    }

    // ------------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------------

    /// Initialize and register an adapter
    ///
    /// # Errors
    ///
    /// `DuplicateAdapter` if the id is taken, `Initialization` if
    /// `initialize()` fails (the adapter is not registered).
    pub async fn register_adapter(&self, adapter: Arc<dyn ModelAdapter>) -> RelayResult<()> {
        self.ensure_active()?;
        let id = adapter.id().to_string();
        if self.adapters.read().iter().any(|a| a.id() == id) {
            return Err(RelayError::DuplicateAdapter(id));
        }

        if let Err(source) = adapter.initialize().await {
            tracing::warn!(adapter = %id, error = %source, "Adapter failed to initialize");
            return Err(RelayError::Initialization {
                adapter: id,
                source,
            });
        }

        {
            let mut adapters = self.adapters.write();
            // Another registration may have won while we were initializing
            if adapters.iter().any(|a| a.id() == id) {
                return Err(RelayError::DuplicateAdapter(id));
            }
            adapters.push(adapter.clone());
        }

        let identity = adapter.identity();
        tracing::info!(
            adapter = %id,
            privacy = ?identity.privacy,
            capabilities = identity.capabilities.len(),
            "Adapter registered"
        );
        Ok(())
    }

    /// Dispose and unregister an adapter, dropping its breaker
    ///
    /// # Errors
    ///
    /// `AdapterNotFound` if no adapter has this id.
    pub async fn remove_adapter(&self, adapter_id: &str) -> RelayResult<()> {
        let removed = {
            let mut adapters = self.adapters.write();
            let index = adapters
                .iter()
                .position(|a| a.id() == adapter_id)
                .ok_or_else(|| RelayError::AdapterNotFound(adapter_id.to_string()))?;
            adapters.remove(index)
        };

        self.resilience.forget_adapter(adapter_id);
        if let Err(e) = removed.dispose().await {
            tracing::warn!(adapter = %adapter_id, error = %e, "Adapter dispose failed");
        }
        tracing::info!(adapter = %adapter_id, "Adapter removed");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------------

    async fn route<T, F, Fut>(
        &self,
        operation_name: &'static str,
        context: &RequestContext,
        capability: Capability,
        operation: F,
    ) -> RelayResult<Routed<T>>
    where
        F: Fn(Arc<dyn ModelAdapter>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, AdapterError>> + Send,
        T: Send,
    {
        self.ensure_active()?;
        let context = context.clone().with_capability(capability);
        let adapters = self.adapters();
        let request_id = Uuid::new_v4();

        self.metrics.record_request();
        let started = Instant::now();

        match self
            .resilience
            .execute_with_resilience(&adapters, &context, operation)
            .await
        {
            Ok(execution) => {
                self.metrics
                    .record_success(execution.fallback_depth > 0, started.elapsed());
                tracing::debug!(
                    %request_id,
                    operation = operation_name,
                    adapter = %execution.adapter,
                    retries = execution.retries,
                    fallback_depth = execution.fallback_depth,
                    "Request served"
                );
                let provenance = Provenance::served(request_id, &execution);
                Ok(Routed {
                    value: execution.value,
                    provenance,
                })
            }
            Err(e) => {
                self.metrics.record_failure();
                tracing::warn!(%request_id, operation = operation_name, error = %e, "Request failed");
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Analyze personal content, consulting the result cache first
    ///
    /// A cache hit makes no adapter calls. On a miss the result is cached,
    /// tagged with the inferred content category and [`ANALYSIS_TAG`].
    pub async fn analyze_personal_content(
        &self,
        content: &str,
        options: &AnalysisOptions,
        context: &RequestContext,
    ) -> RelayResult<PersonalAnalysis> {
        self.ensure_active()?;
        let use_cache = options.use_cache && self.resilience.cache_enabled();
        let key = analysis_cache_key(content, options);

        if use_cache {
            let cached = self.resilience.cache_get::<CachedAnalysis>(&key);
            self.metrics.record_cache_lookup(cached.is_some());
            if let Some(cached) = cached {
                tracing::debug!(key = %key, category = %cached.category, "Analysis served from cache");
                return Ok(PersonalAnalysis {
                    analysis: cached.analysis,
                    category: cached.category,
                    provenance: Provenance {
                        request_id: Uuid::new_v4(),
                        adapter: Some(cached.adapter),
                        adapters_used: Vec::new(),
                        retries: 0,
                        fallback_depth: 0,
                        cache_hit: true,
                    },
                });
            }
        }

        let analysis_type = options.analysis_type;
        let routed = self
            .route(
                "analyze_personal_content",
                context,
                Capability::ContentAnalysis,
                |adapter| async move {
                    let result = adapter.analyze_content(content, analysis_type).await?;
                    result.validate()?;
                    Ok::<_, AdapterError>(result)
                },
            )
            .await?;

        let category = infer_category(content).to_string();
        if use_cache {
            let cached = CachedAnalysis {
                analysis: routed.value.clone(),
                category: category.clone(),
                adapter: routed.provenance.adapter.clone().unwrap_or_default(),
            };
            self.resilience
                .cache_set(&key, &cached, &[category.clone(), ANALYSIS_TAG.to_string()]);
        }

        Ok(PersonalAnalysis {
            analysis: routed.value,
            category,
            provenance: routed.provenance,
        })
    }

    /// Determine sentiment, voting across adapters when consensus is required
    ///
    /// Voting happens when `consensus.require_consensus` is set and at least
    /// two adapters are registered; otherwise the fallback chain is used.
    pub async fn analyze_sentiment(
        &self,
        content: &str,
        context: &RequestContext,
    ) -> RelayResult<SentimentOutcome> {
        self.ensure_active()?;
        if self.config.consensus.require_consensus && self.adapters.read().len() >= 2 {
            return self.sentiment_consensus(content, context).await;
        }

        let routed = self
            .route(
                "analyze_sentiment",
                context,
                Capability::Sentiment,
                |adapter| async move {
                    let result = adapter.analyze_sentiment(content).await?;
                    result.validate()?;
                    Ok::<_, AdapterError>(result)
                },
            )
            .await?;

        Ok(SentimentOutcome {
            result: routed.value,
            consensus: None,
            provenance: routed.provenance,
        })
    }

    async fn sentiment_consensus(
        &self,
        content: &str,
        context: &RequestContext,
    ) -> RelayResult<SentimentOutcome> {
        let context = context.clone().with_capability(Capability::Sentiment);
        let request_id = Uuid::new_v4();
        let voters: Vec<Arc<dyn ModelAdapter>> = self
            .adapters()
            .into_iter()
            .filter(|a| self.resilience.resolver().is_eligible(&context, a.identity()))
            .collect();

        self.metrics.record_request();
        let started = Instant::now();

        let ballots = join_all(voters.iter().map(|adapter| {
            let context = &context;
            async move {
                let breaker = match self.resilience.admit(adapter.as_ref()).await {
                    Ok(breaker) => breaker,
                    Err(Rejection::CircuitOpen) => return (adapter.id(), None),
                    Err(Rejection::Unavailable(e)) => {
                        return (adapter.id(), Some(Err(AttemptError::Adapter(e))))
                    }
                };
                let outcome = self
                    .resilience
                    .attempt(adapter.id(), &breaker, context, async {
                        let result = adapter.analyze_sentiment(content).await?;
                        result.validate()?;
                        Ok::<_, AdapterError>(result)
                    })
                    .await;
                (adapter.id(), Some(outcome))
            }
        }))
        .await;

        let mut votes = Vec::new();
        let mut adapters_used = Vec::new();
        let mut last_error = None;
        for (adapter_id, ballot) in ballots {
            match ballot {
                None => {}
                Some(Ok(result)) => {
                    adapters_used.push(adapter_id.to_string());
                    votes.push(Vote {
                        adapter: adapter_id.to_string(),
                        result,
                    });
                }
                Some(Err(AttemptError::Cancelled)) => {
                    self.metrics.record_failure();
                    return Err(RelayError::Cancelled);
                }
                Some(Err(AttemptError::Adapter(e))) => {
                    tracing::warn!(adapter = %adapter_id, error = %e, "Consensus voter failed");
                    adapters_used.push(adapter_id.to_string());
                    last_error = Some(e);
                }
            }
        }

        let Some(report) = consensus::tally(votes, self.config.consensus.consensus_threshold)
        else {
            self.metrics.record_failure();
            tracing::warn!(%request_id, "No adapter returned a sentiment vote");
            return Err(RelayError::NoHealthyAdapter {
                attempted: adapters_used,
                last_error,
            });
        };

        self.metrics.record_success(false, started.elapsed());
        self.metrics.record_consensus(report.weak);
        tracing::debug!(
            %request_id,
            label = ?report.result.label,
            agreement = report.agreement,
            votes = report.total_votes,
            "Consensus reached"
        );

        Ok(SentimentOutcome {
            result: report.result.clone(),
            provenance: Provenance {
                request_id,
                adapter: None,
                adapters_used,
                retries: 0,
                fallback_depth: 0,
                cache_hit: false,
            },
            consensus: Some(report),
        })
    }

    /// Extract recurring patterns
    pub async fn extract_patterns(
        &self,
        content: &str,
        context: &RequestContext,
    ) -> RelayResult<Routed<PatternResult>> {
        self.route(
            "extract_patterns",
            context,
            Capability::PatternExtraction,
            |adapter| async move {
                let result = adapter.extract_patterns(content).await?;
                result.validate()?;
                Ok::<_, AdapterError>(result)
            },
        )
        .await
    }

    /// Generate a completion
    pub async fn generate_completion(
        &self,
        prompt: &str,
        options: &CompletionOptions,
        context: &RequestContext,
    ) -> RelayResult<Routed<CompletionResult>> {
        self.route(
            "generate_completion",
            context,
            Capability::Completion,
            |adapter| async move {
                let result = adapter.generate_completion(prompt, options).await?;
                result.validate()?;
                Ok::<_, AdapterError>(result)
            },
        )
        .await
    }

    /// Assign content to one of `categories`
    pub async fn classify_content(
        &self,
        content: &str,
        categories: &[String],
        context: &RequestContext,
    ) -> RelayResult<Routed<ClassificationResult>> {
        self.route(
            "classify_content",
            context,
            Capability::Classification,
            |adapter| async move {
                let result = adapter.classify_content(content, categories).await?;
                result.validate(categories)?;
                Ok::<_, AdapterError>(result)
            },
        )
        .await
    }

    // ------------------------------------------------------------------------
    // Status and lifecycle
    // ------------------------------------------------------------------------

    pub fn get_metrics(&self) -> OrchestratorMetrics {
        self.metrics.snapshot(&self.resilience.counters())
    }

    /// Probe every registered adapter concurrently
    pub async fn get_adapter_status(&self) -> Vec<AdapterStatus> {
        let adapters = self.adapters();
        join_all(adapters.iter().map(|adapter| async move {
            let identity = adapter.identity();
            AdapterStatus {
                adapter_id: identity.id.clone(),
                privacy: identity.privacy,
                available: adapter.is_available().await,
                circuit_state: self
                    .resilience
                    .breakers()
                    .get(adapter.id())
                    .map(|b| b.state())
                    .unwrap_or_default(),
                cost_per_call: identity.cost_per_call,
            }
        }))
        .await
    }

    /// Breaker, cache, bulkhead and health snapshot; nothing is probed
    pub fn get_resilience_stats(&self) -> ResilienceStats {
        self.resilience.stats(&self.adapters())
    }

    /// Remove cached entries carrying any of `tags`
    pub fn invalidate_cache_tags(&self, tags: &[&str]) -> usize {
        let removed = self.resilience.invalidate_by_tags(tags);
        tracing::debug!(?tags, removed, "Cache entries invalidated");
        removed
    }

    pub fn clear_caches(&self) {
        self.resilience.clear_caches();
        tracing::info!("Caches cleared");
    }

    /// Cancel in-flight waits, dispose every adapter and clear caches
    ///
    /// Calls made after this return `RelayError::Cancelled`. Remote work
    /// already started by an adapter is not reclaimed.
    pub async fn dispose(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.resilience.close();

        let adapters: Vec<Arc<dyn ModelAdapter>> = std::mem::take(&mut *self.adapters.write());
        for adapter in &adapters {
            if let Err(e) = adapter.dispose().await {
                tracing::warn!(adapter = %adapter.id(), error = %e, "Adapter dispose failed");
            }
        }
        self.resilience.clear_caches();
        tracing::info!(adapters = adapters.len(), "Orchestrator disposed");
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("adapters", &self.adapter_ids())
            .field("disposed", &self.is_disposed())
            .field("resilience", &self.resilience)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{ScriptedAdapter, SentimentLabel};
    use crate::context::Complexity;
    use crate::resilience::RetryConfig;
    use std::time::Duration;

    fn config() -> RelayConfig {
        RelayConfig {
            retry: RetryConfig {
                max_retries: 2,
                base_delay_ms: 10,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn orchestrator_with(
        config: RelayConfig,
        adapters: &[Arc<ScriptedAdapter>],
    ) -> Orchestrator {
        let orchestrator = Orchestrator::new(config).unwrap();
        for adapter in adapters {
            orchestrator
                .register_adapter(adapter.clone() as Arc<dyn ModelAdapter>)
                .await
                .unwrap();
        }
        orchestrator
    }

    #[test]
    fn test_infer_category() {
        assert_eq!(infer_category("Quarterly GOAL check-in"), "goal-review");
        assert_eq!(infer_category("habit streak: 4 days"), "habit-tracking");
        assert_eq!(infer_category("Today I walked by the river"), "daily-reflection");
        assert_eq!(infer_category("shopping list"), "general");
    }

    #[test]
    fn test_cache_key_depends_on_options() {
        let personal = AnalysisOptions::default();
        let goals = AnalysisOptions::default().with_analysis_type(AnalysisType::Goals);
        assert_ne!(
            analysis_cache_key("same", &personal),
            analysis_cache_key("same", &goals)
        );
        assert_eq!(
            analysis_cache_key("same", &personal),
            analysis_cache_key("same", &personal.clone().without_cache())
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = config();
        config.consensus.consensus_threshold = 1.5;
        assert!(matches!(
            Orchestrator::new(config),
            Err(RelayError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_init_failures() {
        let orchestrator = orchestrator_with(config(), &[]).await;
        let a = Arc::new(ScriptedAdapter::new("a", PrivacyLevel::Local));
        orchestrator.register_adapter(a.clone()).await.unwrap();
        assert!(a.is_initialized());

        let err = orchestrator
            .register_adapter(Arc::new(ScriptedAdapter::new("a", PrivacyLevel::Cloud)))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::DuplicateAdapter(ref id) if id == "a"));

        let broken = Arc::new(
            ScriptedAdapter::new("broken", PrivacyLevel::Cloud)
                .with_init_failure(AdapterError::InitializationFailed("no weights".into())),
        );
        let err = orchestrator.register_adapter(broken).await.unwrap_err();
        assert!(matches!(err, RelayError::Initialization { ref adapter, .. } if adapter == "broken"));
        assert_eq!(orchestrator.adapter_ids(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_second_analysis_is_a_cache_hit() {
        let a = Arc::new(ScriptedAdapter::new("a", PrivacyLevel::Local));
        let orchestrator = orchestrator_with(config(), &[a.clone()]).await;
        let options = AnalysisOptions::default();
        let ctx = RequestContext::new();

        let first = orchestrator
            .analyze_personal_content("Today I reflected on the week.", &options, &ctx)
            .await
            .unwrap();
        assert!(!first.provenance.cache_hit);
        assert_eq!(first.category, "daily-reflection");
        assert_eq!(a.request_count(), 1);

        let calls_before = a.total_calls();
        let second = orchestrator
            .analyze_personal_content("Today I reflected on the week.", &options, &ctx)
            .await
            .unwrap();
        assert!(second.provenance.cache_hit);
        assert_eq!(second.analysis, first.analysis);
        assert_eq!(second.provenance.adapter.as_deref(), Some("a"));
        assert_eq!(a.total_calls(), calls_before, "cache hit makes no adapter calls");

        let metrics = orchestrator.get_metrics();
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.cache_lookups, 2);
    }

    #[tokio::test]
    async fn test_invalidate_by_category_tag() {
        let a = Arc::new(ScriptedAdapter::new("a", PrivacyLevel::Local));
        let orchestrator = orchestrator_with(config(), &[a.clone()]).await;
        let ctx = RequestContext::new();

        orchestrator
            .analyze_personal_content("my goal for march", &AnalysisOptions::default(), &ctx)
            .await
            .unwrap();
        assert_eq!(orchestrator.invalidate_cache_tags(&["goal-review"]), 1);

        let again = orchestrator
            .analyze_personal_content("my goal for march", &AnalysisOptions::default(), &ctx)
            .await
            .unwrap();
        assert!(!again.provenance.cache_hit);
        assert_eq!(a.request_count(), 2);
    }

    #[tokio::test]
    async fn test_use_cache_false_always_calls_adapter() {
        let a = Arc::new(ScriptedAdapter::new("a", PrivacyLevel::Local));
        let orchestrator = orchestrator_with(config(), &[a.clone()]).await;
        let options = AnalysisOptions::default().without_cache();

        for _ in 0..2 {
            orchestrator
                .analyze_personal_content("notes", &options, &RequestContext::new())
                .await
                .unwrap();
        }
        assert_eq!(a.request_count(), 2);
        assert_eq!(orchestrator.get_metrics().cache_lookups, 0);
    }

    #[tokio::test]
    async fn test_consensus_vote() {
        let mut config = config();
        config.consensus.require_consensus = true;
        let a = Arc::new(
            ScriptedAdapter::new("a", PrivacyLevel::Local).with_sentiment(SentimentLabel::Positive, 0.9),
        );
        let b = Arc::new(
            ScriptedAdapter::new("b", PrivacyLevel::Cloud).with_sentiment(SentimentLabel::Positive, 0.7),
        );
        let c = Arc::new(
            ScriptedAdapter::new("c", PrivacyLevel::Cloud).with_sentiment(SentimentLabel::Negative, 0.6),
        );
        let orchestrator = orchestrator_with(config, &[a.clone(), b.clone(), c.clone()]).await;

        let outcome = orchestrator
            .analyze_sentiment("a mixed day", &RequestContext::new())
            .await
            .unwrap();
        assert_eq!(outcome.result.label, SentimentLabel::Positive);
        assert!((outcome.result.confidence - 0.4889).abs() < 1e-3);
        let report = outcome.consensus.unwrap();
        assert_eq!(report.total_votes, 3);
        assert!(!report.weak);
        assert_eq!(outcome.provenance.adapters_used.len(), 3);
        assert_eq!(orchestrator.get_metrics().consensus_runs, 1);
    }

    #[tokio::test]
    async fn test_consensus_skips_failed_voters() {
        let mut config = config();
        config.consensus.require_consensus = true;
        let a = Arc::new(
            ScriptedAdapter::new("a", PrivacyLevel::Local).with_sentiment(SentimentLabel::Negative, 0.8),
        );
        let b = Arc::new(ScriptedAdapter::new("b", PrivacyLevel::Cloud));
        b.fail_next(AdapterError::NetworkError("reset".into()));
        let orchestrator = orchestrator_with(config, &[a.clone(), b.clone()]).await;

        let outcome = orchestrator
            .analyze_sentiment("hmm", &RequestContext::new())
            .await
            .unwrap();
        let report = outcome.consensus.unwrap();
        assert_eq!(report.total_votes, 1);
        assert_eq!(outcome.result.label, SentimentLabel::Negative);
        assert_eq!(
            orchestrator.resilience().breakers().get("b").unwrap().failure_count(),
            1
        );
    }

    #[tokio::test]
    async fn test_single_adapter_skips_consensus() {
        let mut config = config();
        config.consensus.require_consensus = true;
        let a = Arc::new(ScriptedAdapter::new("a", PrivacyLevel::Local));
        let orchestrator = orchestrator_with(config, &[a.clone()]).await;

        let outcome = orchestrator
            .analyze_sentiment("calm", &RequestContext::new())
            .await
            .unwrap();
        assert!(outcome.consensus.is_none());
        assert_eq!(outcome.provenance.adapter.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_invalid_response_is_retried() {
        let a = Arc::new(
            ScriptedAdapter::new("a", PrivacyLevel::Local).with_sentiment(SentimentLabel::Positive, 1.4),
        );
        let b = Arc::new(ScriptedAdapter::new("b", PrivacyLevel::Cloud));
        let orchestrator = orchestrator_with(config(), &[a.clone(), b.clone()]).await;

        let outcome = orchestrator
            .analyze_sentiment("great", &RequestContext::new())
            .await
            .unwrap();
        assert_eq!(outcome.provenance.adapter.as_deref(), Some("b"));
        assert_eq!(outcome.provenance.retries, 2);
        assert_eq!(a.request_count(), 3);
        assert_eq!(orchestrator.get_metrics().fallback_usage_count, 1);
    }

    #[tokio::test]
    async fn test_classify_validates_category() {
        let a = Arc::new(ScriptedAdapter::new("a", PrivacyLevel::Local));
        let orchestrator = orchestrator_with(config(), &[a.clone()]).await;
        let categories = vec!["work".to_string(), "health".to_string()];

        let routed = orchestrator
            .classify_content("went for a health check", &categories, &RequestContext::new())
            .await
            .unwrap();
        assert_eq!(routed.value.category, "health");
    }

    #[tokio::test]
    async fn test_local_privacy_excludes_cloud() {
        let cloud = Arc::new(ScriptedAdapter::new("cloud", PrivacyLevel::Cloud));
        let orchestrator = orchestrator_with(config(), &[cloud.clone()]).await;

        let err = orchestrator
            .extract_patterns(
                "private notes",
                &RequestContext::new().with_privacy(PrivacyLevel::Local),
            )
            .await
            .unwrap_err();
        assert!(err.is_no_healthy_adapter());
        assert_eq!(cloud.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_capability_is_not_routed() {
        let completion_only = Arc::new(
            ScriptedAdapter::new("c", PrivacyLevel::Local).with_capabilities([Capability::Completion]),
        );
        let orchestrator = orchestrator_with(config(), &[completion_only.clone()]).await;

        let routed = orchestrator
            .generate_completion(
                "hello there",
                &CompletionOptions::default(),
                &RequestContext::new().with_complexity(Complexity::Simple),
            )
            .await
            .unwrap();
        assert!(routed.value.text.contains("hello there"));

        let err = orchestrator
            .analyze_sentiment("hello", &RequestContext::new())
            .await
            .unwrap_err();
        assert!(err.is_no_healthy_adapter());
    }

    #[tokio::test]
    async fn test_remove_adapter() {
        let a = Arc::new(ScriptedAdapter::new("a", PrivacyLevel::Local));
        let orchestrator = orchestrator_with(config(), &[a.clone()]).await;
        orchestrator
            .analyze_sentiment("x", &RequestContext::new())
            .await
            .unwrap();
        assert!(orchestrator.resilience().breakers().get("a").is_some());

        orchestrator.remove_adapter("a").await.unwrap();
        assert!(a.is_disposed());
        assert!(orchestrator.resilience().breakers().get("a").is_none());
        assert!(matches!(
            orchestrator.remove_adapter("a").await,
            Err(RelayError::AdapterNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_cancels_in_flight_work() {
        let slow = Arc::new(
            ScriptedAdapter::new("slow", PrivacyLevel::Local).with_latency(Duration::from_secs(20)),
        );
        let orchestrator = Arc::new(orchestrator_with(config(), &[slow.clone()]).await);

        let task = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move {
                orchestrator
                    .analyze_sentiment("waiting", &RequestContext::new())
                    .await
                    .map(|o| o.result)
            }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        orchestrator.dispose().await;

        assert!(matches!(task.await.unwrap(), Err(RelayError::Cancelled)));
        assert!(slow.is_disposed());
        assert!(orchestrator.adapter_ids().is_empty());
        assert!(matches!(
            orchestrator
                .analyze_sentiment("after", &RequestContext::new())
                .await,
            Err(RelayError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_adapter_status_probes_live() {
        let a = Arc::new(ScriptedAdapter::new("a", PrivacyLevel::Local));
        let b = Arc::new(ScriptedAdapter::new("b", PrivacyLevel::Cloud).with_cost(0.02));
        b.set_available(false);
        let orchestrator = orchestrator_with(config(), &[a.clone(), b.clone()]).await;

        let status = orchestrator.get_adapter_status().await;
        assert_eq!(status.len(), 2);
        assert!(status[0].available);
        assert!(!status[1].available);
        assert_eq!(status[1].circuit_state, CircuitState::Closed);
        assert_eq!(b.probe_count(), 1);
    }
}
