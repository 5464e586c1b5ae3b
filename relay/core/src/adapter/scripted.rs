//! Scripted Adapter
//!
//! A deterministic, programmable adapter for exercising the resilience layer
//! without real inference. It supports:
//! - Queued one-shot failures and a persistent failure mode
//! - Availability toggling for fallback testing
//! - Simulated latency (honours tokio's paused clock in tests)
//! - Call history tracking, including availability probes
//!
//! # Usage
//!
//! ```ignore
//! let adapter = Arc::new(ScriptedAdapter::new("local-llm", PrivacyLevel::Local));
//! adapter.fail_next(AdapterError::NetworkError("reset".into()));
//!
//! // ... run requests through the orchestrator ...
//!
//! assert_eq!(adapter.request_count(), 2);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::traits::ModelAdapter;
use super::types::{
    AdapterIdentity, AnalysisResult, AnalysisType, Capability, ClassificationResult,
    CompletionOptions, CompletionResult, Pattern, PatternResult, PrivacyLevel, SentimentLabel,
    SentimentResult,
};
use crate::error::AdapterError;

/// A captured adapter call for test verification
#[derive(Clone, Debug)]
pub struct AdapterCall {
    /// Operation name (e.g. `analyze_sentiment`)
    pub operation: &'static str,
    /// Content or prompt passed in
    pub input: String,
    /// When the call started
    pub started_at: Instant,
}

/// Programmable adapter with failure injection
pub struct ScriptedAdapter {
    identity: AdapterIdentity,
    latency: Duration,
    sentiment: SentimentResult,
    available: AtomicBool,
    init_failure: Mutex<Option<AdapterError>>,
    queued_failures: Mutex<VecDeque<AdapterError>>,
    persistent_failure: Mutex<Option<AdapterError>>,
    history: Mutex<Vec<AdapterCall>>,
    probes: AtomicUsize,
    initialized: AtomicBool,
    disposed: AtomicBool,
}

impl std::fmt::Debug for ScriptedAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedAdapter")
            .field("id", &self.identity.id)
            .field("privacy", &self.identity.privacy)
            .field("latency", &self.latency)
            .field("available", &self.available.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ScriptedAdapter {
    /// Create an adapter advertising every capability, with no latency
    pub fn new(id: impl Into<String>, privacy: PrivacyLevel) -> Self {
        Self {
            identity: AdapterIdentity::new(id, privacy),
            latency: Duration::ZERO,
            sentiment: SentimentResult {
                label: SentimentLabel::Neutral,
                confidence: 0.5,
            },
            available: AtomicBool::new(true),
            init_failure: Mutex::new(None),
            queued_failures: Mutex::new(VecDeque::new()),
            persistent_failure: Mutex::new(None),
            history: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
            initialized: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Restrict advertised capabilities
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.identity.capabilities = capabilities.into_iter().collect::<HashSet<_>>();
        self
    }

    /// Simulate latency on every work call
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fix the sentiment this adapter reports
    #[must_use]
    pub fn with_sentiment(mut self, label: SentimentLabel, confidence: f64) -> Self {
        self.sentiment = SentimentResult { label, confidence };
        self
    }

    /// Set the cost per call
    #[must_use]
    pub fn with_cost(mut self, cost_per_call: f64) -> Self {
        self.identity.cost_per_call = cost_per_call;
        self
    }

    /// Make `initialize()` fail
    #[must_use]
    pub fn with_init_failure(self, error: AdapterError) -> Self {
        *self.init_failure.lock() = Some(error);
        self
    }

    /// Queue a failure for the next work call
    pub fn fail_next(&self, error: AdapterError) {
        self.queued_failures.lock().push_back(error);
    }

    /// Queue the same failure for the next `times` work calls
    pub fn fail_times(&self, times: usize, error: &AdapterError) {
        let mut queue = self.queued_failures.lock();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Fail every work call until cleared
    pub fn fail_always(&self, error: AdapterError) {
        *self.persistent_failure.lock() = Some(error);
    }

    /// Stop failing
    pub fn recover(&self) {
        self.queued_failures.lock().clear();
        *self.persistent_failure.lock() = None;
    }

    /// Toggle the availability probe result
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Number of work calls received (excludes availability probes)
    pub fn request_count(&self) -> usize {
        self.history.lock().len()
    }

    /// Number of availability probes received
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::Acquire)
    }

    /// Every call of any kind, probes included
    pub fn total_calls(&self) -> usize {
        self.request_count() + self.probe_count()
    }

    /// Work calls by operation name
    pub fn request_counts(&self) -> HashMap<&'static str, usize> {
        let mut counts = HashMap::new();
        for call in self.history.lock().iter() {
            *counts.entry(call.operation).or_insert(0) += 1;
        }
        counts
    }

    /// Captured call history
    pub fn history(&self) -> Vec<AdapterCall> {
        self.history.lock().clone()
    }

    /// Whether `initialize()` succeeded
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Whether `dispose()` was called
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Record the call, wait out the latency, then apply scripted failures
    async fn serve(&self, operation: &'static str, input: &str) -> Result<(), AdapterError> {
        self.history.lock().push(AdapterCall {
            operation,
            input: input.to_string(),
            started_at: Instant::now(),
        });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let queued = self.queued_failures.lock().pop_front();
        if let Some(error) = queued {
            return Err(error);
        }
        let persistent = self.persistent_failure.lock().clone();
        match persistent {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ModelAdapter for ScriptedAdapter {
    fn identity(&self) -> &AdapterIdentity {
        &self.identity
    }

    async fn initialize(&self) -> Result<(), AdapterError> {
        let failure = self.init_failure.lock().clone();
        if let Some(error) = failure {
            return Err(error);
        }
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn is_available(&self) -> bool {
        self.probes.fetch_add(1, Ordering::AcqRel);
        self.available.load(Ordering::Acquire)
    }

    async fn generate_completion(
        &self,
        prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<CompletionResult, AdapterError> {
        self.serve("generate_completion", prompt).await?;
        Ok(CompletionResult {
            text: format!("[{}] {}", self.identity.id, prompt),
            tokens_used: Some(u32::try_from(prompt.split_whitespace().count()).unwrap_or(u32::MAX)),
        })
    }

    async fn extract_patterns(&self, content: &str) -> Result<PatternResult, AdapterError> {
        self.serve("extract_patterns", content).await?;

        let mut counts: HashMap<String, u32> = HashMap::new();
        for word in content.split_whitespace() {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if word.len() > 3 {
                *counts.entry(word).or_insert(0) += 1;
            }
        }

        let mut patterns: Vec<Pattern> = counts
            .into_iter()
            .filter(|(_, n)| *n >= 2)
            .map(|(word, n)| Pattern {
                description: format!("'{word}' recurs {n} times"),
                name: word,
                confidence: (0.5 + f64::from(n) / 10.0).min(1.0),
                occurrences: n,
            })
            .collect();
        patterns.sort_by(|a, b| b.occurrences.cmp(&a.occurrences).then(a.name.cmp(&b.name)));

        Ok(PatternResult { patterns })
    }

    async fn analyze_content(
        &self,
        content: &str,
        analysis_type: AnalysisType,
    ) -> Result<AnalysisResult, AdapterError> {
        self.serve("analyze_content", content).await?;

        let summary: String = content
            .split_terminator(['.', '\n'])
            .next()
            .unwrap_or(content)
            .chars()
            .take(120)
            .collect();
        let words = content.split_whitespace().count();

        Ok(AnalysisResult {
            summary: if summary.trim().is_empty() {
                format!("{} analysis by {}", words, self.identity.id)
            } else {
                summary.trim().to_string()
            },
            insights: vec![format!("{words} words analyzed by {}", self.identity.id)],
            themes: vec![format!("{analysis_type:?}").to_lowercase()],
            confidence: 0.8,
        })
    }

    async fn analyze_sentiment(&self, content: &str) -> Result<SentimentResult, AdapterError> {
        self.serve("analyze_sentiment", content).await?;
        Ok(self.sentiment.clone())
    }

    async fn classify_content(
        &self,
        content: &str,
        categories: &[String],
    ) -> Result<ClassificationResult, AdapterError> {
        self.serve("classify_content", content).await?;

        let lowered = content.to_lowercase();
        let category = categories
            .iter()
            .find(|c| lowered.contains(&c.to_lowercase()))
            .or_else(|| categories.first())
            .ok_or_else(|| AdapterError::RequestFailed("no categories supplied".into()))?;

        Ok(ClassificationResult {
            category: category.clone(),
            confidence: 0.7,
        })
    }

    async fn dispose(&self) -> Result<(), AdapterError> {
        self.disposed.store(true, Ordering::Release);
        Ok(())
    }
}
