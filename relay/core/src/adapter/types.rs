//! Adapter Response Types
//!
//! Each adapter operation returns its own typed response. Responses are
//! validated at the adapter boundary before the orchestrator uses them; a
//! response that fails validation becomes [`AdapterError::InvalidResponse`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::AdapterError;

// ============================================================================
// Identity
// ============================================================================

/// Where an adapter processes data
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyLevel {
    /// Runs on this machine; content never leaves it
    Local,
    /// Remote inference service
    Cloud,
    /// Local preprocessing with remote inference
    #[default]
    Hybrid,
}

impl PrivacyLevel {
    /// Rank used by privacy-first ordering (lower sorts first)
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::Local => 0,
            Self::Hybrid => 1,
            Self::Cloud => 2,
        }
    }
}

/// Operations an adapter can service
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Completion,
    PatternExtraction,
    ContentAnalysis,
    Sentiment,
    Classification,
}

impl Capability {
    /// Every capability
    #[must_use]
    pub fn all() -> HashSet<Self> {
        [
            Self::Completion,
            Self::PatternExtraction,
            Self::ContentAnalysis,
            Self::Sentiment,
            Self::Classification,
        ]
        .into_iter()
        .collect()
    }
}

/// Immutable description of a registered adapter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdapterIdentity {
    /// Unique adapter id
    pub id: String,

    /// Privacy characteristics
    pub privacy: PrivacyLevel,

    /// Capabilities advertised by the adapter
    pub capabilities: HashSet<Capability>,

    /// Approximate cost per call (0.0 for local adapters)
    pub cost_per_call: f64,
}

impl AdapterIdentity {
    /// Create an identity advertising every capability
    pub fn new(id: impl Into<String>, privacy: PrivacyLevel) -> Self {
        Self {
            id: id.into(),
            privacy,
            capabilities: Capability::all(),
            cost_per_call: 0.0,
        }
    }

    /// Check whether every capability in `required` is advertised
    #[must_use]
    pub fn supports_all(&self, required: &HashSet<Capability>) -> bool {
        required.is_subset(&self.capabilities)
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Options for completion requests
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    /// Maximum tokens in response (0 = adapter default)
    pub max_tokens: u32,
    /// Temperature (0.0-1.0)
    pub temperature: f32,
    /// Optional system prompt
    pub system: Option<String>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 0,
            temperature: 0.7,
            system: None,
        }
    }
}

impl CompletionOptions {
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Kind of analysis requested from `analyze_content`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    #[default]
    Personal,
    Reflection,
    Goals,
    Habits,
}

// ============================================================================
// Responses
// ============================================================================

/// Completion response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    /// Generated text
    pub text: String,
    /// Tokens used, if reported
    pub tokens_used: Option<u32>,
}

/// A recurring pattern found in content
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub name: String,
    pub description: String,
    pub confidence: f64,
    pub occurrences: u32,
}

/// Pattern extraction response
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternResult {
    pub patterns: Vec<Pattern>,
}

/// Content analysis response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    pub insights: Vec<String>,
    pub themes: Vec<String>,
    pub confidence: f64,
}

/// Sentiment polarity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

/// Sentiment response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SentimentResult {
    pub label: SentimentLabel,
    pub confidence: f64,
}

/// Classification response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: String,
    pub confidence: f64,
}

// ============================================================================
// Validation
// ============================================================================

fn check_confidence(what: &str, value: f64) -> Result<(), AdapterError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(AdapterError::InvalidResponse(format!(
            "{what} confidence {value} outside [0, 1]"
        )))
    }
}

impl CompletionResult {
    pub fn validate(&self) -> Result<(), AdapterError> {
        if self.text.trim().is_empty() {
            return Err(AdapterError::InvalidResponse("empty completion".into()));
        }
        Ok(())
    }
}

impl PatternResult {
    pub fn validate(&self) -> Result<(), AdapterError> {
        for pattern in &self.patterns {
            if pattern.name.trim().is_empty() {
                return Err(AdapterError::InvalidResponse("unnamed pattern".into()));
            }
            check_confidence("pattern", pattern.confidence)?;
        }
        Ok(())
    }
}

impl AnalysisResult {
    pub fn validate(&self) -> Result<(), AdapterError> {
        if self.summary.trim().is_empty() {
            return Err(AdapterError::InvalidResponse("empty analysis summary".into()));
        }
        check_confidence("analysis", self.confidence)
    }
}

impl SentimentResult {
    pub fn validate(&self) -> Result<(), AdapterError> {
        check_confidence("sentiment", self.confidence)
    }
}

impl ClassificationResult {
    /// Category must be one of the requested categories
    pub fn validate(&self, categories: &[String]) -> Result<(), AdapterError> {
        if !categories.iter().any(|c| c == &self.category) {
            return Err(AdapterError::InvalidResponse(format!(
                "category '{}' was not requested",
                self.category
            )));
        }
        check_confidence("classification", self.confidence)
    }
}
