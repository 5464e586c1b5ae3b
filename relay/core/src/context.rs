//! Request Context
//!
//! Read-only description of a request that shapes routing decisions:
//! privacy, urgency, complexity, capability requirements and cost ceiling.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapter::{Capability, PrivacyLevel};

/// Kind of content being processed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Free-form personal note or journal entry
    #[default]
    Note,
    /// Structured goal or plan
    Goal,
    /// Habit log
    Habit,
    /// Raw prompt for completion
    Prompt,
}

/// How quickly the caller needs an answer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
}

impl Urgency {
    /// Latency budget a fallback entry must fit within (`None` = unbounded)
    #[must_use]
    pub fn latency_budget(&self) -> Option<Duration> {
        match self {
            Self::Low => None,
            Self::Normal => Some(Duration::from_secs(30)),
            Self::High => Some(Duration::from_secs(10)),
        }
    }
}

/// Complexity hint used for adaptive timeouts and quality floors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    #[default]
    Medium,
    Complex,
}

impl Complexity {
    /// Factor applied to the default timeout
    #[must_use]
    pub fn timeout_factor(&self) -> f64 {
        match self {
            Self::Simple => 0.5,
            Self::Medium => 1.0,
            Self::Complex => 2.0,
        }
    }

    /// Minimum quality a fallback entry must declare to serve this complexity
    #[must_use]
    pub fn quality_floor(&self) -> f64 {
        match self {
            Self::Simple => 0.0,
            Self::Medium => 0.5,
            Self::Complex => 0.8,
        }
    }
}

/// Routing input for one logical operation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestContext {
    /// What is being processed
    pub content_type: ContentType,

    /// Privacy requirement; `Some(Local)` restricts routing to local adapters
    pub privacy_level: Option<PrivacyLevel>,

    /// Latency sensitivity
    pub urgency: Urgency,

    /// Complexity hint
    pub complexity: Complexity,

    /// Capabilities the serving adapter must advertise
    pub required_capabilities: HashSet<Capability>,

    /// Maximum acceptable cost per call
    pub max_cost: Option<f64>,

    /// Adapter to try first if it qualifies
    pub preferred_adapter: Option<String>,
}

impl RequestContext {
    /// Create a default context
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_privacy(mut self, level: PrivacyLevel) -> Self {
        self.privacy_level = Some(level);
        self
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.required_capabilities.insert(capability);
        self
    }

    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }

    pub fn with_preferred_adapter(mut self, adapter_id: impl Into<String>) -> Self {
        self.preferred_adapter = Some(adapter_id.into());
        self
    }

    /// Whether only local adapters may serve this request
    #[must_use]
    pub fn requires_local(&self) -> bool {
        self.privacy_level == Some(PrivacyLevel::Local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_builder() {
        let ctx = RequestContext::new()
            .with_privacy(PrivacyLevel::Local)
            .with_urgency(Urgency::High)
            .with_capability(Capability::Sentiment)
            .with_preferred_adapter("ollama");

        assert!(ctx.requires_local());
        assert_eq!(ctx.urgency.latency_budget(), Some(Duration::from_secs(10)));
        assert!(ctx.required_capabilities.contains(&Capability::Sentiment));
        assert_eq!(ctx.preferred_adapter.as_deref(), Some("ollama"));
    }

    #[test]
    fn test_complexity_factors() {
        assert!((Complexity::Simple.timeout_factor() - 0.5).abs() < f64::EPSILON);
        assert!((Complexity::Complex.quality_floor() - 0.8).abs() < f64::EPSILON);
        assert_eq!(Urgency::Low.latency_budget(), None);
    }
}
