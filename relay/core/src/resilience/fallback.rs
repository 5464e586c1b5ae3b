//! Fallback Chain Resolution
//!
//! Produces the ordered list of adapters to try for a request.
//!
//! # Architecture
//!
//! ```text
//! RequestContext + registered adapters
//!         |
//!         v
//! policy filter (privacy, capabilities, cost)
//!         |
//!         v
//! primary: preferred adapter > configured primary > first registered
//!         |
//!         v
//! fallbacks: entry filters (latency budget, quality floor), then strategy order
//! ```
//!
//! The chain only orders candidates. Breaker and availability checks happen
//! when the resilience manager walks it.

use std::collections::HashSet;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::adapter::{AdapterIdentity, Capability, PrivacyLevel};
use crate::context::RequestContext;

/// Priority assigned to adapters absent from the configuration, plus registration index
pub const UNCONFIGURED_PRIORITY_BASE: u32 = 1_000;

// ============================================================================
// Configuration
// ============================================================================

/// How fallbacks are ordered
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// Ascending priority
    #[default]
    Priority,
    /// Local adapters first, then hybrid, then cloud; priority within each
    PrivacyFirst,
}

/// One configured fallback candidate
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FallbackEntry {
    /// Adapter id
    pub adapter_id: String,

    /// Lower is tried first
    #[serde(default)]
    pub priority: u32,

    /// Capabilities this entry must advertise to be used
    #[serde(default)]
    pub required_capabilities: Option<HashSet<Capability>>,

    /// Expected worst-case latency in milliseconds
    #[serde(default)]
    pub max_latency_ms: Option<u64>,

    /// Declared quality in `[0, 1]`
    #[serde(default)]
    pub quality_threshold: Option<f64>,
}

impl FallbackEntry {
    pub fn new(adapter_id: impl Into<String>, priority: u32) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            priority,
            required_capabilities: None,
            max_latency_ms: None,
            quality_threshold: None,
        }
    }

    #[must_use]
    pub fn with_max_latency_ms(mut self, max_latency_ms: u64) -> Self {
        self.max_latency_ms = Some(max_latency_ms);
        self
    }

    #[must_use]
    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality_threshold = Some(quality);
        self
    }

    #[must_use]
    pub fn with_required_capabilities(
        mut self,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Self {
        self.required_capabilities = Some(capabilities.into_iter().collect());
        self
    }

    /// Check the entry's own constraints against the request and adapter
    fn admits(&self, context: &RequestContext, identity: &AdapterIdentity) -> bool {
        if let Some(required) = &self.required_capabilities {
            if !identity.supports_all(required) {
                return false;
            }
        }
        if let (Some(max_latency), Some(budget)) =
            (self.max_latency_ms, context.urgency.latency_budget())
        {
            if u128::from(max_latency) > budget.as_millis() {
                return false;
            }
        }
        if let Some(quality) = self.quality_threshold {
            if quality < context.complexity.quality_floor() {
                return false;
            }
        }
        true
    }
}

/// Fallback configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Adapter tried first when the request names no preference
    pub primary: Option<String>,

    /// Ranked fallback candidates
    pub entries: Vec<FallbackEntry>,

    /// Ordering strategy
    pub strategy: FallbackStrategy,
}

// ============================================================================
// Fallback Chain
// ============================================================================

/// Ordered candidates for one request
#[derive(Clone, Debug, PartialEq)]
pub struct FallbackChain {
    /// Adapter tried first
    pub primary: String,

    /// Remaining candidates in order; never contains `primary`
    pub fallbacks: Vec<FallbackEntry>,

    /// Strategy used to order `fallbacks`
    pub strategy: FallbackStrategy,
}

impl FallbackChain {
    /// Primary followed by every fallback
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str())
            .chain(self.fallbacks.iter().map(|e| e.adapter_id.as_str()))
    }

    /// Get the next candidate after the given adapter
    #[must_use]
    pub fn next_fallback(&self, current: &str) -> Option<&str> {
        if current == self.primary {
            return self.fallbacks.first().map(|e| e.adapter_id.as_str());
        }
        let pos = self.fallbacks.iter().position(|e| e.adapter_id == current)?;
        self.fallbacks.get(pos + 1).map(|e| e.adapter_id.as_str())
    }

    #[must_use]
    pub fn contains(&self, adapter_id: &str) -> bool {
        self.candidates().any(|id| id == adapter_id)
    }

    /// Total depth of this chain (including primary)
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self.fallbacks.len()
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Builds fallback chains from configuration and the live registry
pub struct FallbackChainResolver {
    config: RwLock<FallbackConfig>,
    privacy_level: PrivacyLevel,
}

impl FallbackChainResolver {
    /// `privacy_level` is the relay-wide default; `Local` restricts every request
    #[must_use]
    pub fn new(config: FallbackConfig, privacy_level: PrivacyLevel) -> Self {
        Self {
            config: RwLock::new(config),
            privacy_level,
        }
    }

    pub fn config(&self) -> FallbackConfig {
        self.config.read().clone()
    }

    /// Replace the configuration at runtime
    pub fn set_config(&self, config: FallbackConfig) {
        *self.config.write() = config;
    }

    /// Whether an adapter may serve a request at all
    pub fn is_eligible(&self, context: &RequestContext, identity: &AdapterIdentity) -> bool {
        let local_only = context.requires_local() || self.privacy_level == PrivacyLevel::Local;
        if local_only && identity.privacy != PrivacyLevel::Local {
            return false;
        }
        if !identity.supports_all(&context.required_capabilities) {
            return false;
        }
        match context.max_cost {
            Some(max_cost) => identity.cost_per_call <= max_cost,
            None => true,
        }
    }

    /// Resolve the chain for a request; `None` when no registered adapter qualifies
    ///
    /// `adapters` must be in registration order.
    pub fn resolve(
        &self,
        context: &RequestContext,
        adapters: &[AdapterIdentity],
    ) -> Option<FallbackChain> {
        let config = self.config.read().clone();

        let eligible: Vec<(usize, &AdapterIdentity)> = adapters
            .iter()
            .enumerate()
            .filter(|(_, identity)| self.is_eligible(context, identity))
            .collect();

        let is_eligible_id =
            |id: &str| eligible.iter().any(|(_, identity)| identity.id == id);

        let primary = context
            .preferred_adapter
            .as_deref()
            .filter(|id| is_eligible_id(id))
            .or_else(|| config.primary.as_deref().filter(|id| is_eligible_id(id)))
            .or_else(|| eligible.first().map(|(_, identity)| identity.id.as_str()))?
            .to_string();

        let mut seen = HashSet::new();
        seen.insert(primary.clone());

        let mut fallbacks: Vec<(PrivacyLevel, FallbackEntry)> = Vec::new();
        for (index, identity) in &eligible {
            if !seen.insert(identity.id.clone()) {
                continue;
            }
            let entry = config
                .entries
                .iter()
                .find(|e| e.adapter_id == identity.id)
                .cloned()
                .or_else(|| {
                    (config.primary.as_deref() == Some(identity.id.as_str()))
                        .then(|| FallbackEntry::new(identity.id.clone(), 0))
                })
                .unwrap_or_else(|| {
                    let index = u32::try_from(*index).unwrap_or(u32::MAX);
                    FallbackEntry::new(
                        identity.id.clone(),
                        UNCONFIGURED_PRIORITY_BASE.saturating_add(index),
                    )
                });

            if entry.admits(context, identity) {
                fallbacks.push((identity.privacy, entry));
            } else {
                tracing::debug!(adapter = %identity.id, "Fallback entry filtered out for request");
            }
        }

        match config.strategy {
            FallbackStrategy::Priority => fallbacks.sort_by_key(|(_, e)| e.priority),
            FallbackStrategy::PrivacyFirst => {
                fallbacks.sort_by_key(|(privacy, e)| (privacy.rank(), e.priority));
            }
        }

        Some(FallbackChain {
            primary,
            fallbacks: fallbacks.into_iter().map(|(_, e)| e).collect(),
            strategy: config.strategy,
        })
    }
}

impl std::fmt::Debug for FallbackChainResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackChainResolver")
            .field("config", &*self.config.read())
            .field("privacy_level", &self.privacy_level)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Complexity, Urgency};
    use pretty_assertions::assert_eq;

    fn ids(chain: &FallbackChain) -> Vec<&str> {
        chain.candidates().collect()
    }

    fn registry() -> Vec<AdapterIdentity> {
        vec![
            AdapterIdentity::new("cloud-a", PrivacyLevel::Cloud),
            AdapterIdentity::new("local", PrivacyLevel::Local),
            AdapterIdentity::new("hybrid", PrivacyLevel::Hybrid),
            AdapterIdentity::new("cloud-b", PrivacyLevel::Cloud),
        ]
    }

    #[test]
    fn test_registration_order_without_config() {
        let resolver = FallbackChainResolver::new(FallbackConfig::default(), PrivacyLevel::Hybrid);
        let chain = resolver.resolve(&RequestContext::new(), &registry()).unwrap();

        assert_eq!(ids(&chain), vec!["cloud-a", "local", "hybrid", "cloud-b"]);
        assert_eq!(chain.depth(), 4);
    }

    #[test]
    fn test_configured_priorities_then_unconfigured() {
        let config = FallbackConfig {
            primary: Some("hybrid".into()),
            entries: vec![FallbackEntry::new("cloud-b", 1), FallbackEntry::new("local", 2)],
            strategy: FallbackStrategy::Priority,
        };
        let resolver = FallbackChainResolver::new(config, PrivacyLevel::Hybrid);
        let chain = resolver.resolve(&RequestContext::new(), &registry()).unwrap();

        assert_eq!(ids(&chain), vec!["hybrid", "cloud-b", "local", "cloud-a"]);
    }

    #[test]
    fn test_replaced_config_applies_to_next_resolve() {
        let resolver = FallbackChainResolver::new(FallbackConfig::default(), PrivacyLevel::Hybrid);
        resolver.set_config(FallbackConfig {
            primary: Some("cloud-b".into()),
            entries: vec![FallbackEntry::new("hybrid", 1)],
            strategy: FallbackStrategy::Priority,
        });

        let chain = resolver.resolve(&RequestContext::new(), &registry()).unwrap();
        assert_eq!(ids(&chain), vec!["cloud-b", "hybrid", "cloud-a", "local"]);
        assert_eq!(resolver.config().primary.as_deref(), Some("cloud-b"));
    }

    #[test]
    fn test_preferred_adapter_never_duplicated() {
        let config = FallbackConfig {
            primary: Some("local".into()),
            entries: vec![FallbackEntry::new("cloud-a", 5)],
            strategy: FallbackStrategy::Priority,
        };
        let resolver = FallbackChainResolver::new(config, PrivacyLevel::Hybrid);
        let ctx = RequestContext::new().with_preferred_adapter("cloud-a");
        let chain = resolver.resolve(&ctx, &registry()).unwrap();

        assert_eq!(chain.primary, "cloud-a");
        assert!(chain.fallbacks.iter().all(|e| e.adapter_id != "cloud-a"));
        assert_eq!(chain.next_fallback("cloud-a"), Some("local"));
    }

    #[test]
    fn test_local_privacy_restricts_chain() {
        let resolver = FallbackChainResolver::new(FallbackConfig::default(), PrivacyLevel::Hybrid);
        let ctx = RequestContext::new()
            .with_privacy(PrivacyLevel::Local)
            .with_preferred_adapter("cloud-a");
        let chain = resolver.resolve(&ctx, &registry()).unwrap();

        assert_eq!(ids(&chain), vec!["local"]);

        let strict = FallbackChainResolver::new(FallbackConfig::default(), PrivacyLevel::Local);
        let chain = strict.resolve(&RequestContext::new(), &registry()).unwrap();
        assert_eq!(ids(&chain), vec!["local"]);
    }

    #[test]
    fn test_capabilities_and_cost_filter() {
        let mut adapters = registry();
        adapters[0].capabilities = [Capability::Completion].into_iter().collect();
        adapters[3].cost_per_call = 0.05;

        let resolver = FallbackChainResolver::new(FallbackConfig::default(), PrivacyLevel::Hybrid);
        let ctx = RequestContext::new()
            .with_capability(Capability::Sentiment)
            .with_max_cost(0.01);
        let chain = resolver.resolve(&ctx, &adapters).unwrap();

        assert_eq!(ids(&chain), vec!["local", "hybrid"]);
    }

    #[test]
    fn test_privacy_first_strategy() {
        let config = FallbackConfig {
            primary: Some("cloud-b".into()),
            entries: vec![
                FallbackEntry::new("cloud-a", 1),
                FallbackEntry::new("hybrid", 2),
                FallbackEntry::new("local", 3),
            ],
            strategy: FallbackStrategy::PrivacyFirst,
        };
        let resolver = FallbackChainResolver::new(config, PrivacyLevel::Hybrid);
        let chain = resolver.resolve(&RequestContext::new(), &registry()).unwrap();

        assert_eq!(ids(&chain), vec!["cloud-b", "local", "hybrid", "cloud-a"]);
    }

    #[test]
    fn test_entry_filters_latency_and_quality() {
        let config = FallbackConfig {
            primary: Some("cloud-a".into()),
            entries: vec![
                FallbackEntry::new("local", 1).with_max_latency_ms(45_000),
                FallbackEntry::new("hybrid", 2).with_quality(0.6),
                FallbackEntry::new("cloud-b", 3).with_quality(0.9),
            ],
            strategy: FallbackStrategy::Priority,
        };
        let resolver = FallbackChainResolver::new(config, PrivacyLevel::Hybrid);

        let urgent = RequestContext::new().with_urgency(Urgency::High);
        let chain = resolver.resolve(&urgent, &registry()).unwrap();
        assert_eq!(ids(&chain), vec!["cloud-a", "hybrid", "cloud-b"]);

        let complex = RequestContext::new()
            .with_urgency(Urgency::Low)
            .with_complexity(Complexity::Complex);
        let chain = resolver.resolve(&complex, &registry()).unwrap();
        assert_eq!(ids(&chain), vec!["cloud-a", "local", "cloud-b"]);
    }

    #[test]
    fn test_nothing_eligible() {
        let resolver = FallbackChainResolver::new(FallbackConfig::default(), PrivacyLevel::Local);
        let adapters = vec![AdapterIdentity::new("cloud", PrivacyLevel::Cloud)];
        assert!(resolver.resolve(&RequestContext::new(), &adapters).is_none());
        assert!(resolver.resolve(&RequestContext::new(), &[]).is_none());
    }
}
