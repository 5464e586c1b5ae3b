//! Model Adapter Trait
//!
//! Trait definition for model adapters. This abstraction lets the relay work
//! with any local or remote inference service without changing core logic.
//!
//! Implementations handle provider-specific details (request formats, auth,
//! transport) and report failures using the [`AdapterError`] taxonomy so the
//! resilience layer can classify them.

use async_trait::async_trait;

use super::types::{
    AdapterIdentity, AnalysisResult, AnalysisType, ClassificationResult, CompletionOptions,
    CompletionResult, PatternResult, SentimentResult,
};
use crate::error::AdapterError;

/// Model adapter trait
///
/// Content passed to these methods has already been privacy-filtered by the
/// caller; adapters must not assume otherwise, and the relay does not filter
/// again.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Static identity of this adapter
    fn identity(&self) -> &AdapterIdentity;

    /// Adapter id (shorthand for `identity().id`)
    fn id(&self) -> &str {
        &self.identity().id
    }

    /// Prepare the adapter for use (load models, open connections)
    async fn initialize(&self) -> Result<(), AdapterError>;

    /// Live availability probe
    async fn is_available(&self) -> bool;

    /// Generate a completion for a prompt
    async fn generate_completion(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<CompletionResult, AdapterError>;

    /// Extract recurring patterns from content
    async fn extract_patterns(&self, content: &str) -> Result<PatternResult, AdapterError>;

    /// Analyze content for the given analysis type
    async fn analyze_content(
        &self,
        content: &str,
        analysis_type: AnalysisType,
    ) -> Result<AnalysisResult, AdapterError>;

    /// Determine the sentiment of content
    async fn analyze_sentiment(&self, content: &str) -> Result<SentimentResult, AdapterError>;

    /// Assign content to one of the given categories
    async fn classify_content(
        &self,
        content: &str,
        categories: &[String],
    ) -> Result<ClassificationResult, AdapterError>;

    /// Release resources held by the adapter
    async fn dispose(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}
