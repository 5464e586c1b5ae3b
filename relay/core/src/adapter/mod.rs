//! Model Adapter Abstraction
//!
//! This module provides the adapter abstraction the relay coordinates:
//! - [`ModelAdapter`]: the trait every local or remote inference service implements
//! - Typed, validated response kinds per operation
//! - [`ScriptedAdapter`]: a programmable adapter for tests and simulation

mod scripted;
mod traits;
mod types;

pub use scripted::{AdapterCall, ScriptedAdapter};
pub use traits::ModelAdapter;
pub use types::{
    AdapterIdentity, AnalysisResult, AnalysisType, Capability, ClassificationResult,
    CompletionOptions, CompletionResult, Pattern, PatternResult, PrivacyLevel, SentimentLabel,
    SentimentResult,
};
