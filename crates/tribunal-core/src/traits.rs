//! Core trait definitions for model providers and context retrieval.
//!
//! These async traits are implemented by the `tribunal-providers` and
//! `tribunal-retrieval` crates respectively.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{ContextFragment, Question};
use crate::outcome::TokenUsage;

// ---------------------------------------------------------------------------
// Model provider trait
// ---------------------------------------------------------------------------

/// Trait for LLM backends that produce grading completions.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name (e.g. "anthropic").
    fn name(&self) -> &str;

    /// Run one grading completion.
    async fn complete(&self, request: &GradeRequest) -> anyhow::Result<GradeResponse>;
}

/// Request for one grading completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeRequest {
    /// Model identifier (e.g. "claude-sonnet-4-20250514").
    pub model: String,
    /// System prompt establishing the evaluator role.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// The composed grading prompt.
    pub prompt: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

/// Raw response from one grading completion.
///
/// The content is handed to the output normalizer untouched; providers do
/// not interpret it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeResponse {
    /// The raw response content.
    pub content: String,
    /// Model that actually produced the response.
    pub model: String,
    /// Token usage.
    pub token_usage: TokenUsage,
    /// Latency in milliseconds.
    pub latency_ms: u64,
}

/// Default system prompt used when a request does not carry one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an automated exam grader. Evaluate the student answer against the rubric and respond with a single JSON object containing the fields reasoning, criteria_scores, total_score, and feedback.";

// ---------------------------------------------------------------------------
// Context retriever trait
// ---------------------------------------------------------------------------

/// Trait for the content index backing retrieval-augmented grading.
///
/// Implementations are read-only queries: `retrieve` must return an empty
/// list, never an error, when no indexed material matches — downstream
/// consumers treat empty context as "grade from the rubric alone."
/// Transport or authentication failures are real errors.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Return up to `k` fragments relevant to `question`, restricted to the
    /// exam material identified by `scope`.
    async fn retrieve(
        &self,
        question: &Question,
        scope: &str,
        k: usize,
    ) -> anyhow::Result<Vec<ContextFragment>>;
}
