//! Grading result types: corrections, divergence, and per-answer outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which automated evaluator produced a correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentId {
    #[serde(rename = "examiner-1")]
    ExaminerOne,
    #[serde(rename = "examiner-2")]
    ExaminerTwo,
    #[serde(rename = "arbiter")]
    Arbiter,
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentId::ExaminerOne => write!(f, "examiner-1"),
            AgentId::ExaminerTwo => write!(f, "examiner-2"),
            AgentId::Arbiter => write!(f, "arbiter"),
        }
    }
}

impl FromStr for AgentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "examiner-1" | "examiner1" => Ok(AgentId::ExaminerOne),
            "examiner-2" | "examiner2" => Ok(AgentId::ExaminerTwo),
            "arbiter" => Ok(AgentId::Arbiter),
            other => Err(format!("unknown agent id: {other}")),
        }
    }
}

/// Absolute score on one rubric criterion, on that criterion's own scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    /// Criterion name, matching the rubric.
    pub name: String,
    /// Absolute points awarded (not normalized to 0-1).
    pub score: f64,
}

/// The structured result of one evaluator's grading pass over one answer.
///
/// When `criteria_scores` is non-empty, `total_score` equals their sum; when
/// the normalizer had to fall back to an extracted number, `total_score`
/// alone is authoritative and `criteria_scores` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    /// Which evaluator produced this correction.
    pub agent: AgentId,
    /// The evaluator's reasoning narrative.
    pub reasoning: String,
    /// Per-criterion scores. May be empty on the fallback path.
    #[serde(default)]
    pub criteria_scores: Vec<CriterionScore>,
    /// Total score, expected within 0-10.
    pub total_score: f64,
    /// Learner-facing feedback text.
    #[serde(default)]
    pub feedback: String,
}

/// Result of comparing the two examiner totals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DivergenceResult {
    /// Whether the difference exceeded the threshold.
    pub is_divergent: bool,
    /// Absolute difference between the two totals.
    pub difference: f64,
    /// The threshold the difference was compared against.
    pub threshold: f64,
}

/// Token accounting across the model invocations of one answer or one exam.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub estimated_cost_usd: f64,
}

impl TokenUsage {
    /// Fold another invocation's usage into this one.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.estimated_cost_usd += other.estimated_cost_usd;
    }
}

/// Everything the pipeline produced for one answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingOutcome {
    /// The question that was graded.
    pub question_id: String,
    /// The answer that was graded.
    pub answer_id: String,
    /// All corrections produced (2 without arbitration, 3 with).
    pub corrections: Vec<Correction>,
    /// The consensus score. `None` when the pipeline failed.
    pub final_score: Option<f64>,
    /// Whether the two examiners diverged beyond the threshold.
    pub divergent: bool,
    /// Set when the pipeline degraded with an unrecoverable failure.
    #[serde(default)]
    pub error: Option<String>,
    /// Wall-clock duration of the per-answer pipeline in milliseconds.
    pub duration_ms: u64,
    /// Aggregated token usage across this answer's invocations.
    #[serde(default)]
    pub token_usage: TokenUsage,
}

impl GradingOutcome {
    /// Failure record for an answer whose pipeline hit an unrecoverable
    /// invocation error.
    pub fn failed(question_id: &str, answer_id: &str, error: String, duration_ms: u64) -> Self {
        Self {
            question_id: question_id.to_string(),
            answer_id: answer_id.to_string(),
            corrections: Vec::new(),
            final_score: None,
            divergent: false,
            error: Some(error),
            duration_ms,
            token_usage: TokenUsage::default(),
        }
    }
}
