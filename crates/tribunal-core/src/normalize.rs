//! Defensive normalization of raw evaluator output into a canonical
//! [`Correction`].
//!
//! Model responses arrive in several shapes: a native structured value, JSON
//! text (often fenced), free prose, or a decoded mapping with inconsistent
//! field spelling. `normalize` resolves all of them into a valid Correction
//! and never fails on malformed input — the worst case is a minimal
//! correction carrying the fallback score and a diagnostic note.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::outcome::{AgentId, Correction, CriterionScore};

/// Raw evaluator output, in the shapes the model layer actually produces.
#[derive(Debug, Clone)]
pub enum RawOutput {
    /// Already a canonical correction (native structured output).
    Structured(Correction),
    /// Text the provider knows to be JSON, possibly fenced.
    JsonText(String),
    /// Free-form prose that may or may not contain structure.
    FreeText(String),
    /// A decoded JSON mapping of unknown field spelling.
    Mapping(serde_json::Map<String, serde_json::Value>),
}

impl RawOutput {
    /// Classify raw response content as JSON-ish or prose.
    pub fn classify(content: &str) -> RawOutput {
        let trimmed = content.trim();
        if trimmed.starts_with('{') || trimmed.contains("```json") {
            RawOutput::JsonText(content.to_string())
        } else {
            RawOutput::FreeText(content.to_string())
        }
    }
}

/// Reasoning shorter than this is replaced by the rationale trace when one
/// is available.
const MIN_REASONING_LEN: usize = 24;

/// Diagnostic reasoning placed on corrections built from unconvertible output.
pub const CONVERSION_FAILURE_NOTE: &str =
    "evaluator response could not be converted into a structured correction; fallback score assigned";

/// Normalize raw evaluator output into a valid [`Correction`].
///
/// Never panics and never fails for malformed payloads. The returned
/// correction always carries the caller-supplied `agent`, regardless of what
/// the raw payload claimed, and its total is reconciled to the sum of the
/// per-criterion scores whenever those are present. `rationale` is the
/// invocation's raw trace, substituted when the parsed reasoning narrative
/// is empty or trivially short.
pub fn normalize(
    raw: RawOutput,
    agent: AgentId,
    fallback_score: f64,
    rationale: Option<&str>,
) -> Correction {
    let draft = match raw {
        RawOutput::Structured(correction) => Draft {
            reasoning: correction.reasoning,
            criteria_scores: correction.criteria_scores,
            total_score: correction.total_score,
            feedback: correction.feedback,
        },
        RawOutput::JsonText(text) | RawOutput::FreeText(text) => draft_from_text(&text, fallback_score),
        RawOutput::Mapping(map) => draft_from_mapping(map, fallback_score),
    };

    let mut correction = Correction {
        agent,
        reasoning: draft.reasoning,
        criteria_scores: draft.criteria_scores,
        total_score: draft.total_score,
        feedback: draft.feedback,
    };

    if correction.reasoning.trim().len() < MIN_REASONING_LEN {
        if let Some(trace) = rationale {
            let trace = trace.trim();
            if trace.len() > correction.reasoning.trim().len() {
                correction.reasoning = trace.to_string();
            }
        }
    }

    if !correction.criteria_scores.is_empty() {
        correction.total_score = correction.criteria_scores.iter().map(|c| c.score).sum();
    }

    correction
}

/// Intermediate result of one resolution branch, before agent forcing.
struct Draft {
    reasoning: String,
    criteria_scores: Vec<CriterionScore>,
    total_score: f64,
    feedback: String,
}

fn draft_from_text(text: &str, fallback_score: f64) -> Draft {
    let stripped = strip_code_fences(text);
    if let Ok(loose) = serde_json::from_str::<LooseCorrection>(&stripped) {
        if let Some(draft) = loose.into_draft() {
            return draft;
        }
    }

    // Structured parsing failed: extract a labeled score from the prose and
    // keep the prose itself as the reasoning narrative.
    let total_score = extract_labeled_score(text).unwrap_or_else(|| {
        tracing::warn!("no labeled score found in evaluator prose, using fallback");
        fallback_score
    });
    Draft {
        reasoning: text.trim().to_string(),
        criteria_scores: Vec::new(),
        total_score,
        feedback: String::new(),
    }
}

fn draft_from_mapping(map: serde_json::Map<String, serde_json::Value>, fallback_score: f64) -> Draft {
    match serde_json::from_value::<LooseCorrection>(serde_json::Value::Object(map)) {
        Ok(loose) => {
            if let Some(draft) = loose.into_draft() {
                return draft;
            }
            conversion_failure_draft(fallback_score)
        }
        Err(e) => {
            tracing::warn!("evaluator mapping did not convert: {e}");
            conversion_failure_draft(fallback_score)
        }
    }
}

fn conversion_failure_draft(fallback_score: f64) -> Draft {
    Draft {
        reasoning: CONVERSION_FAILURE_NOTE.to_string(),
        criteria_scores: Vec::new(),
        total_score: fallback_score,
        feedback: String::new(),
    }
}

// ---------------------------------------------------------------------------
// Lenient deserialization shapes
// ---------------------------------------------------------------------------

/// A correction as models actually spell it: aliased field names, reasoning
/// as a string or a list of steps, numbers sometimes quoted.
#[derive(Debug, Deserialize)]
struct LooseCorrection {
    #[serde(
        default,
        alias = "rationale",
        alias = "analysis",
        alias = "chain_of_thought",
        alias = "raciocinio"
    )]
    reasoning: LooseReasoning,
    #[serde(
        default,
        alias = "criteria",
        alias = "scores",
        alias = "criterion_scores",
        alias = "criterios"
    )]
    criteria_scores: Vec<LooseCriterion>,
    #[serde(
        default,
        alias = "total",
        alias = "score",
        alias = "final_score",
        alias = "nota",
        alias = "nota_final"
    )]
    total_score: Option<LooseNumber>,
    #[serde(default, alias = "comment", alias = "student_feedback", alias = "comentario")]
    feedback: String,
}

impl LooseCorrection {
    /// Convert into a draft, or `None` when the payload carries no score
    /// information at all (an empty object is not a correction).
    fn into_draft(self) -> Option<Draft> {
        let criteria_scores: Vec<CriterionScore> = self
            .criteria_scores
            .into_iter()
            .filter_map(LooseCriterion::into_score)
            .collect();
        let claimed_total = self.total_score.as_ref().and_then(LooseNumber::value);

        if criteria_scores.is_empty() && claimed_total.is_none() {
            return None;
        }

        let total_score = if criteria_scores.is_empty() {
            claimed_total.unwrap_or(0.0)
        } else {
            criteria_scores.iter().map(|c| c.score).sum()
        };

        Some(Draft {
            reasoning: self.reasoning.into_narrative(),
            criteria_scores,
            total_score,
            feedback: self.feedback,
        })
    }
}

/// Reasoning is sometimes a narrative, sometimes a list of steps.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LooseReasoning {
    Narrative(String),
    Steps(Vec<String>),
}

impl Default for LooseReasoning {
    fn default() -> Self {
        LooseReasoning::Narrative(String::new())
    }
}

impl LooseReasoning {
    fn into_narrative(self) -> String {
        match self {
            LooseReasoning::Narrative(s) => s,
            LooseReasoning::Steps(steps) => steps.join("\n"),
        }
    }
}

/// Per-criterion entry with inconsistent field names coerced to the
/// canonical shape.
#[derive(Debug, Deserialize)]
struct LooseCriterion {
    #[serde(alias = "criterion", alias = "criterion_name", alias = "criterio")]
    name: String,
    #[serde(alias = "points", alias = "value", alias = "nota")]
    score: LooseNumber,
}

impl LooseCriterion {
    fn into_score(self) -> Option<CriterionScore> {
        Some(CriterionScore {
            name: self.name,
            score: self.score.value()?,
        })
    }
}

/// A number that may arrive quoted, or with a decimal comma.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LooseNumber {
    Float(f64),
    Text(String),
}

impl LooseNumber {
    fn value(&self) -> Option<f64> {
        match self {
            LooseNumber::Float(f) => Some(*f),
            LooseNumber::Text(s) => s.trim().replace(',', ".").parse().ok(),
        }
    }
}

// ---------------------------------------------------------------------------
// Fence stripping and labeled-score extraction
// ---------------------------------------------------------------------------

/// Strip surrounding markdown code-fence markup from a response.
///
/// Prefers ```json blocks, falls back to generic ``` blocks, and returns the
/// trimmed raw text when no fence is present. Unclosed fences (truncated
/// responses) are treated as a block.
pub fn strip_code_fences(response: &str) -> String {
    let mut json_blocks = Vec::new();
    let mut generic_blocks = Vec::new();
    let mut in_block = false;
    let mut is_json_block = false;
    let mut current_block = String::new();

    for line in response.lines() {
        let trimmed = line.trim();

        if !in_block && trimmed.starts_with("```") {
            in_block = true;
            let lang = trimmed.trim_start_matches('`').trim().to_lowercase();
            is_json_block = lang == "json";
            current_block.clear();
            continue;
        }

        if in_block && trimmed == "```" {
            in_block = false;
            if is_json_block {
                json_blocks.push(current_block.clone());
            } else {
                generic_blocks.push(current_block.clone());
            }
            current_block.clear();
            continue;
        }

        if in_block {
            if !current_block.is_empty() {
                current_block.push('\n');
            }
            current_block.push_str(line);
        }
    }

    if in_block && !current_block.is_empty() {
        if is_json_block {
            json_blocks.push(current_block);
        } else {
            generic_blocks.push(current_block);
        }
    }

    if let Some(block) = json_blocks.into_iter().next() {
        return block;
    }
    if let Some(block) = generic_blocks.into_iter().next() {
        return block;
    }
    response.trim().to_string()
}

fn score_pattern() -> &'static Regex {
    static SCORE_RE: OnceLock<Regex> = OnceLock::new();
    SCORE_RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:score|total|nota|grade|pontua\w*)\b[^0-9\n]{0,12}(\d+(?:[.,]\d+)?)(?:\s*/\s*10)?",
        )
        .expect("score pattern is valid")
    })
}

/// Find a labeled total score in prose (e.g. "Nota: 7/10", "total score 8.5").
///
/// Values are clamped to the 0-10 scale.
pub fn extract_labeled_score(text: &str) -> Option<f64> {
    let captures = score_pattern().captures(text)?;
    let value: f64 = captures.get(1)?.as_str().replace(',', ".").parse().ok()?;
    Some(value.clamp(0.0, 10.0))
}
