//! Core data model types for tribunal.
//!
//! These are the fundamental types the grading pipeline consumes: questions
//! with their rubrics, student answers, and retrieved context fragments.
//! All of them are immutable value objects once grading starts.

use serde::{Deserialize, Serialize};

/// A single exam question with its grading rubric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    /// Unique identifier for this question.
    pub id: String,
    /// The question statement shown to the student.
    pub statement: String,
    /// Ordered rubric criteria. The sum of `max_points` defines the
    /// question's total on the 0-10 scale.
    pub rubric: Vec<Criterion>,
}

impl Question {
    /// Maximum achievable total for this question.
    pub fn max_total(&self) -> f64 {
        self.rubric.iter().map(|c| c.max_points).sum()
    }
}

/// One rubric criterion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criterion {
    /// Short criterion name (e.g. "conceptual accuracy").
    pub name: String,
    /// What the criterion rewards.
    #[serde(default)]
    pub description: String,
    /// Maximum points this criterion contributes to the 0-10 total.
    pub max_points: f64,
}

/// A student's free-text answer to one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    /// Unique identifier for this answer.
    pub id: String,
    /// The submission text, passed to the examiners verbatim.
    pub text: String,
}

/// An exam whose indexed material scopes context retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    /// Unique identifier for this exam.
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Scope key for the content index. Retrieval is filtered to this scope
    /// so no other exam's material leaks into grading.
    pub scope: String,
}

/// One (question, answer) pair queued for grading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub question: Question,
    pub answer: Answer,
}

/// A ranked fragment of indexed exam material.
///
/// Produced fresh per question by the retriever; never cached across
/// questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextFragment {
    /// Source label (e.g. a document or chapter name).
    pub source: String,
    /// Page number or other locator within the source.
    #[serde(default)]
    pub locator: String,
    /// Relevance score in 0-1, higher is more relevant.
    pub relevance: f32,
    /// The fragment text.
    pub text: String,
}
