//! Exam-level batch summary with JSON persistence.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::outcome::{GradingOutcome, TokenUsage};

/// Summary of the batch handed to whatever triggered exam-level grading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamReport {
    /// Unique identifier of this grading run.
    pub id: Uuid,
    /// When the run completed.
    pub created_at: DateTime<Utc>,
    /// The exam that was graded.
    pub exam: ExamSummary,
    /// Per-answer outcomes, including failure records.
    pub outcomes: Vec<GradingOutcome>,
    /// Answers graded to a final score.
    pub graded: usize,
    /// Answers that failed with an unrecoverable invocation error.
    pub failed: usize,
    /// Token usage aggregated across the whole batch.
    pub token_usage: TokenUsage,
    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Summary of an exam (without questions or submissions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSummary {
    pub id: String,
    pub title: String,
    pub submission_count: usize,
}

impl ExamReport {
    /// Whether the batch contains per-answer failures and the exam should be
    /// surfaced as needing attention rather than fully graded.
    pub fn needs_attention(&self) -> bool {
        self.failed > 0
    }

    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report: ExamReport =
            serde_json::from_str(&content).context("failed to parse report JSON")?;
        Ok(report)
    }
}
