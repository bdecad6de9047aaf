//! Prompt assembly for examiner and arbiter invocations.
//!
//! One prompt embeds the question statement, the full rubric, the formatted
//! retrieved context (or an explicit no-context marker), and the verbatim
//! answer text. The arbiter prompt additionally embeds both prior
//! corrections' reasoning and totals.

use crate::model::{Answer, ContextFragment, Criterion, Question};
use crate::outcome::Correction;

/// System prompt for the two independent examiners.
pub const EXAMINER_SYSTEM_PROMPT: &str = "You are a strict university examiner grading one open-ended exam answer. \
Work through the rubric criterion by criterion: for each criterion, reason about what the answer demonstrates BEFORE assigning any score. \
Penalize vague or generic filler that evades the question's specific technical content. \
Accept correct answers that diverge from the reference material's wording or examples, as long as the material does not contradict them. \
Score each criterion on its own absolute point scale; never normalize to 0-1. \
Write blunt, non-flattering feedback for the student. \
Respond with a single JSON object inside a ```json fence, with fields: \"reasoning\" (string), \"criteria_scores\" (array of {\"name\", \"score\"}), \"total_score\" (number), \"feedback\" (string).";

/// System prompt for the arbiter invoked on examiner divergence.
pub const ARBITER_SYSTEM_PROMPT: &str = "You are the arbiter for a grading disagreement between two independent examiners. \
Re-derive an independent score for each rubric criterion from the answer itself; do NOT average the two prior evaluations. \
Where the examiners disagree, favor whichever most accurately assessed conceptual correctness, even over literal fidelity to the reference material. \
Respond with a single JSON object inside a ```json fence, with fields: \"reasoning\" (string), \"criteria_scores\" (array of {\"name\", \"score\"}), \"total_score\" (number), \"feedback\" (string).";

/// Marker inserted when retrieval produced no fragments.
pub const NO_CONTEXT_MARKER: &str =
    "No indexed material matched this question. Grade strictly from the rubric and the answer.";

/// Format the rubric as a numbered criterion list.
pub fn format_rubric(rubric: &[Criterion]) -> String {
    let mut out = String::new();
    for (i, criterion) in rubric.iter().enumerate() {
        out.push_str(&format!(
            "{}. {} (max {} points)",
            i + 1,
            criterion.name,
            criterion.max_points
        ));
        if !criterion.description.is_empty() {
            out.push_str(&format!(" — {}", criterion.description));
        }
        out.push('\n');
    }
    out
}

/// Format retrieved fragments, most relevant first, or the no-context marker.
pub fn format_context(fragments: &[ContextFragment]) -> String {
    if fragments.is_empty() {
        return NO_CONTEXT_MARKER.to_string();
    }
    let mut out = String::new();
    for fragment in fragments {
        out.push_str(&format!(
            "[{}{}] (relevance {:.2})\n{}\n\n",
            fragment.source,
            if fragment.locator.is_empty() {
                String::new()
            } else {
                format!(", {}", fragment.locator)
            },
            fragment.relevance,
            fragment.text
        ));
    }
    out.trim_end().to_string()
}

/// Build the grading prompt for one examiner.
pub fn examiner_prompt(question: &Question, context: &[ContextFragment], answer: &Answer) -> String {
    format!(
        "## Question\n{statement}\n\n\
         ## Rubric (total {total} points)\n{rubric}\n\
         ## Reference material\n{context}\n\n\
         ## Student answer\n{answer}",
        statement = question.statement,
        total = question.max_total(),
        rubric = format_rubric(&question.rubric),
        context = format_context(context),
        answer = answer.text,
    )
}

/// Build the arbitration prompt, embedding both diverging corrections.
pub fn arbiter_prompt(
    question: &Question,
    context: &[ContextFragment],
    answer: &Answer,
    first: &Correction,
    second: &Correction,
) -> String {
    format!(
        "{base}\n\n\
         ## Disagreement to resolve\n\
         The two examiners scored this answer {a_total} and {b_total} points, which diverges beyond the accepted margin.\n\n\
         ### Examiner 1 reasoning (total {a_total})\n{a_reasoning}\n\n\
         ### Examiner 2 reasoning (total {b_total})\n{b_reasoning}",
        base = examiner_prompt(question, context, answer),
        a_total = first.total_score,
        b_total = second.total_score,
        a_reasoning = first.reasoning,
        b_reasoning = second.reasoning,
    )
}
