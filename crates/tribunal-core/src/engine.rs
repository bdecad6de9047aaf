//! The grading orchestrator.
//!
//! Runs the per-answer pipeline (retrieve → examine in parallel → check
//! divergence → optionally arbitrate → consensus) by driving the state
//! machine in [`crate::machine`], and fans out across all submissions of an
//! exam. One answer's unrecoverable failure is recorded as a per-answer
//! failure record and never aborts its siblings.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use uuid::Uuid;

use crate::agents::{AgentSettings, ModelAgent};
use crate::consensus;
use crate::divergence;
use crate::limiter::InvocationGate;
use crate::machine::{self, GradingEvent, GradingState};
use crate::model::{Answer, ContextFragment, Exam, Question, Submission};
use crate::outcome::{AgentId, Correction, GradingOutcome, TokenUsage};
use crate::report::{ExamReport, ExamSummary};
use crate::traits::{ContextRetriever, ModelProvider};

/// Configuration for the grading engine.
#[derive(Debug, Clone)]
pub struct GradingConfig {
    /// Model used for both examiner passes.
    pub examiner_model: String,
    /// Model used for the arbiter pass.
    pub arbiter_model: String,
    /// Divergence threshold on the 0-10 scale.
    pub divergence_threshold: f64,
    /// How many context fragments to retrieve per question.
    pub context_fragments: usize,
    /// Score assigned when the normalizer cannot extract one.
    pub fallback_score: f64,
    /// Max tokens per completion.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// Retries on transient provider errors.
    pub max_retries: u32,
    /// Initial delay between retries.
    pub retry_delay: Duration,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            examiner_model: "claude-sonnet-4-20250514".into(),
            arbiter_model: "claude-sonnet-4-20250514".into(),
            divergence_threshold: 2.0,
            context_fragments: 4,
            fallback_score: 0.0,
            max_tokens: 4096,
            temperature: 0.0,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Progress reporting trait for exam-level grading.
pub trait ProgressReporter: Send + Sync {
    fn on_answer_start(&self, question_id: &str, answer_id: &str);
    fn on_answer_graded(&self, outcome: &GradingOutcome);
    fn on_answer_failed(&self, question_id: &str, answer_id: &str, error: &str);
    fn on_exam_complete(&self, total: usize, graded: usize, failed: usize, elapsed: Duration);
}

/// No-op progress reporter.
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_answer_start(&self, _: &str, _: &str) {}
    fn on_answer_graded(&self, _: &GradingOutcome) {}
    fn on_answer_failed(&self, _: &str, _: &str, _: &str) {}
    fn on_exam_complete(&self, _: usize, _: usize, _: usize, _: Duration) {}
}

/// The grading orchestrator.
pub struct GradingEngine {
    provider: Arc<dyn ModelProvider>,
    retriever: Arc<dyn ContextRetriever>,
    gate: InvocationGate,
    config: GradingConfig,
}

impl GradingEngine {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        retriever: Arc<dyn ContextRetriever>,
        gate: InvocationGate,
        config: GradingConfig,
    ) -> Self {
        Self {
            provider,
            retriever,
            gate,
            config,
        }
    }

    fn agent(&self, model: &str) -> ModelAgent {
        ModelAgent::new(
            Arc::clone(&self.provider),
            self.gate.clone(),
            AgentSettings {
                model: model.to_string(),
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
                max_retries: self.config.max_retries,
                retry_delay: self.config.retry_delay,
                fallback_score: self.config.fallback_score,
            },
        )
    }

    /// Grade one answer to one question.
    ///
    /// Returns an error only for unrecoverable invocation failures; malformed
    /// model output degrades into a valid low-confidence correction instead.
    pub async fn grade_answer(
        &self,
        exam_scope: &str,
        question: &Question,
        answer: &Answer,
    ) -> Result<GradingOutcome> {
        let started = Instant::now();
        let mut usage = TokenUsage::default();
        let mut context: Vec<ContextFragment> = Vec::new();
        let mut corrections: Vec<Correction> = Vec::new();
        let mut divergent = false;
        let mut final_score = None;

        let mut state = GradingState::Retrieve;
        loop {
            state = match state {
                GradingState::Retrieve => {
                    context = self
                        .retriever
                        .retrieve(question, exam_scope, self.config.context_fragments)
                        .await?;
                    tracing::debug!(
                        question = %question.id,
                        fragments = context.len(),
                        "context retrieved"
                    );
                    machine::transition(state, GradingEvent::ContextReady)?
                }
                GradingState::Examine => {
                    let examiner = self.agent(&self.config.examiner_model);
                    // Fan-out with a fan-in barrier: both examiners must
                    // complete before the divergence check. A failure in one
                    // abandons the sibling and fails only this answer.
                    let (first, second) = tokio::try_join!(
                        examiner.evaluate(question, &context, answer, AgentId::ExaminerOne),
                        examiner.evaluate(question, &context, answer, AgentId::ExaminerTwo),
                    )?;
                    usage.accumulate(&first.1);
                    usage.accumulate(&second.1);
                    corrections.push(first.0);
                    corrections.push(second.0);
                    machine::transition(state, GradingEvent::ExaminersComplete)?
                }
                GradingState::CheckDivergence => {
                    let result = divergence::check(
                        &corrections[0],
                        &corrections[1],
                        self.config.divergence_threshold,
                    );
                    divergent = result.is_divergent;
                    let event = if result.is_divergent {
                        tracing::info!(
                            question = %question.id,
                            answer = %answer.id,
                            difference = result.difference,
                            "examiners diverged, arbitrating"
                        );
                        GradingEvent::Divergent
                    } else {
                        GradingEvent::Agreed
                    };
                    machine::transition(state, event)?
                }
                GradingState::Arbitrate => {
                    let arbiter = self.agent(&self.config.arbiter_model);
                    let (correction, arbiter_usage) = arbiter
                        .arbitrate(question, &context, answer, &corrections[0], &corrections[1])
                        .await?;
                    usage.accumulate(&arbiter_usage);
                    corrections.push(correction);
                    machine::transition(state, GradingEvent::ArbiterComplete)?
                }
                GradingState::Consensus => {
                    final_score = Some(consensus::consensus(&corrections)?);
                    machine::transition(state, GradingEvent::Finalized)?
                }
                GradingState::Done | GradingState::Failed => break,
            };
        }

        Ok(GradingOutcome {
            question_id: question.id.clone(),
            answer_id: answer.id.clone(),
            corrections,
            final_score,
            divergent,
            error: None,
            duration_ms: started.elapsed().as_millis() as u64,
            token_usage: usage,
        })
    }

    /// Grade every submission of an exam, collecting per-answer outcomes and
    /// aggregate graded/failed counts. Answers complete in no particular
    /// order; a failed answer is recorded and grading continues.
    pub async fn grade_exam(
        &self,
        exam: &Exam,
        submissions: &[Submission],
        progress: &dyn ProgressReporter,
    ) -> ExamReport {
        let start = Instant::now();
        let run_id = Uuid::new_v4();

        let mut futures = FuturesUnordered::new();
        for submission in submissions {
            futures.push(async move {
                progress.on_answer_start(&submission.question.id, &submission.answer.id);
                let answer_start = Instant::now();
                let result = self
                    .grade_answer(&exam.scope, &submission.question, &submission.answer)
                    .await;
                (submission, answer_start.elapsed(), result)
            });
        }

        let total = futures.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut graded = 0usize;
        let mut failed = 0usize;

        while let Some((submission, elapsed, result)) = futures.next().await {
            match result {
                Ok(outcome) => {
                    progress.on_answer_graded(&outcome);
                    outcomes.push(outcome);
                    graded += 1;
                }
                Err(e) => {
                    tracing::error!(
                        question = %submission.question.id,
                        answer = %submission.answer.id,
                        "grading failed: {e:#}"
                    );
                    progress.on_answer_failed(
                        &submission.question.id,
                        &submission.answer.id,
                        &e.to_string(),
                    );
                    outcomes.push(GradingOutcome::failed(
                        &submission.question.id,
                        &submission.answer.id,
                        e.to_string(),
                        elapsed.as_millis() as u64,
                    ));
                    failed += 1;
                }
            }
        }

        let elapsed = start.elapsed();
        progress.on_exam_complete(total, graded, failed, elapsed);

        let mut token_usage = TokenUsage::default();
        for outcome in &outcomes {
            token_usage.accumulate(&outcome.token_usage);
        }

        ExamReport {
            id: run_id,
            created_at: chrono::Utc::now(),
            exam: ExamSummary {
                id: exam.id.clone(),
                title: exam.title.clone(),
                submission_count: submissions.len(),
            },
            outcomes,
            graded,
            failed,
            token_usage,
            duration_ms: elapsed.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::ProviderError;
    use crate::model::Criterion;
    use crate::prompt::NO_CONTEXT_MARKER;
    use crate::traits::{GradeRequest, GradeResponse};

    /// Provider that pops scripted responses in call order and records every
    /// prompt it sees. Examiner calls for one answer race, but the grading
    /// math is symmetric, so queue order does not affect assertions.
    struct QueueProvider {
        responses: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<String>>,
        fail_marker: Option<String>,
        calls: AtomicU32,
    }

    impl QueueProvider {
        fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
                fail_marker: None,
                calls: AtomicU32::new(0),
            }
        }

        fn fail_when(mut self, marker: &str) -> Self {
            self.fail_marker = Some(marker.to_string());
            self
        }
    }

    #[async_trait]
    impl ModelProvider for QueueProvider {
        fn name(&self) -> &str {
            "queue"
        }

        async fn complete(&self, request: &GradeRequest) -> Result<GradeResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(request.prompt.clone());

            if let Some(marker) = &self.fail_marker {
                if request.prompt.contains(marker) {
                    return Err(ProviderError::AuthenticationFailed("bad key".into()).into());
                }
            }

            let content = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| r#"{"reasoning": "default scripted response body", "total_score": 5.0}"#.into());
            Ok(GradeResponse {
                content,
                model: request.model.clone(),
                token_usage: TokenUsage {
                    prompt_tokens: 100,
                    completion_tokens: 50,
                    total_tokens: 150,
                    estimated_cost_usd: 0.001,
                },
                latency_ms: 1,
            })
        }
    }

    /// Retriever serving a fixed fragment list for one scope.
    struct FixedRetriever {
        scope: String,
        fragments: Vec<ContextFragment>,
    }

    #[async_trait]
    impl ContextRetriever for FixedRetriever {
        async fn retrieve(
            &self,
            _question: &Question,
            scope: &str,
            k: usize,
        ) -> Result<Vec<ContextFragment>> {
            if scope != self.scope {
                return Ok(Vec::new());
            }
            Ok(self.fragments.iter().take(k).cloned().collect())
        }
    }

    fn question() -> Question {
        Question {
            id: "q1".into(),
            statement: "Explain two-phase commit.".into(),
            rubric: vec![
                Criterion {
                    name: "protocol phases".into(),
                    description: "prepare and commit".into(),
                    max_points: 6.0,
                },
                Criterion {
                    name: "failure handling".into(),
                    description: String::new(),
                    max_points: 4.0,
                },
            ],
        }
    }

    fn answer(id: &str, text: &str) -> Answer {
        Answer {
            id: id.into(),
            text: text.into(),
        }
    }

    fn engine_with(provider: QueueProvider, fragments: Vec<ContextFragment>) -> GradingEngine {
        let retriever = FixedRetriever {
            scope: "exam-1".into(),
            fragments,
        };
        GradingEngine::new(
            Arc::new(provider),
            Arc::new(retriever),
            InvocationGate::new(4),
            GradingConfig {
                retry_delay: Duration::from_millis(1),
                ..GradingConfig::default()
            },
        )
    }

    fn examiner_json(total: f64) -> String {
        format!(
            r#"{{"reasoning": "Scored per criterion against the rubric in detail.", "total_score": {total}}}"#
        )
    }

    #[tokio::test]
    async fn agreement_skips_the_arbiter() {
        let provider = QueueProvider::new(&[&examiner_json(7.5), &examiner_json(7.2)]);
        let engine = engine_with(provider, vec![]);

        let outcome = engine
            .grade_answer("exam-1", &question(), &answer("a1", "Prepare then commit."))
            .await
            .unwrap();

        assert!(!outcome.divergent);
        assert_eq!(outcome.corrections.len(), 2);
        assert!((outcome.final_score.unwrap() - 7.35).abs() < 1e-9);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.token_usage.total_tokens, 300);
    }

    #[tokio::test]
    async fn divergence_invokes_the_arbiter_and_tie_breaks_low() {
        let provider = QueueProvider::new(&[
            &examiner_json(9.0),
            &examiner_json(4.0),
            &examiner_json(6.5),
        ]);
        let engine = engine_with(provider, vec![]);

        let outcome = engine
            .grade_answer("exam-1", &question(), &answer("a1", "It commits twice."))
            .await
            .unwrap();

        assert!(outcome.divergent);
        assert_eq!(outcome.corrections.len(), 3);
        assert_eq!(outcome.corrections[2].agent, AgentId::Arbiter);
        // sorted [4.0, 6.5, 9.0] has equal gaps; the lower pair wins
        assert!((outcome.final_score.unwrap() - 5.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_context_still_grades() {
        let provider = QueueProvider::new(&[&examiner_json(6.0), &examiner_json(6.0)]);
        let engine = engine_with(provider, vec![]);

        let outcome = engine
            .grade_answer("exam-1", &question(), &answer("a1", "Prepare, vote, commit."))
            .await
            .unwrap();
        assert_eq!(outcome.final_score, Some(6.0));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn empty_context_prompts_carry_the_marker() {
        let provider = Arc::new(QueueProvider::new(&[
            &examiner_json(6.0),
            &examiner_json(6.0),
        ]));
        let retriever = FixedRetriever {
            scope: "exam-1".into(),
            fragments: vec![],
        };
        let engine = GradingEngine::new(
            Arc::clone(&provider) as Arc<dyn ModelProvider>,
            Arc::new(retriever),
            InvocationGate::new(4),
            GradingConfig::default(),
        );

        engine
            .grade_answer("exam-1", &question(), &answer("a1", "Prepare, vote, commit."))
            .await
            .unwrap();

        let prompts = provider.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts.iter().all(|p| p.contains(NO_CONTEXT_MARKER)));
    }

    #[tokio::test]
    async fn retrieved_fragments_reach_the_prompt() {
        let provider = Arc::new(QueueProvider::new(&[
            &examiner_json(8.0),
            &examiner_json(8.0),
        ]));
        let retriever = FixedRetriever {
            scope: "exam-1".into(),
            fragments: vec![ContextFragment {
                source: "distributed-systems.pdf".into(),
                locator: "p. 203".into(),
                relevance: 0.93,
                text: "The coordinator first sends a prepare request to all participants.".into(),
            }],
        };
        let engine = GradingEngine::new(
            Arc::clone(&provider) as Arc<dyn ModelProvider>,
            Arc::new(retriever),
            InvocationGate::new(4),
            GradingConfig::default(),
        );

        engine
            .grade_answer("exam-1", &question(), &answer("a1", "Prepare then commit."))
            .await
            .unwrap();

        let prompts = provider.prompts.lock().unwrap();
        assert!(prompts.iter().all(|p| p.contains("distributed-systems.pdf")));
        assert!(prompts.iter().all(|p| !p.contains(NO_CONTEXT_MARKER)));
    }

    #[tokio::test]
    async fn prose_examiner_output_degrades_gracefully() {
        let provider = QueueProvider::new(&[
            "Decent coverage of the protocol but no failure modes. Nota: 7/10",
            &examiner_json(7.0),
        ]);
        let engine = engine_with(provider, vec![]);

        let outcome = engine
            .grade_answer("exam-1", &question(), &answer("a1", "Prepare then commit."))
            .await
            .unwrap();
        assert!(!outcome.divergent);
        assert_eq!(outcome.final_score, Some(7.0));
    }

    #[tokio::test]
    async fn batch_records_per_answer_failures_without_aborting() {
        let provider = QueueProvider::new(&[&examiner_json(8.0), &examiner_json(8.0)])
            .fail_when("this answer is cursed");
        let engine = engine_with(provider, vec![]);

        let exam = Exam {
            id: "exam-1".into(),
            title: "Distributed Systems Final".into(),
            scope: "exam-1".into(),
        };
        let submissions = vec![
            Submission {
                question: question(),
                answer: answer("a-good", "Prepare then commit."),
            },
            Submission {
                question: question(),
                answer: answer("a-bad", "this answer is cursed"),
            },
        ];

        let report = engine.grade_exam(&exam, &submissions, &NoopReporter).await;

        assert_eq!(report.graded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.outcomes.len(), 2);
        assert!(report.needs_attention());

        let failed = report
            .outcomes
            .iter()
            .find(|o| o.answer_id == "a-bad")
            .unwrap();
        assert!(failed.final_score.is_none());
        assert!(failed.error.as_deref().unwrap().contains("authentication"));

        let graded = report
            .outcomes
            .iter()
            .find(|o| o.answer_id == "a-good")
            .unwrap();
        assert_eq!(graded.final_score, Some(8.0));
    }
}
