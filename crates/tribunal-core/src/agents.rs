//! Examiner and arbiter invocations.
//!
//! A [`ModelAgent`] wraps one model invocation: it builds the grading prompt,
//! acquires the invocation gate, calls the provider with bounded retries,
//! and runs the raw response through the output normalizer. Malformed output
//! is always absorbed; only unrecoverable invocation failures (auth, unknown
//! model, exhausted retries) propagate to the caller.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::error::ProviderError;
use crate::limiter::InvocationGate;
use crate::model::{Answer, ContextFragment, Question};
use crate::normalize::{normalize, RawOutput};
use crate::outcome::{AgentId, Correction, TokenUsage};
use crate::prompt;
use crate::traits::{GradeRequest, ModelProvider};

/// Invocation parameters shared by the examiners and the arbiter.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Model identifier passed to the provider.
    pub model: String,
    /// Max tokens per completion.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// Retries on transient provider errors.
    pub max_retries: u32,
    /// Initial delay between retries; doubles per attempt, capped at 60s.
    pub retry_delay: Duration,
    /// Score assigned when the normalizer cannot extract one.
    pub fallback_score: f64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_tokens: 4096,
            temperature: 0.0,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            fallback_score: 0.0,
        }
    }
}

/// One grading evaluator bound to a provider, a model, and the shared gate.
pub struct ModelAgent {
    provider: Arc<dyn ModelProvider>,
    gate: InvocationGate,
    settings: AgentSettings,
}

impl ModelAgent {
    pub fn new(provider: Arc<dyn ModelProvider>, gate: InvocationGate, settings: AgentSettings) -> Self {
        Self {
            provider,
            gate,
            settings,
        }
    }

    /// Run one examiner pass. Always yields a valid Correction carrying
    /// `agent`, unless the invocation itself is unrecoverable.
    pub async fn evaluate(
        &self,
        question: &Question,
        context: &[ContextFragment],
        answer: &Answer,
        agent: AgentId,
    ) -> Result<(Correction, TokenUsage)> {
        let prompt = prompt::examiner_prompt(question, context, answer);
        self.invoke(prompt, prompt::EXAMINER_SYSTEM_PROMPT, agent).await
    }

    /// Run the arbiter pass over two diverging corrections.
    pub async fn arbitrate(
        &self,
        question: &Question,
        context: &[ContextFragment],
        answer: &Answer,
        first: &Correction,
        second: &Correction,
    ) -> Result<(Correction, TokenUsage)> {
        let prompt = prompt::arbiter_prompt(question, context, answer, first, second);
        self.invoke(prompt, prompt::ARBITER_SYSTEM_PROMPT, AgentId::Arbiter)
            .await
    }

    async fn invoke(
        &self,
        prompt: String,
        system_prompt: &str,
        agent: AgentId,
    ) -> Result<(Correction, TokenUsage)> {
        let request = GradeRequest {
            model: self.settings.model.clone(),
            system_prompt: Some(system_prompt.to_string()),
            prompt,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };

        let response = self.invoke_with_retry(&request).await?;
        let correction = normalize(
            RawOutput::classify(&response.content),
            agent,
            self.settings.fallback_score,
            Some(&response.content),
        );
        Ok((correction, response.token_usage))
    }

    /// Retry transient provider errors with exponential backoff, honoring
    /// rate-limit retry-after hints. Permanent errors are classified by
    /// downcast and returned immediately.
    async fn invoke_with_retry(&self, request: &GradeRequest) -> Result<crate::traits::GradeResponse> {
        let mut last_error = None;
        let mut retry_delay = self.settings.retry_delay;

        for retry in 0..=self.settings.max_retries {
            if retry > 0 {
                tokio::time::sleep(retry_delay).await;
                retry_delay = (retry_delay * 2).min(Duration::from_secs(60));
            }

            // The gate is held only for the duration of the provider call.
            let permit = self.gate.acquire().await?;
            let result = self.provider.complete(request).await;
            drop(permit);

            match result {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if let Some(provider_error) = e.downcast_ref::<ProviderError>() {
                        if provider_error.is_permanent() {
                            return Err(e);
                        }
                        if let Some(ms) = provider_error.retry_after_ms() {
                            retry_delay = Duration::from_millis(ms);
                        }
                    }
                    tracing::warn!(
                        model = %request.model,
                        attempt = retry + 1,
                        "invocation failed: {e:#}"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("invocation failed with no recorded error")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::model::Criterion;
    use crate::traits::GradeResponse;

    /// Provider returning a fixed body, optionally failing the first N calls.
    struct ScriptedProvider {
        body: String,
        fail_first: u32,
        permanent: bool,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn ok(body: &str) -> Self {
            Self {
                body: body.into(),
                fail_first: 0,
                permanent: false,
                calls: AtomicU32::new(0),
            }
        }

        fn failing(fail_first: u32, permanent: bool) -> Self {
            Self {
                body: r#"{"reasoning": "recovered on a later attempt as expected", "total_score": 6.0}"#.into(),
                fail_first,
                permanent,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &GradeRequest) -> Result<GradeResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                if self.permanent {
                    return Err(ProviderError::AuthenticationFailed("bad key".into()).into());
                }
                return Err(ProviderError::NetworkError("connection reset".into()).into());
            }
            Ok(GradeResponse {
                content: self.body.clone(),
                model: request.model.clone(),
                token_usage: TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                    estimated_cost_usd: 0.0,
                },
                latency_ms: 1,
            })
        }
    }

    fn question() -> Question {
        Question {
            id: "q1".into(),
            statement: "Define amortized complexity.".into(),
            rubric: vec![Criterion {
                name: "definition".into(),
                description: String::new(),
                max_points: 10.0,
            }],
        }
    }

    fn answer() -> Answer {
        Answer {
            id: "a1".into(),
            text: "Average cost over a worst-case sequence of operations.".into(),
        }
    }

    fn settings() -> AgentSettings {
        AgentSettings {
            model: "test-model".into(),
            retry_delay: Duration::from_millis(1),
            ..AgentSettings::default()
        }
    }

    #[tokio::test]
    async fn evaluate_normalizes_and_forces_agent() {
        let provider = Arc::new(ScriptedProvider::ok(
            r#"```json
{"reasoning": "The definition is correct and complete for the rubric.", "criteria_scores": [{"name": "definition", "score": 8.5}], "total_score": 8.5, "feedback": "Good."}
```"#,
        ));
        let agent = ModelAgent::new(provider, InvocationGate::new(2), settings());

        let (correction, usage) = agent
            .evaluate(&question(), &[], &answer(), AgentId::ExaminerTwo)
            .await
            .unwrap();
        assert_eq!(correction.agent, AgentId::ExaminerTwo);
        assert_eq!(correction.total_score, 8.5);
        assert_eq!(usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn prose_output_still_yields_a_correction() {
        let provider = Arc::new(ScriptedProvider::ok(
            "The answer is terse but accurate in substance. Nota: 7/10",
        ));
        let agent = ModelAgent::new(provider, InvocationGate::new(2), settings());

        let (correction, _) = agent
            .evaluate(&question(), &[], &answer(), AgentId::ExaminerOne)
            .await
            .unwrap();
        assert_eq!(correction.total_score, 7.0);
        assert!(correction.reasoning.contains("terse but accurate"));
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let provider = Arc::new(ScriptedProvider::failing(2, false));
        let agent = ModelAgent::new(Arc::clone(&provider) as Arc<dyn ModelProvider>, InvocationGate::new(1), settings());

        let (correction, _) = agent
            .evaluate(&question(), &[], &answer(), AgentId::ExaminerOne)
            .await
            .unwrap();
        assert_eq!(correction.total_score, 6.0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let provider = Arc::new(ScriptedProvider::failing(10, true));
        let agent = ModelAgent::new(Arc::clone(&provider) as Arc<dyn ModelProvider>, InvocationGate::new(1), settings());

        let err = agent
            .evaluate(&question(), &[], &answer(), AgentId::ExaminerOne)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("authentication"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_exhaust_into_an_error() {
        let provider = Arc::new(ScriptedProvider::failing(10, false));
        let agent = ModelAgent::new(Arc::clone(&provider) as Arc<dyn ModelProvider>, InvocationGate::new(1), settings());

        let err = agent
            .evaluate(&question(), &[], &answer(), AgentId::ExaminerOne)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        // initial attempt + max_retries
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }
}
