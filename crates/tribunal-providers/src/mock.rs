//! Mock provider for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use tribunal_core::error::ProviderError;
use tribunal_core::outcome::TokenUsage;
use tribunal_core::traits::{GradeRequest, GradeResponse, ModelProvider};

/// A mock provider for testing the grading engine without real API calls.
///
/// Responses are scripted as a queue consumed in call order: the two
/// examiner prompts for one answer are identical, so substring matching
/// cannot tell them apart, but the grading math is symmetric in the two
/// examiners, which makes queue order sufficient for deterministic tests.
pub struct MockProvider {
    responses: Mutex<VecDeque<String>>,
    default_response: String,
    fail_marker: Option<String>,
    call_count: AtomicU32,
    last_request: Mutex<Option<GradeRequest>>,
}

impl MockProvider {
    /// Mock that serves the given responses in call order, then the default.
    pub fn with_sequence(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            default_response: r#"{"reasoning": "mock default grading response", "total_score": 5.0}"#.to_string(),
            fail_marker: None,
            call_count: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Mock that always returns the same response.
    pub fn with_fixed_response(response: &str) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            default_response: response.to_string(),
            fail_marker: None,
            call_count: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Fail with a permanent authentication error whenever the prompt
    /// contains `marker`.
    pub fn fail_when(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }

    /// Number of calls made to this provider.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// The last request made to this provider.
    pub fn last_request(&self) -> Option<GradeRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &GradeRequest) -> anyhow::Result<GradeResponse> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        *self.last_request.lock().unwrap() = Some(request.clone());

        if let Some(marker) = &self.fail_marker {
            if request.prompt.contains(marker) {
                return Err(ProviderError::AuthenticationFailed("mock failure".into()).into());
            }
        }

        let content = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_response.clone());
        let token_count = (content.len() / 4) as u32; // Rough estimate

        Ok(GradeResponse {
            content,
            model: request.model.clone(),
            token_usage: TokenUsage {
                prompt_tokens: (request.prompt.len() / 4) as u32,
                completion_tokens: token_count,
                total_tokens: (request.prompt.len() / 4) as u32 + token_count,
                estimated_cost_usd: 0.0,
            },
            latency_ms: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> GradeRequest {
        GradeRequest {
            model: "mock".into(),
            system_prompt: None,
            prompt: prompt.into(),
            max_tokens: 100,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn fixed_response() {
        let provider = MockProvider::with_fixed_response(r#"{"total_score": 9.0}"#);

        let response = provider.complete(&request("anything")).await.unwrap();
        assert_eq!(response.content, r#"{"total_score": 9.0}"#);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(provider.last_request().unwrap().prompt, "anything");
    }

    #[tokio::test]
    async fn sequence_then_default() {
        let provider =
            MockProvider::with_sequence(&[r#"{"total_score": 7.0}"#, r#"{"total_score": 3.0}"#]);

        let first = provider.complete(&request("a")).await.unwrap();
        let second = provider.complete(&request("b")).await.unwrap();
        let third = provider.complete(&request("c")).await.unwrap();
        assert!(first.content.contains("7.0"));
        assert!(second.content.contains("3.0"));
        assert!(third.content.contains("mock default"));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn scripted_failure() {
        let provider = MockProvider::with_fixed_response("{}").fail_when("poison");

        assert!(provider.complete(&request("fine")).await.is_ok());
        let err = provider.complete(&request("poison pill")).await.unwrap_err();
        assert!(err.to_string().contains("authentication"));
    }
}
