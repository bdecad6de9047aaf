//! Error types for the grading pipeline.
//!
//! `ProviderError` lives in `tribunal-core` so the grading agents can
//! downcast and classify invocation failures for retry decisions without
//! string matching. `GradingError` covers wiring preconditions that indicate
//! a pipeline bug and must fail loudly rather than degrade.

use thiserror::Error;

/// Errors that can occur when invoking a model provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The API returned a 429 rate limit response.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Authentication failed (invalid API key).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The requested model was not found.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The API returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    NetworkError(String),
}

impl ProviderError {
    /// Returns `true` if this error is permanent and should not be retried.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ProviderError::AuthenticationFailed(_) | ProviderError::ModelNotFound(_)
        )
    }

    /// Returns the retry-after delay in milliseconds, if applicable.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

/// Pipeline wiring violations. These indicate bugs, not runtime conditions.
#[derive(Debug, Error)]
pub enum GradingError {
    /// Consensus was handed a correction count it cannot reduce.
    #[error("consensus requires exactly 2 or 3 corrections, got {0}")]
    InvalidCorrectionCount(usize),

    /// The pipeline attempted a transition the state machine does not allow.
    #[error("illegal grading transition from `{state}` on `{event}`")]
    InvalidTransition { state: String, event: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_classification() {
        assert!(ProviderError::AuthenticationFailed("bad key".into()).is_permanent());
        assert!(ProviderError::ModelNotFound("gpt-0".into()).is_permanent());
        assert!(!ProviderError::RateLimited { retry_after_ms: 500 }.is_permanent());
        assert!(!ProviderError::Timeout(120).is_permanent());
    }

    #[test]
    fn retry_after_only_for_rate_limits() {
        assert_eq!(
            ProviderError::RateLimited { retry_after_ms: 750 }.retry_after_ms(),
            Some(750)
        );
        assert_eq!(
            ProviderError::NetworkError("reset".into()).retry_after_ms(),
            None
        );
    }

    #[test]
    fn grading_error_messages() {
        let err = GradingError::InvalidCorrectionCount(4);
        assert!(err.to_string().contains("got 4"));
    }
}
