//! Retrieval error types.
//!
//! "No material matched" is not an error — the client returns an empty
//! fragment list for that case. These variants cover transport and service
//! failures only.

use thiserror::Error;

/// Errors that can occur when querying the content index.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Authentication failed (invalid API key).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The index returned an error response.
    #[error("index error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    NetworkError(String),
}
