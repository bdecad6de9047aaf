//! tribunal-providers — LLM provider integrations.
//!
//! Implements the `ModelProvider` trait for Anthropic, OpenAI, and Ollama,
//! allowing the grading engine to run its examiner and arbiter invocations
//! against multiple model backends.

pub mod anthropic;
pub mod config;
pub mod mock;
pub mod ollama;
pub mod openai;

pub use config::{create_provider, load_config, ProviderConfig, TribunalConfig};
pub use tribunal_core::error::ProviderError;
