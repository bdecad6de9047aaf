//! Provider configuration and factory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use tribunal_core::engine::GradingConfig;
use tribunal_core::limiter::InvocationGate;
use tribunal_core::traits::ModelProvider;

use crate::anthropic::AnthropicProvider;
use crate::ollama::OllamaProvider;
use crate::openai::OpenAiProvider;

/// Configuration for a single LLM provider.
///
/// Note: Custom Debug impl masks API keys to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    OpenAI {
        api_key: String,
        #[serde(default)]
        base_url: Option<String>,
        #[serde(default)]
        org_id: Option<String>,
    },
    Anthropic {
        api_key: String,
        #[serde(default)]
        base_url: Option<String>,
    },
    Ollama {
        #[serde(default = "default_ollama_url")]
        base_url: String,
    },
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderConfig::OpenAI {
                api_key: _,
                base_url,
                org_id,
            } => f
                .debug_struct("OpenAI")
                .field("api_key", &"***")
                .field("base_url", base_url)
                .field("org_id", org_id)
                .finish(),
            ProviderConfig::Anthropic {
                api_key: _,
                base_url,
            } => f
                .debug_struct("Anthropic")
                .field("api_key", &"***")
                .field("base_url", base_url)
                .finish(),
            ProviderConfig::Ollama { base_url } => f
                .debug_struct("Ollama")
                .field("base_url", base_url)
                .finish(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

/// Top-level tribunal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TribunalConfig {
    /// Provider configurations keyed by name.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Default provider to use.
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Model used for both examiner passes.
    #[serde(default = "default_model")]
    pub examiner_model: String,
    /// Model used for the arbiter pass.
    #[serde(default = "default_model")]
    pub arbiter_model: String,
    /// Divergence threshold on the 0-10 scale.
    #[serde(default = "default_divergence_threshold")]
    pub divergence_threshold: f64,
    /// Context fragments retrieved per question.
    #[serde(default = "default_context_fragments")]
    pub context_fragments: usize,
    /// Score assigned when the normalizer cannot extract one.
    #[serde(default)]
    pub fallback_score: f64,
    /// Sampling temperature (0.0 for deterministic grading).
    #[serde(default)]
    pub temperature: f64,
    /// Max tokens per completion.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Max retries on provider errors.
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    /// Delay between retries in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Max simultaneous model invocations across the process.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_invocations: usize,
    /// Optional pause after each gate acquisition, in milliseconds.
    #[serde(default)]
    pub pacing_delay_ms: u64,
}

fn default_provider() -> String {
    "anthropic".to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_divergence_threshold() -> f64 {
    2.0
}
fn default_context_fragments() -> usize {
    4
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1000
}
fn default_max_concurrent() -> usize {
    4
}

impl Default for TribunalConfig {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider(),
            examiner_model: default_model(),
            arbiter_model: default_model(),
            divergence_threshold: default_divergence_threshold(),
            context_fragments: default_context_fragments(),
            fallback_score: 0.0,
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            max_retries: default_retries(),
            retry_delay_ms: default_retry_delay(),
            max_concurrent_invocations: default_max_concurrent(),
            pacing_delay_ms: 0,
        }
    }
}

impl TribunalConfig {
    /// Engine configuration derived from this file.
    pub fn grading_config(&self) -> GradingConfig {
        GradingConfig {
            examiner_model: self.examiner_model.clone(),
            arbiter_model: self.arbiter_model.clone(),
            divergence_threshold: self.divergence_threshold,
            context_fragments: self.context_fragments,
            fallback_score: self.fallback_score,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    /// The process-wide invocation gate this file describes.
    pub fn invocation_gate(&self) -> InvocationGate {
        let gate = InvocationGate::new(self.max_concurrent_invocations);
        if self.pacing_delay_ms > 0 {
            gate.with_pacing(Duration::from_millis(self.pacing_delay_ms))
        } else {
            gate
        }
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

/// Resolve env vars in a provider config.
fn resolve_provider_config(config: &ProviderConfig) -> ProviderConfig {
    match config {
        ProviderConfig::OpenAI {
            api_key,
            base_url,
            org_id,
        } => ProviderConfig::OpenAI {
            api_key: resolve_env_vars(api_key),
            base_url: base_url.as_ref().map(|u| resolve_env_vars(u)),
            org_id: org_id.as_ref().map(|o| resolve_env_vars(o)),
        },
        ProviderConfig::Anthropic { api_key, base_url } => ProviderConfig::Anthropic {
            api_key: resolve_env_vars(api_key),
            base_url: base_url.as_ref().map(|u| resolve_env_vars(u)),
        },
        ProviderConfig::Ollama { base_url } => ProviderConfig::Ollama {
            base_url: resolve_env_vars(base_url),
        },
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `tribunal.toml` in the current directory
/// 2. `~/.config/tribunal/config.toml`
///
/// Environment variable overrides: `TRIBUNAL_OPENAI_KEY`, `TRIBUNAL_ANTHROPIC_KEY`.
pub fn load_config() -> Result<TribunalConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<TribunalConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("tribunal.toml");
        if local.exists() {
            Some(local)
        } else if let Some(home) = dirs_path() {
            let global = home.join("config.toml");
            if global.exists() {
                Some(global)
            } else {
                None
            }
        } else {
            None
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<TribunalConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => TribunalConfig::default(),
    };

    // Apply env var overrides
    if let Ok(key) = std::env::var("TRIBUNAL_ANTHROPIC_KEY") {
        config
            .providers
            .entry("anthropic".into())
            .or_insert(ProviderConfig::Anthropic {
                api_key: String::new(),
                base_url: None,
            });
        if let Some(ProviderConfig::Anthropic { api_key, .. }) =
            config.providers.get_mut("anthropic")
        {
            *api_key = key;
        }
    }

    if let Ok(key) = std::env::var("TRIBUNAL_OPENAI_KEY") {
        config
            .providers
            .entry("openai".into())
            .or_insert(ProviderConfig::OpenAI {
                api_key: String::new(),
                base_url: None,
                org_id: None,
            });
        if let Some(ProviderConfig::OpenAI { api_key, .. }) = config.providers.get_mut("openai") {
            *api_key = key;
        }
    }

    // Resolve env vars in all provider configs
    let resolved: HashMap<String, ProviderConfig> = config
        .providers
        .iter()
        .map(|(k, v)| (k.clone(), resolve_provider_config(v)))
        .collect();
    config.providers = resolved;

    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("tribunal"))
}

/// Create a provider instance from its configuration.
pub fn create_provider(name: &str, config: &ProviderConfig) -> Result<Box<dyn ModelProvider>> {
    match config {
        ProviderConfig::Anthropic { api_key, base_url } => {
            Ok(Box::new(AnthropicProvider::new(api_key, base_url.clone())))
        }
        ProviderConfig::OpenAI {
            api_key,
            base_url,
            org_id,
        } => Ok(Box::new(OpenAiProvider::new(
            api_key,
            base_url.clone(),
            org_id.clone(),
        ))),
        ProviderConfig::Ollama { base_url } => {
            let _ = name;
            Ok(Box::new(OllamaProvider::new(base_url)))
        }
    }
}
