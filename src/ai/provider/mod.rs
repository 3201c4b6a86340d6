//! Language-Model Provider Abstraction
//!
//! Defines the `LanguageModel` trait the generation core drafts through.
//! Providers transport prompts and return text or schema-validated JSON;
//! prompt content is owned by the callers.

mod openai;

pub use openai::OpenAiCompatProvider;

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Result;

// =============================================================================
// Response Metrics
// =============================================================================

/// Token usage metrics for cost tracking
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// A completed model call: payload plus accounting
#[derive(Debug, Clone)]
pub struct LmResponse<T> {
    pub content: T,
    pub usage: TokenUsage,
    pub duration_ms: u64,
    pub model: String,
}

impl<T> LmResponse<T> {
    /// Response with content only (usage unknown)
    pub fn content_only(content: T) -> Self {
        Self {
            content,
            usage: TokenUsage::default(),
            duration_ms: 0,
            model: String::new(),
        }
    }
}

// =============================================================================
// Provider Configuration
// =============================================================================

/// Configuration for language-model providers
///
/// API keys are never serialized and are redacted in debug output.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Model name (provider-specific)
    pub model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Sampling temperature
    pub temperature: f32,
    /// API key, never serialized to output
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// API base URL for custom endpoints
    #[serde(default)]
    pub api_base: Option<String>,
    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("temperature", &self.temperature)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

fn default_max_tokens() -> usize {
    4096
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            timeout_secs: crate::constants::network::DEFAULT_TIMEOUT_SECS,
            temperature: 0.2,
            api_key: None,
            api_base: None,
            max_tokens: 4096,
        }
    }
}

impl ProviderConfig {
    pub(crate) fn secret_key(&self) -> Option<SecretString> {
        self.api_key.as_deref().map(SecretString::from)
    }
}

// =============================================================================
// Language Model Trait
// =============================================================================

/// Language-model service used by the section pipeline and backfill
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate free-form text from a prompt
    async fn generate_text(&self, prompt: &str) -> Result<LmResponse<String>>;

    /// Generate structured output conforming to a JSON Schema
    async fn generate_structured(&self, prompt: &str, schema: &Value)
    -> Result<LmResponse<Value>>;

    /// Provider name for logging
    fn name(&self) -> &str;

    /// Model name currently in use
    fn model(&self) -> &str;
}

/// Shared model handle used across pipeline stages
pub type SharedModel = Arc<dyn LanguageModel>;
