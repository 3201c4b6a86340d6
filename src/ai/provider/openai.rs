//! OpenAI-Compatible API Provider
//!
//! Reference `LanguageModel` implementation over the Chat Completions API.
//! Any OpenAI-compatible endpoint works via `api_base`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{LanguageModel, LmResponse, ProviderConfig, TokenUsage};
use crate::types::{DraftError, ErrorClassifier, Result};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI-compatible provider with secure API key handling
pub struct OpenAiCompatProvider {
    /// Never exposed in logs or debug output
    api_key: SecretString,
    api_base: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl OpenAiCompatProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let api_key = config
            .secret_key()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok().map(SecretString::from))
            .ok_or_else(|| {
                DraftError::Config(
                    "OpenAI API key not found. Set OPENAI_API_KEY or provide in config".to_string(),
                )
            })?;

        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Url::parse(&api_base)
            .map_err(|e| DraftError::Config(format!("Invalid API base '{}': {}", api_base, e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(
                crate::constants::network::CONNECTION_TIMEOUT_SECS,
            ))
            .build()?;

        Ok(Self {
            api_key,
            api_base,
            model: config.model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
        })
    }

    async fn complete(&self, request: &ChatCompletionRequest) -> Result<(String, TokenUsage)> {
        let url = format!("{}/chat/completions", self.api_base);
        debug!(model = %self.model, "Sending chat completion request");

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let category = ErrorClassifier::classify_http_status(status);
            return Err(DraftError::llm_with_category(
                category,
                format!("API error ({}): {}", status, body),
            ));
        }

        let body: ChatCompletionResponse = response.json().await?;

        let usage = body
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| DraftError::llm("no content in completion response"))?;

        Ok((content, usage))
    }

    fn request(&self, system: String, prompt: &str, json_mode: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
            response_format: json_mode.then(|| ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatProvider {
    async fn generate_text(&self, prompt: &str) -> Result<LmResponse<String>> {
        let start = Instant::now();
        let request = self.request("You are an academic writing assistant.".to_string(), prompt, false);
        let (content, usage) = self.complete(&request).await?;

        Ok(LmResponse {
            content,
            usage,
            duration_ms: start.elapsed().as_millis() as u64,
            model: self.model.clone(),
        })
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &Value,
    ) -> Result<LmResponse<Value>> {
        let start = Instant::now();
        let schema_str = serde_json::to_string_pretty(schema).unwrap_or_else(|e| {
            warn!("Failed to pretty-print schema: {}", e);
            "{}".to_string()
        });
        let system = format!(
            "You are an academic writing assistant. Respond ONLY with valid JSON matching this schema:\n\n```json\n{}\n```",
            schema_str
        );
        let request = self.request(system, prompt, true);
        let (content, usage) = self.complete(&request).await?;

        let value = extract_json(&content)?;

        Ok(LmResponse {
            content: value,
            usage,
            duration_ms: start.elapsed().as_millis() as u64,
            model: self.model.clone(),
        })
    }

    fn name(&self) -> &str {
        "openai-compat"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Extract a JSON object from a model response, tolerating code fences
fn extract_json(content: &str) -> Result<Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    // Strip a ```json ... ``` fence if present
    if let Some(start) = trimmed.find("```") {
        let inner = &trimmed[start + 3..];
        let inner = inner.strip_prefix("json").unwrap_or(inner);
        if let Some(end) = inner.find("```") {
            if let Ok(value) = serde_json::from_str(inner[..end].trim()) {
                return Ok(value);
            }
        }
    }

    // Last resort: widest braces span
    if let (Some(open), Some(close)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if open < close {
            if let Ok(value) = serde_json::from_str(&trimmed[open..=close]) {
                return Ok(value);
            }
        }
    }

    Err(DraftError::llm(
        "structured response was not parseable as JSON",
    ))
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    prompt_tokens: u32,
    completion_tokens: u32,
}
