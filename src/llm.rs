use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LlmError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

/// Sampling options for a single generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Accepted for interface parity; responses are always collected whole.
    pub stream: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4096,
            stream: false,
        }
    }
}

impl GenerationOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Text-generation capability. Errors propagate unchanged; nothing is retried.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn invoke(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, LlmError>;

    fn model_info(&self) -> ModelInfo;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub provider: String,
    pub model: String,
    pub api_base: String,
}

impl fmt::Display for ModelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {} ({})", self.provider, self.model, self.api_base)
    }
}

/// Supported OpenAI-compatible providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    DeepSeek,
    OpenAi,
}

impl Provider {
    pub fn name(self) -> &'static str {
        match self {
            Provider::DeepSeek => "DeepSeek",
            Provider::OpenAi => "OpenAI",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Provider::DeepSeek => "https://api.deepseek.com",
            Provider::OpenAi => "https://api.openai.com/v1",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::DeepSeek => "deepseek-chat",
            Provider::OpenAi => "gpt-4o-mini",
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deepseek" => Ok(Provider::DeepSeek),
            "openai" => Ok(Provider::OpenAi),
            other => Err(format!("unknown LLM provider '{}' (expected deepseek | openai)", other)),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct LlmClient {
    client: reqwest::Client,
    provider: Provider,
    base_url: String,
    model: String,
    api_key: String,
}

impl LlmClient {
    pub fn new(
        provider: Provider,
        api_key: impl Into<String>,
        model: Option<String>,
        base_url: Option<String>,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| LlmError::Request {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            provider,
            base_url: base_url.unwrap_or_else(|| provider.default_base_url().to_string()),
            model: model.unwrap_or_else(|| provider.default_model().to_string()),
            api_key: api_key.into(),
        })
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{}/chat/completions", base)
        }
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn invoke(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, LlmError> {
        let messages = [Message::system(system_prompt), Message::user(user_prompt)];
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "stream": false,
        });

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request {
                message: e.to_string(),
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(LlmError::AuthFailed {
                provider: self.provider.name().to_string(),
            });
        }
        let text = resp.text().await.map_err(|e| LlmError::Request {
            message: format!("failed to read LLM response: {}", e),
        })?;
        if !status.is_success() {
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let content = extract_content(&text)?;
        debug!(
            model = %self.model,
            response_len = content.len(),
            "LLM call complete"
        );
        Ok(content)
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: self.provider.name().to_string(),
            model: self.model.clone(),
            api_base: self.base_url.clone(),
        }
    }
}

/// Extract `choices[0].message.content`, treating a null/missing content as empty.
fn extract_content(body: &str) -> Result<String, LlmError> {
    let json: serde_json::Value =
        serde_json::from_str(body).map_err(|e| LlmError::ResponseParse {
            message: e.to_string(),
        })?;

    let choices = json
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| LlmError::ResponseParse {
            message: "response has no choices array".to_string(),
        })?;

    Ok(choices
        .first()
        .and_then(|c| c["message"]["content"].as_str())
        .unwrap_or("")
        .trim()
        .to_string())
}
