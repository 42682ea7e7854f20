//! Mutation generators
//!
//! A [`Generator`] turns a prompt into a diff text. The empty string is the
//! failure signal: the controller skips the generation and never retries.

use crate::error::EvolveError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default model identifier
pub const DEFAULT_MODEL: &str = "google/gemini-flash-1.5";

/// Environment variable overriding the model
pub const MODEL_ENV: &str = "MODEL_ID";

/// Environment variable holding the API base URL
pub const BASE_URL_ENV: &str = "BASE_URL";

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "API_KEY";

/// Produces diff text for a prompt
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Generator: Send + Sync {
    /// Generate a response; empty on failure
    async fn generate(&self, prompt: &str) -> String;
}

/// Generator endpoint settings
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Model identifier
    pub model: String,
    /// Base URL of an OpenAI-compatible API
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: None,
            api_key: None,
            request_timeout_secs: 120,
        }
    }
}

// Keeps the key out of logs.
impl std::fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat-completions endpoint
#[derive(Debug, Clone)]
pub struct OpenAiGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiGenerator {
    /// Create generator from settings
    ///
    /// # Errors
    /// Returns [`EvolveError::Config`] if the base URL or key is missing or
    /// the HTTP client cannot be built
    pub fn from_config(config: &GeneratorConfig) -> Result<Self, EvolveError> {
        let base_url = config
            .base_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| EvolveError::config(format!("{BASE_URL_ENV} is not set")))?;
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| EvolveError::config(format!("{API_KEY_ENV} is not set")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| EvolveError::config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
        })
    }

    /// Model identifier
    #[inline]
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Chat-completions URL
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request(&self, prompt: &str) -> Result<String, String> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("http error: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let excerpt: String = text.chars().take(500).collect();
            return Err(format!("api error {status}: {excerpt}"));
        }

        let data: ChatResponse = response
            .json()
            .await
            .map_err(|e| format!("parse error: {e}"))?;
        data.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| "empty response".to_string())
    }
}

#[async_trait::async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> String {
        tracing::info!(model = %self.model, endpoint = %self.endpoint, "sending prompt to generator");
        match self.request(prompt).await {
            Ok(text) => {
                tracing::info!(bytes = text.len(), "received generator response");
                text
            }
            Err(e) => {
                tracing::error!(error = %e, "generator request failed");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GeneratorConfig {
        GeneratorConfig {
            base_url: Some("http://localhost:9/v1/".to_string()),
            api_key: Some("sk-test".to_string()),
            ..GeneratorConfig::default()
        }
    }

    #[test]
    fn endpoint_joins_base_url() {
        let generator = OpenAiGenerator::from_config(&config()).unwrap();
        assert_eq!(generator.endpoint(), "http://localhost:9/v1/chat/completions");
        assert_eq!(generator.model(), DEFAULT_MODEL);
    }

    #[test]
    fn missing_key_is_config_error() {
        let config = GeneratorConfig {
            api_key: None,
            ..config()
        };
        let err = OpenAiGenerator::from_config(&config).unwrap_err();
        assert!(err.to_string().contains(API_KEY_ENV));
    }

    #[test]
    fn missing_base_url_is_config_error() {
        let config = GeneratorConfig {
            base_url: Some(String::new()),
            ..config()
        };
        let err = OpenAiGenerator::from_config(&config).unwrap_err();
        assert!(err.to_string().contains(BASE_URL_ENV));
    }

    #[test]
    fn debug_redacts_key() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("sk-test"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn chat_response_extracts_first_choice() {
        let data: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "diff"}}]}"#,
        )
        .unwrap();
        assert_eq!(data.choices[0].message.content.as_deref(), Some("diff"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_yields_empty_output() {
        let generator = OpenAiGenerator::from_config(&config()).unwrap();
        assert_eq!(generator.generate("prompt").await, "");
    }

    #[tokio::test]
    async fn mock_generator_returns_scripted_text() {
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .returning(|prompt| format!("echo {prompt}"));
        assert_eq!(generator.generate("hi").await, "echo hi");
    }
}
