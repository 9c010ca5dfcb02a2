//! Chat-completion client used by the answer pipeline.
//!
//! [`ChatModel`] is the seam between the pipeline and a language model.
//! [`OpenAIChat`] speaks the OpenAI `POST /v1/chat/completions` protocol,
//! which Ollama also serves, so both `llm.provider` values use it with a
//! different base URL and authentication.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::embedding::openai_api_key;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Send `messages` and return the assistant's reply text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

pub struct OpenAIChat {
    model: String,
    base_url: String,
    api_key: Option<String>,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let (default_base, api_key) = match config.provider.as_str() {
            "openai" => ("https://api.openai.com", Some(openai_api_key()?)),
            "ollama" => ("http://localhost:11434", None),
            other => bail!("Unknown llm provider: {}", other),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| default_base.to_string()),
            api_key,
            temperature: config.temperature,
            client,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": false,
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| anyhow!("chat request to {} failed: {}", url, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("chat API error {}: {}", status, text);
        }

        let payload: serde_json::Value = response.json().await?;
        parse_completion(&payload)
    }
}

fn parse_completion(payload: &serde_json::Value) -> Result<String> {
    payload["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("chat response has no choices[0].message.content"))
}

pub fn create_chat_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>> {
    Ok(Arc::new(OpenAIChat::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion() {
        let payload = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "hi" } }]
        });
        assert_eq!(parse_completion(&payload).unwrap(), "hi");
    }

    #[test]
    fn test_parse_completion_missing_content() {
        assert!(parse_completion(&serde_json::json!({ "choices": [] })).is_err());
    }

    #[test]
    fn test_message_roles_serialize() {
        let json = serde_json::to_value(ChatMessage::system("be brief")).unwrap();
        assert_eq!(json, serde_json::json!({ "role": "system", "content": "be brief" }));
    }

    #[test]
    fn test_ollama_chat_needs_no_key() {
        let config = LlmConfig {
            provider: "ollama".into(),
            ..Default::default()
        };
        let chat = OpenAIChat::new(&config).unwrap();
        assert!(chat.api_key.is_none());
        assert_eq!(chat.base_url, "http://localhost:11434");
    }
}
