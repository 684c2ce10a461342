//! Chat-completion provider abstraction.
//!
//! A missing provider is a normal configuration: [`create_chat_provider`]
//! returns `None` when chat is disabled or no API key is available, and
//! the reply pipeline answers with templates instead.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ChatConfig;
use crate::error::{Result, TriageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub text: String,
    pub latency_ms: i64,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// One completion for the ordered conversation.
    async fn chat(&self, messages: &[ChatMessage], temperature: f32) -> Result<ChatCompletion>;
}

/// Client for OpenAI-compatible `POST {base_url}/chat/completions`.
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiChat {
    pub fn new(config: &ChatConfig, api_key: String) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| TriageError::invalid("chat.model required for openai provider"))?;
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| TriageError::invalid("chat.base_url required for openai provider"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
        })
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[ChatMessage], temperature: f32) -> Result<ChatCompletion> {
        let started = Instant::now();
        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TriageError::ExternalService(format!(
                "chat API error {}: {}",
                status, body
            )));
        }

        let parsed: CompletionResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();

        Ok(ChatCompletion {
            text,
            latency_ms: started.elapsed().as_millis() as i64,
        })
    }
}

/// Create the configured chat provider, or `None` when chat is disabled or
/// the API key variable is unset or blank.
pub fn create_chat_provider(config: &ChatConfig) -> Result<Option<Arc<dyn ChatProvider>>> {
    if !config.is_enabled() {
        return Ok(None);
    }
    match config.provider.as_str() {
        "openai" => {
            let api_key = std::env::var(&config.api_key_env).unwrap_or_default();
            if api_key.trim().is_empty() {
                tracing::info!(
                    env = %config.api_key_env,
                    "chat API key not set, replies will use templates"
                );
                return Ok(None);
            }
            Ok(Some(Arc::new(OpenAiChat::new(config, api_key.trim().to_string())?)))
        }
        other => Err(TriageError::invalid(format!("unknown chat provider: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_provider_is_none() {
        let provider = create_chat_provider(&ChatConfig::default()).unwrap();
        assert!(provider.is_none());
    }

    #[test]
    fn test_missing_key_is_none() {
        let config = ChatConfig {
            provider: "openai".to_string(),
            model: Some("glm-4-flash".to_string()),
            base_url: Some("https://example.invalid/v4".to_string()),
            api_key_env: "COMMENT_TRIAGE_TEST_UNSET_CHAT_KEY".to_string(),
            ..ChatConfig::default()
        };
        assert!(create_chat_provider(&config).unwrap().is_none());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = ChatConfig {
            provider: "carrier-pigeon".to_string(),
            ..ChatConfig::default()
        };
        assert!(matches!(
            create_chat_provider(&config),
            Err(TriageError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_messages_serialize_with_lowercase_roles() {
        let json = serde_json::to_value(ChatMessage::system("hi")).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "hi");
    }

    #[test]
    fn test_completion_response_tolerates_missing_content() {
        let parsed: CompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{}}]}"#).unwrap();
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content);
        assert!(text.is_none());
    }
}
