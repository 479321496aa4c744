use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::generation::{CallError, ModelCaller};
use crate::config::AppConfig;

/// OpenRouter HTTP caller, the production [`ModelCaller`].
///
/// Speaks the chat-completions wire format with bearer auth. Sampling
/// parameters and the request timeout come from the configuration it was
/// constructed with.
pub struct OpenRouterCaller {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
    timeout_secs: u64,
}

impl OpenRouterCaller {
    pub fn new(config: &AppConfig) -> Self {
        let timeout_secs = config.generation.timeout_secs;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            temperature: config.generation.temperature,
            max_tokens: config.generation.max_tokens,
            timeout_secs,
        }
    }
}

/// Request body for POST /chat/completions
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Response body from POST /chat/completions
#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait]
impl ModelCaller for OpenRouterCaller {
    async fn call(&self, model: &str, prompt: &str) -> Result<String, CallError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "https://decisiontrace.app")
            .header("X-Title", "DecisionTrace")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CallError::Timeout(self.timeout_secs)
                } else {
                    CallError::Other(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CallError::Transport(status.as_u16()));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CallError::Other(format!("malformed completion response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| CallError::Other("completion response contained no choices".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationConfig;
    use std::net::SocketAddr;
    use std::path::PathBuf;

    fn test_app_config(base_url: &str) -> AppConfig {
        AppConfig {
            api_key: "test-key".to_string(),
            base_url: base_url.to_string(),
            generation: GenerationConfig::default(),
            database_path: PathBuf::from(":memory:"),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            allowed_origins: vec![],
        }
    }

    #[test]
    fn constructor_trims_trailing_slash() {
        let caller = OpenRouterCaller::new(&test_app_config("https://openrouter.ai/api/v1/"));
        assert_eq!(caller.base_url, "https://openrouter.ai/api/v1");
    }

    #[test]
    fn request_body_serializes_chat_format() {
        let body = ChatRequest {
            model: "deepseek/deepseek-chat",
            messages: vec![ChatMessage {
                role: "user",
                content: "hello",
            }],
            temperature: 0.3,
            max_tokens: 2000,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "deepseek/deepseek-chat");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hello");
        assert_eq!(json["max_tokens"], 2000);
    }

    #[test]
    fn response_body_extracts_first_choice() {
        let raw = r#"{"choices": [{"message": {"role": "assistant", "content": "{\"x\": 1}"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content, "{\"x\": 1}");
    }

    #[test]
    fn empty_choices_deserializes() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(parsed.choices.is_empty());
    }
}
