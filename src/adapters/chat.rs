//! Chat-completions reasoning adapter.
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint and asks for
//! a JSON object response. Prompt authoring lives in `analysis::remote`;
//! this adapter only moves bytes and classifies failures.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ProviderError, Reasoner, ReasoningOutput, ReasoningRequest};

/// Configuration for the chat reasoner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Base URL, e.g. "https://api.openai.com/v1"
    pub base_url: String,
    pub model: String,
    pub api_key: String,
}

/// OpenAI-compatible chat-completions client
pub struct ChatReasoner {
    config: ChatConfig,
    client: reqwest::Client,
}

/// Response from the chat-completions API
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u64,
}

impl ChatReasoner {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Build API URL
    fn api_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, request: &ReasoningRequest) -> serde_json::Value {
        let system = format!(
            "{}\n\nRespond with a single JSON object matching this schema:\n{}",
            request.system_prompt, request.output_schema
        );
        serde_json::json!({
            "model": self.config.model,
            "temperature": request.temperature,
            "max_tokens": request.max_output_tokens,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": request.user_prompt },
            ],
        })
    }
}

#[async_trait]
impl Reasoner for ChatReasoner {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn complete(
        &self,
        request: &ReasoningRequest,
        timeout: Duration,
    ) -> Result<ReasoningOutput, ProviderError> {
        let response = self
            .client
            .post(self.api_url())
            .bearer_auth(&self.config.api_key)
            .timeout(timeout)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(self.name(), &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(
                self.name(),
                status.as_u16(),
                format!("chat API returned {}: {}", status, body.trim()),
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(self.name(), &e))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::unknown(self.name(), "chat API returned no content"))?;

        Ok(ReasoningOutput {
            content,
            tokens_used: parsed.usage.map(|u| u.total_tokens),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reasoner() -> ChatReasoner {
        ChatReasoner::new(ChatConfig {
            base_url: "https://llm.example.com/v1/".to_string(),
            model: "test-model".to_string(),
            api_key: "KEY".to_string(),
        })
    }

    #[test]
    fn test_api_url() {
        assert_eq!(reasoner().api_url(), "https://llm.example.com/v1/chat/completions");
    }

    #[test]
    fn test_request_body_embeds_schema() {
        let request = ReasoningRequest {
            system_prompt: "You are careful.".to_string(),
            user_prompt: "Claim: x".to_string(),
            output_schema: serde_json::json!({"type": "object"}),
            temperature: 0.1,
            max_output_tokens: 512,
        };
        let body = reasoner().request_body(&request);

        assert_eq!(body["model"], "test-model");
        assert_eq!(body["max_tokens"], 512);
        let system = body["messages"][0]["content"].as_str().unwrap();
        assert!(system.contains("\"type\":\"object\""));
        assert_eq!(body["messages"][1]["content"], "Claim: x");
    }

    #[test]
    fn test_usage_parsing() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"{}"}}],"usage":{"total_tokens":42}}"#,
        )
        .unwrap();
        assert_eq!(parsed.usage.unwrap().total_tokens, 42);
    }
}
