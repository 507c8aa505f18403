use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{chat_messages, check_status, http_client, system_prompt};
use crate::provider::{LlmError, LlmProvider, Message};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic messages API backend.
pub struct ClaudeProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl ClaudeProvider {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            api_key,
            model,
        }
    }

    fn body(&self, messages: &[Message], temperature: f32, max_tokens: u32) -> serde_json::Value {
        // Claude API uses separate system parameter
        let mut body = json!({
            "model": self.model,
            "messages": chat_messages(messages, false),
            "temperature": temperature,
            "max_tokens": max_tokens,
        });
        if let Some(system) = system_prompt(messages) {
            body["system"] = json!(system);
        }
        body
    }
}

#[async_trait]
impl LlmProvider for ClaudeProvider {
    async fn complete(
        &self,
        messages: Vec<Message>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let body = self.body(&messages, temperature, max_tokens);

        debug!(model = %self.model, "Claude request to {}", MESSAGES_URL);

        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;

        let resp: serde_json::Value = response.json().await?;
        parse_content(&resp)
    }
}

/// Concatenate every text block of the response.
fn parse_content(resp: &serde_json::Value) -> Result<String, LlmError> {
    let blocks = resp["content"]
        .as_array()
        .ok_or_else(|| LlmError::ParseError("missing content array".into()))?;
    let text: Vec<&str> = blocks
        .iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect();
    if text.is_empty() {
        return Err(LlmError::ParseError("no text block in content".into()));
    }
    Ok(text.join(""))
}
