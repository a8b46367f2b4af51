//! Completion client for OpenAI-compatible chat endpoints.
//!
//! Sends the grounding prompt to `POST {base_url}/chat/completions` and
//! parses `choices[0].message.content` with
//! [`parse_reply`](docpilot_core::generate::parse_reply). Works against
//! OpenAI and local servers that speak the same protocol (LM Studio,
//! Ollama's `/v1`, vLLM).

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use docpilot_core::generate::parse_reply;
use docpilot_core::{Completion, CompletionClient, Prompt};
use serde_json::{json, Value};

use crate::config::{api_key, GenerationConfig};

pub struct OpenAIChatClient {
    model: String,
    endpoint: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAIChatClient {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = api_key(&config.api_key_env)?;
        // The generator enforces the answer deadline; this only bounds a
        // connection that never completes.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.saturating_add(5)))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
        })
    }

    fn request_body(&self, prompt: &Prompt) -> Value {
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAIChatClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &Prompt) -> Result<Completion> {
        let mut request = self.client.post(&self.endpoint).json(&self.request_body(prompt));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("chat completion error {}: {}", status, text);
        }

        let payload: Value = response.json().await?;
        let content = message_content(&payload)?;
        parse_reply(content)
    }
}

fn message_content(payload: &Value) -> Result<&str> {
    payload["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| anyhow!("chat completion response has no message content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OpenAIChatClient {
        OpenAIChatClient::new(&GenerationConfig {
            api_key_env: String::new(),
            base_url: "http://localhost:1234/v1".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_request_body_shape() {
        let prompt = Prompt {
            system: "sys".into(),
            user: "Question: hi".into(),
            grounded: true,
        };
        let body = client().request_body(&prompt);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Question: hi");
        assert_eq!(body["max_tokens"], 600);
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(client().endpoint, "http://localhost:1234/v1/chat/completions");
    }

    #[test]
    fn test_message_content_extraction() {
        let payload = json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"answer\":\"ok\",\"confidence\":70}"}}]
        });
        let completion = parse_reply(message_content(&payload).unwrap()).unwrap();
        assert_eq!(completion.text, "ok");
        assert_eq!(completion.confidence, 70);
        assert!(message_content(&json!({"choices": []})).is_err());
    }
}
