//! Query embedder backed by an OpenAI-compatible embeddings endpoint.
//!
//! Calls `POST {base_url}/embeddings` with the configured model. The same
//! model must have produced the chunk store; model name and dimensionality
//! are checked when the [`Retriever`](docpilot_core::Retriever) is assembled.
//!
//! Failures are returned as errors and never retried here; the retriever
//! maps them to `RetrievalUnavailable` and the copilot degrades the
//! answer.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use docpilot_core::Embedder;
use serde_json::json;

use crate::config::{api_key, EmbeddingConfig};

pub struct OpenAIEmbedder {
    /// Model name (e.g. `"text-embedding-3-small"`).
    model: String,
    /// Vector dimensionality (e.g. `1536`).
    dims: usize,
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    /// Create an embedder from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured API key variable is not set or
    /// the HTTP client cannot be built.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = api_key(&config.api_key_env)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = json!({
            "model": self.model,
            "input": [text],
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("embedding API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_embedding_response(&json)
    }
}

/// Extract `data[0].embedding` from an embeddings response.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid embeddings response: missing data[0].embedding"))?;

    embedding
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow!("Invalid embeddings response: non-numeric component"))
        })
        .collect()
}
