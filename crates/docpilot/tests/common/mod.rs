//! Deterministic collaborators and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use docpilot::config::{parse_config, Config};
use docpilot::copilot::{load_chunk_store, Copilot};
use docpilot_core::{Completion, CompletionClient, Embedder, Prompt};
use serde_json::json;

// ─── Embedders ──────────────────────────────────────────────────────

/// Maps a query to a fixed 3-d vector by keyword.
pub struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-stub"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        if lower.contains("discord") {
            Ok(vec![1.0, 0.0, 0.0])
        } else if lower.contains("billing") {
            Ok(vec![0.0, 1.0, 0.0])
        } else {
            Ok(vec![0.0, 0.0, 1.0])
        }
    }
}

pub struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    fn model_name(&self) -> &str {
        "keyword-stub"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("connection refused")
    }
}

// ─── Completion clients ─────────────────────────────────────────────

/// Replies with a fixed confidence and records every prompt.
pub struct ScriptedClient {
    pub confidence: i64,
    pub prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedClient {
    pub fn new(confidence: i64) -> Arc<Self> {
        Arc::new(Self {
            confidence,
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }
    async fn complete(&self, prompt: &Prompt) -> Result<Completion> {
        self.prompts.lock().unwrap().push(prompt.clone());
        let text = if prompt.grounded {
            "Open Settings > Integrations and connect the Discord bot [Source 1]."
        } else {
            "I could not find this in the documentation."
        };
        Ok(Completion {
            text: text.to_string(),
            confidence: self.confidence,
        })
    }
}

/// Never answers within any reasonable deadline.
pub struct HangingClient;

#[async_trait]
impl CompletionClient for HangingClient {
    fn name(&self) -> &str {
        "hanging"
    }
    async fn complete(&self, _prompt: &Prompt) -> Result<Completion> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        bail!("unreachable")
    }
}

/// Holds every call until `parties` calls are waiting, then replies
/// ungrounded with a fixed confidence.
pub struct GatedClient {
    pub confidence: i64,
    gate: tokio::sync::Barrier,
}

impl GatedClient {
    pub fn new(confidence: i64, parties: usize) -> Arc<Self> {
        Arc::new(Self {
            confidence,
            gate: tokio::sync::Barrier::new(parties),
        })
    }
}

#[async_trait]
impl CompletionClient for GatedClient {
    fn name(&self) -> &str {
        "gated"
    }
    async fn complete(&self, _prompt: &Prompt) -> Result<Completion> {
        self.gate.wait().await;
        Ok(Completion {
            text: "I could not find this in the documentation.".to_string(),
            confidence: self.confidence,
        })
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────

/// Write a small 3-d chunk store. The Discord guide sits at cosine 0.89
/// from the "discord" query vector.
pub fn write_store(dir: &Path) -> std::path::PathBuf {
    let discord_y = (1.0f32 - 0.89 * 0.89).sqrt();
    let doc = json!({
        "model": "keyword-stub",
        "dims": 3,
        "chunks": [
            {
                "id": "billing-faq",
                "title": "Billing FAQ",
                "text": "Update your card under Settings > Billing.",
                "url": "https://docs.example.com/billing",
                "category": "billing",
                "embedding": [0.0, 1.0, 0.0]
            },
            {
                "id": "discord-guide",
                "title": "Discord Integration Guide",
                "text": "Connect the Discord bot from Settings > Integrations.",
                "url": "https://docs.example.com/discord",
                "category": "integrations",
                "embedding": [0.89, discord_y, 0.0]
            },
            {
                "id": "twitter-dm",
                "title": "Twitter DM Campaigns",
                "text": "Create a campaign from the Campaigns page.",
                "url": "https://docs.example.com/twitter",
                "embedding": [0.5, 0.5, 0.0]
            },
            {
                "id": "topics",
                "title": "Topic Definitions",
                "text": "Topics group conversations by theme.",
                "embedding": [0.6, 0.0, -0.8]
            }
        ]
    });
    let path = dir.join("chunks.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&doc).unwrap()).unwrap();
    path
}

/// Config text for a store in `dir`; `extra` is appended verbatim.
pub fn config_for(dir: &Path, extra: &str) -> Config {
    let store = write_store(dir);
    let text = format!(
        r#"
[store]
path = "{}"

[embedding]
dims = 3
api_key_env = ""

[generation]
api_key_env = ""
timeout_secs = 1

{}
"#,
        store.display().to_string().replace('\\', "/"),
        extra
    );
    parse_config(&text).unwrap()
}

pub fn copilot_with(
    config: &Config,
    embedder: Arc<dyn Embedder>,
    client: Arc<dyn CompletionClient>,
) -> Copilot {
    let store = Arc::new(load_chunk_store(&config.store.path).unwrap());
    Copilot::assemble(config, store, embedder, client).unwrap()
}
