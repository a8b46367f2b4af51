//! TOML configuration.
//!
//! Every section except `[store]` is optional and falls back to the
//! defaults below. [`load_config`] parses and validates the file; all
//! violations are fatal at startup.

use anyhow::{bail, Context, Result};
use docpilot_core::{CalibrationParams, EscalationPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub escalation: EscalationPolicy,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub response: ResponseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_floor: default_similarity_floor(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_similarity_floor() -> f32 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dims")]
    pub dims: usize,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key. Empty disables auth.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: default_embedding_dims(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_dims() -> usize {
    1536
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_ungrounded_cap")]
    pub ungrounded_confidence_cap: u8,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_generation_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            history_turns: default_history_turns(),
            ungrounded_confidence_cap: default_ungrounded_cap(),
        }
    }
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    600
}
fn default_history_turns() -> usize {
    3
}
fn default_ungrounded_cap() -> u8 {
    40
}

/// Calibration coefficients. The similarity floor is taken from
/// `[retrieval]` so the two can never disagree.
#[derive(Debug, Deserialize, Clone)]
pub struct CalibrationConfig {
    #[serde(default = "default_model_weight")]
    pub model_weight: f64,
    #[serde(default = "default_top_weight")]
    pub top_weight: f64,
    #[serde(default = "default_saturation_count")]
    pub saturation_count: usize,
    #[serde(default = "default_evidence_ceiling_base")]
    pub evidence_ceiling_base: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            model_weight: default_model_weight(),
            top_weight: default_top_weight(),
            saturation_count: default_saturation_count(),
            evidence_ceiling_base: default_evidence_ceiling_base(),
        }
    }
}

fn default_model_weight() -> f64 {
    0.6
}
fn default_top_weight() -> f64 {
    0.7
}
fn default_saturation_count() -> usize {
    3
}
fn default_evidence_ceiling_base() -> f64 {
    40.0
}

impl CalibrationConfig {
    pub fn params(&self, similarity_floor: f32) -> CalibrationParams {
        CalibrationParams {
            model_weight: self.model_weight,
            top_weight: self.top_weight,
            saturation_count: self.saturation_count,
            evidence_ceiling_base: self.evidence_ceiling_base,
            similarity_floor: f64::from(similarity_floor),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    /// Archive directory. Unset keeps sessions in memory only.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dir: None,
            search_limit: default_search_limit(),
        }
    }
}

fn default_search_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResponseConfig {
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            max_sources: default_max_sources(),
        }
    }
}

fn default_max_sources() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    /// Directory for daily-rolling log files. Unset logs to stdout only.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: None,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// Read the API key named by `env_name`. An empty name means no key.
pub fn api_key(env_name: &str) -> Result<Option<String>> {
    if env_name.trim().is_empty() {
        return Ok(None);
    }
    match std::env::var(env_name) {
        Ok(key) if !key.trim().is_empty() => Ok(Some(key)),
        _ => bail!("{} environment variable not set", env_name),
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate retrieval
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    let floor = config.retrieval.similarity_floor;
    if !floor.is_finite() || !(-1.0..=1.0).contains(&floor) {
        bail!("retrieval.similarity_floor must be in [-1.0, 1.0]");
    }

    // Validate embedding
    if config.embedding.provider != "openai" {
        bail!(
            "Unknown embedding provider: '{}'. Must be openai.",
            config.embedding.provider
        );
    }
    if config.embedding.dims == 0 {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.model.trim().is_empty() {
        bail!("embedding.model must be specified");
    }

    // Validate generation
    let gen = &config.generation;
    if gen.provider != "openai" {
        bail!("Unknown generation provider: '{}'. Must be openai.", gen.provider);
    }
    if gen.model.trim().is_empty() {
        bail!("generation.model must be specified");
    }
    if gen.timeout_secs < 1 {
        bail!("generation.timeout_secs must be >= 1");
    }
    if !(1..=10).contains(&gen.history_turns) {
        bail!("generation.history_turns must be in [1, 10]");
    }
    if gen.ungrounded_confidence_cap > 100 {
        bail!("generation.ungrounded_confidence_cap must be in [0, 100]");
    }
    if !gen.temperature.is_finite() || gen.temperature < 0.0 {
        bail!("generation.temperature must be >= 0");
    }

    // Validate calibration
    let cal = &config.calibration;
    if !(0.0..=1.0).contains(&cal.model_weight) {
        bail!("calibration.model_weight must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&cal.top_weight) {
        bail!("calibration.top_weight must be in [0.0, 1.0]");
    }
    if cal.saturation_count < 1 {
        bail!("calibration.saturation_count must be >= 1");
    }
    if !(0.0..=100.0).contains(&cal.evidence_ceiling_base) {
        bail!("calibration.evidence_ceiling_base must be in [0, 100]");
    }

    config
        .escalation
        .validate()
        .map_err(|e| anyhow::anyhow!("escalation: {}", e))?;

    if config.history.search_limit < 1 {
        bail!("history.search_limit must be >= 1");
    }
    if config.response.max_sources < 1 {
        bail!("response.max_sources must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("[store]\npath = \"data/chunks.json\"\n").unwrap();
        assert_eq!(config.retrieval.top_k, 5);
        assert!((config.retrieval.similarity_floor - 0.3).abs() < 1e-6);
        assert_eq!(config.generation.model, "gpt-4o-mini");
        assert_eq!(config.generation.history_turns, 3);
        assert_eq!(config.escalation.escalation_threshold, 30);
        assert_eq!(config.escalation.warn_threshold, 50);
        assert!(config.escalation.admin_channel.is_none());
        assert_eq!(config.response.max_sources, 3);
        assert_eq!(config.server.bind, "127.0.0.1:5000");
        assert!(config.history.dir.is_none());
    }

    #[test]
    fn test_full_config_overrides() {
        let config = parse_config(
            r#"
[store]
path = "chunks.json"

[retrieval]
top_k = 8
similarity_floor = 0.25

[generation]
timeout_secs = 5
history_turns = 5

[calibration]
model_weight = 0.5

[escalation]
escalation_threshold = 20
warn_threshold = 60
admin_channel = "support-oncall"

[history]
dir = "conversation_history"
"#,
        )
        .unwrap();
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.generation.timeout_secs, 5);
        assert_eq!(config.escalation.admin_channel.as_deref(), Some("support-oncall"));
        assert_eq!(config.escalation.repeat_after, 2);
        let params = config.calibration.params(config.retrieval.similarity_floor);
        assert!((params.similarity_floor - 0.25).abs() < 1e-6);
        assert!((params.model_weight - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_missing_store_is_rejected() {
        assert!(parse_config("[retrieval]\ntop_k = 3\n").is_err());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let cases = [
            "[retrieval]\ntop_k = 0",
            "[retrieval]\nsimilarity_floor = 1.5",
            "[embedding]\nprovider = \"word2vec\"",
            "[embedding]\ndims = 0",
            "[generation]\nhistory_turns = 0",
            "[generation]\nhistory_turns = 11",
            "[generation]\ntimeout_secs = 0",
            "[generation]\nungrounded_confidence_cap = 120",
            "[calibration]\nmodel_weight = 1.5",
            "[calibration]\nsaturation_count = 0",
            "[escalation]\nescalation_threshold = 60\nwarn_threshold = 50",
            "[response]\nmax_sources = 0",
        ];
        for case in cases {
            let text = format!("[store]\npath = \"c.json\"\n{}\n", case);
            assert!(parse_config(&text).is_err(), "accepted: {}", case);
        }
    }

    #[test]
    fn test_api_key_lookup() {
        assert!(api_key("").unwrap().is_none());
        assert!(api_key("DOCPILOT_TEST_KEY_THAT_IS_NEVER_SET").is_err());
    }
}
