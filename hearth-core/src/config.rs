//! Configuration for the hearth memory system.
//!
//! Maps directly to `hearth.toml`. Every field has a serde default, so an
//! empty file yields the same values as [`HearthConfig::default`].

use std::path::PathBuf;

use hearth_llm::{LlmClient, LlmProvider};
use serde::{Deserialize, Serialize};

use crate::error::{HearthError, Result};

/// Top-level hearth configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HearthConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Per-agent importance and reflection settings.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Time-weighted retrieval settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Reflection worker pool.
    #[serde(default)]
    pub reflection: ReflectionConfig,
    /// LLM integration settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// External memory log settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl HearthConfig {
    /// Load configuration from a TOML string and validate it.
    ///
    /// # Errors
    /// Returns `HearthError::Config` if the TOML is invalid or a value is
    /// out of range.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| HearthError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Check value ranges across all sections.
    ///
    /// # Errors
    /// Returns `HearthError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let w = self.memory.importance_weight;
        if !(w > 0.0 && w <= 1.0) {
            return Err(HearthError::Config(format!(
                "memory.importance_weight must be in (0, 1], got {w}"
            )));
        }
        if let Some(t) = self.memory.reflection_threshold {
            if !(t >= 0.0) {
                return Err(HearthError::Config(format!(
                    "memory.reflection_threshold must be >= 0, got {t}"
                )));
            }
        }
        let d = self.retrieval.decay_rate;
        if !(0.0..1.0).contains(&d) {
            return Err(HearthError::Config(format!(
                "retrieval.decay_rate must be in [0, 1), got {d}"
            )));
        }
        if self.retrieval.k == 0 {
            return Err(HearthError::Config("retrieval.k must be at least 1".into()));
        }
        if self.retrieval.embedding_dimensions == 0 {
            return Err(HearthError::Config(
                "retrieval.embedding_dimensions must be at least 1".into(),
            ));
        }
        if !matches!(
            self.retrieval.embedding_provider.as_str(),
            "hashing" | "stub" | "ollama" | "openai"
        ) {
            return Err(HearthError::Config(format!(
                "retrieval.embedding_provider must be one of hashing, stub, ollama, openai, got \"{}\"",
                self.retrieval.embedding_provider
            )));
        }
        if !matches!(self.persistence.backend.as_str(), "json" | "sqlite") {
            return Err(HearthError::Config(format!(
                "persistence.backend must be \"json\" or \"sqlite\", got \"{}\"",
                self.persistence.backend
            )));
        }
        if self.reflection.max_concurrent_topics == 0 {
            return Err(HearthError::Config(
                "reflection.max_concurrent_topics must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones.
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

/// Importance accumulation and reflection trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Scale applied to the 1–10 rating; a memory scores in `[0, importance_weight]`.
    #[serde(default = "default_importance_weight")]
    pub importance_weight: f64,
    /// Reflect once accumulated importance exceeds this. `None` disables reflection.
    #[serde(default)]
    pub reflection_threshold: Option<f64>,
    /// How many of the latest memories feed topic derivation.
    #[serde(default = "default_recent_k")]
    pub reflection_recent_k: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            importance_weight: default_importance_weight(),
            reflection_threshold: None,
            reflection_recent_k: default_recent_k(),
        }
    }
}

/// Time-weighted retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Fraction of recency lost per hour since last access.
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,
    /// Number of memories returned per query.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Number of nearest neighbours considered before rescoring.
    #[serde(default = "default_search_k")]
    pub search_k: usize,
    /// Relevance assumed for the latest `k` memories when they are not
    /// among the nearest neighbours. `None` contributes nothing.
    #[serde(default)]
    pub default_salience: Option<f64>,
    /// Embedding vector dimensions. Remote models must produce exactly this many.
    #[serde(default = "default_dimensions")]
    pub embedding_dimensions: usize,
    /// Embedding provider: "hashing", "stub", "ollama", "openai".
    #[serde(default = "default_hashing")]
    pub embedding_provider: String,
    /// Embedding model for the "ollama" and "openai" providers.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Base URL of the embedding API; `llm.base_url` when unset.
    #[serde(default)]
    pub embedding_base_url: Option<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            decay_rate: default_decay_rate(),
            k: default_k(),
            search_k: default_search_k(),
            default_salience: None,
            embedding_dimensions: default_dimensions(),
            embedding_provider: default_hashing(),
            embedding_model: default_embedding_model(),
            embedding_base_url: None,
        }
    }
}

/// Reflection worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionConfig {
    /// Max topics generating insights at the same time.
    #[serde(default = "default_2_usize")]
    pub max_concurrent_topics: usize,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_topics: 2,
        }
    }
}

/// LLM integration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider: "ollama", "openai", "none".
    #[serde(default = "default_ollama")]
    pub provider: String,
    /// Base URL for the LLM API.
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Environment variable holding the API key for "openai".
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Model for importance scoring.
    #[serde(default = "default_tier1_model")]
    pub tier1_model: String,
    /// Model for reflection.
    #[serde(default = "default_tier2_model")]
    pub tier2_model: String,
    /// Max retries before a call fails.
    #[serde(default = "default_2")]
    pub max_retries: u32,
    /// Directory of TOML prompt overrides.
    #[serde(default)]
    pub prompt_dir: Option<PathBuf>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_ollama(),
            base_url: default_ollama_url(),
            api_key_env: default_api_key_env(),
            tier1_model: default_tier1_model(),
            tier2_model: default_tier2_model(),
            max_retries: 2,
            prompt_dir: None,
        }
    }
}

impl LlmConfig {
    /// Build the HTTP completion client described by this section.
    ///
    /// # Errors
    /// Returns `HearthError::Config` for an unknown provider or a missing
    /// API key environment variable.
    pub fn build_client(&self) -> Result<LlmClient> {
        let provider = match self.provider.as_str() {
            "ollama" => LlmProvider::Ollama {
                base_url: self.base_url.clone(),
            },
            "openai" => {
                let api_key = std::env::var(&self.api_key_env).map_err(|_| {
                    HearthError::Config(format!(
                        "llm.provider = \"openai\" requires ${} to be set",
                        self.api_key_env
                    ))
                })?;
                LlmProvider::OpenAiCompatible {
                    base_url: self.base_url.clone(),
                    api_key,
                }
            }
            "none" => LlmProvider::None,
            other => {
                return Err(HearthError::Config(format!("unknown llm.provider '{other}'")));
            }
        };
        Ok(LlmClient::new(
            provider,
            self.tier1_model.clone(),
            self.tier2_model.clone(),
            self.max_retries,
        ))
    }
}

/// External memory log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Backend: "json" (one document per agent) or "sqlite".
    #[serde(default = "default_json")]
    pub backend: String,
    /// Directory holding the per-agent JSON documents or the SQLite file.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Use WAL mode for the SQLite backend.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: default_json(),
            log_dir: default_log_dir(),
            wal_mode: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_ollama() -> String { "ollama".to_string() }
fn default_ollama_url() -> String { "http://localhost:11434".to_string() }
fn default_api_key_env() -> String { "OPENAI_API_KEY".to_string() }
fn default_tier1_model() -> String { "qwen2.5:1.5b".to_string() }
fn default_tier2_model() -> String { "mistral:7b-instruct".to_string() }
fn default_json() -> String { "json".to_string() }
fn default_hashing() -> String { "hashing".to_string() }
fn default_embedding_model() -> String { "nomic-embed-text".to_string() }
fn default_log_dir() -> PathBuf { PathBuf::from("memories") }
fn default_importance_weight() -> f64 { 0.15 }
fn default_decay_rate() -> f64 { 0.01 }
fn default_2() -> u32 { 2 }
fn default_2_usize() -> usize { 2 }
fn default_k() -> usize { 4 }
fn default_recent_k() -> usize { 50 }
fn default_search_k() -> usize { 100 }
fn default_dimensions() -> usize { 256 }
