//! Semvault configuration
//!
//! JSON config file with per-section defaults. Every field is optional in
//! the file; a missing file means defaults for everything.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Default config file name, resolved against the working directory
pub const CONFIG_FILE: &str = "semvault.json";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub indexing: IndexingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "semvault.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Embedding backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Built-in deterministic token projection, no model file required
    Projection,
    /// Model2Vec neural embeddings, loaded from disk or the Hugging Face hub
    Model2Vec,
}

/// Default Model2Vec model ID
pub const DEFAULT_MODEL2VEC_MODEL: &str = "minishlab/potion-base-8M";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_backend")]
    pub backend: EmbeddingBackend,

    /// Local model directory; takes precedence over `model_id`
    #[serde(default)]
    pub model_path: Option<String>,

    #[serde(default = "default_model_id")]
    pub model_id: String,
}

fn default_backend() -> EmbeddingBackend {
    EmbeddingBackend::Projection
}

fn default_model_id() -> String {
    DEFAULT_MODEL2VEC_MODEL.to_string()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            model_path: None,
            model_id: default_model_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Number of results returned by a similarity search
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    3
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Attempts per job before it is abandoned
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles per further attempt
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Wall-clock bound per attempt; exceeding it counts as a retryable failure
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    200
}

fn default_job_timeout_secs() -> u64 {
    30
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

impl Config {
    /// Load config from `path`, falling back to defaults when the file is
    /// missing or unreadable
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match Self::load_from_file(path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to load config, using defaults"
                    );
                }
            }
        }
        Self::default()
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| crate::error::Error::invalid(format!("config parse error: {e}")))?;
        Ok(config)
    }

    /// Write the config to `path` as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| crate::error::Error::invalid(format!("config encode error: {e}")))?;
        fs::write(path, content)?;
        Ok(())
    }
}
