//! Pipeline configuration
//!
//! Read from a JSON file; every field has a default so partial files work.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::context::prompt::{PromptOptions, MAX_CHUNK_CHARS, PROMPT_TOKEN_BUDGET};
use crate::context::tokens::DEFAULT_ENCODING;
use crate::documents::chunker::{CHUNK_SIZE_TARGET, CONTEXT_MARGIN};
use crate::documents::embeddings::{
    Embedder, EmbeddingEngine, EmbeddingError, HashingEmbedder, DEFAULT_DIMENSION,
};
use crate::documents::http_embedder::{HttpEmbedder, HttpEmbedderOptions, RetryPolicy};

pub const CONFIG_FILE: &str = "config.json";
const APP_DIR: &str = "secrag";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Offline feature hashing
    Hashing,
    /// OpenAI-compatible HTTP endpoint
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub endpoint: String,
    /// Environment variable holding the API key, if the endpoint needs one
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
    pub max_attempts: usize,
    pub backoff_base_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Hashing,
            model: "sentence-transformers/multi-qa-mpnet-base-dot-v1".to_string(),
            dimension: DEFAULT_DIMENSION,
            batch_size: 32,
            endpoint: "http://localhost:8080/v1".to_string(),
            api_key_env: None,
            timeout_secs: 60,
            max_attempts: 3,
            backoff_base_ms: 500,
        }
    }
}

impl EmbeddingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        }
    }

    /// Construct the configured backend and wrap it in an engine.
    pub fn build_engine(&self) -> Result<EmbeddingEngine, EmbeddingError> {
        let backend: Box<dyn Embedder> = match self.backend {
            EmbeddingBackend::Hashing => Box::new(HashingEmbedder::new(self.dimension)?),
            EmbeddingBackend::Http => {
                let api_key = self
                    .api_key_env
                    .as_deref()
                    .and_then(|name| std::env::var(name).ok());
                Box::new(HttpEmbedder::new(HttpEmbedderOptions {
                    base_url: self.endpoint.clone(),
                    model: self.model.clone(),
                    dimension: self.dimension,
                    api_key,
                    timeout: Duration::from_secs(self.timeout_secs),
                    retry: self.retry_policy(),
                })?)
            }
        };
        Ok(EmbeddingEngine::new(backend))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub max_chunk_chars: usize,
    pub prompt_token_budget: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_chunk_chars: MAX_CHUNK_CHARS,
            prompt_token_budget: PROMPT_TOKEN_BUDGET,
        }
    }
}

impl RetrievalConfig {
    pub fn prompt_options(&self) -> PromptOptions {
        PromptOptions {
            max_chunk_chars: self.max_chunk_chars,
            token_budget: self.prompt_token_budget,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub encoding: String,
    pub chunk_size: usize,
    pub context_margin: usize,
    /// Store the exact embedding input in chunk artifacts
    pub include_embedding_text: bool,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            encoding: DEFAULT_ENCODING.to_string(),
            chunk_size: CHUNK_SIZE_TARGET,
            context_margin: CONTEXT_MARGIN,
            include_embedding_text: true,
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Default config location: `<config_dir>/secrag/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path, else the default location if it exists,
    /// else built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => {
                debug!(path = %path.display(), "Using config file");
                Self::from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.chunk_size == 0, "chunk_size must be greater than zero"),
            (
                self.embedding.dimension == 0,
                "embedding.dimension must be greater than zero",
            ),
            (
                self.embedding.batch_size == 0,
                "embedding.batch_size must be greater than zero",
            ),
            (
                self.embedding.max_attempts == 0,
                "embedding.max_attempts must be at least 1",
            ),
            (self.retrieval.top_k == 0, "retrieval.top_k must be greater than zero"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ConfigError::Invalid(message.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.context_margin, 50);
        assert_eq!(config.encoding, "cl100k_base");
        assert_eq!(config.embedding.dimension, 768);
        assert_eq!(config.retrieval.top_k, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"chunk_size": 256, "embedding": {"backend": "http", "batch_size": 128}}"#,
        )
        .unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.chunk_size, 256);
        assert_eq!(config.context_margin, 50);
        assert_eq!(config.embedding.backend, EmbeddingBackend::Http);
        assert_eq!(config.embedding.batch_size, 128);
        assert_eq!(config.embedding.max_attempts, 3);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"chunk_size": 0}"#).unwrap();
        assert!(matches!(PipelineConfig::from_file(&path), Err(ConfigError::Invalid(_))));

        fs::write(&path, r#"{"chunk_size": "big"}"#).unwrap();
        assert!(matches!(PipelineConfig::from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(PipelineConfig::load(Some(&missing)), Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_build_hashing_engine() {
        let mut config = EmbeddingConfig::default();
        config.dimension = 32;
        let engine = config.build_engine().unwrap();
        assert_eq!(engine.dimension(), 32);
        assert_eq!(engine.model_name(), "feature-hash-32");
    }

    #[test]
    fn test_build_http_engine_uses_configured_model() {
        let config = EmbeddingConfig {
            backend: EmbeddingBackend::Http,
            dimension: 384,
            ..Default::default()
        };
        let engine = config.build_engine().unwrap();
        assert_eq!(engine.dimension(), 384);
        assert_eq!(engine.model_name(), "sentence-transformers/multi-qa-mpnet-base-dot-v1");
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = EmbeddingConfig {
            max_attempts: 5,
            backoff_base_ms: 250,
            ..Default::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff_base, Duration::from_millis(250));
    }
}
