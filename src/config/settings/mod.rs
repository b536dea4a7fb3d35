
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub document: DocumentConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DocumentConfig {
    /// Path to the plain-text knowledge source.
    pub path: PathBuf,
}

impl Default for DocumentConfig {
    #[inline]
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/knowledgebase.txt"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of chunks retrieved as grounding context per query.
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    #[inline]
    fn default() -> Self {
        Self { top_k: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    /// Sampling temperature passed to the generation model.
    pub temperature: f32,
}

impl Default for GenerationConfig {
    #[inline]
    fn default() -> Self {
        Self { temperature: 0.3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub embed_model: String,
    pub generate_model: String,
    pub batch_size: u32,
    /// Dimension of the embedding model's output vectors.
    pub embedding_dimension: u32,
    /// Optional bearer token for deployments behind an authenticating proxy.
    pub api_key: Option<String>,
}

impl Default for OllamaConfig {
    #[inline]
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            embed_model: "nomic-embed-text:latest".to_string(),
            generate_model: "llama3.1:latest".to_string(),
            batch_size: 16,
            embedding_dimension: 768,
            api_key: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid model name: {0:?} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid chunk length: {0} (must be greater than zero)")]
    InvalidChunkLength(usize),
    #[error("Invalid chunk overlap: {overlap} (must be less than max length {max_length})")]
    InvalidChunkOverlap { overlap: usize, max_length: usize },
    #[error("Invalid retrieval count: {0} (must be between 1 and 50)")]
    InvalidTopK(usize),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            document: DocumentConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            generation: GenerationConfig::default(),
            ollama: OllamaConfig::default(),
            base_dir: PathBuf::new(),
        }
    }
}

impl Config {
    /// Default base directory for config, index, and manifest files.
    #[inline]
    pub fn default_base_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".libretto"))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load the configuration from `<config_dir>/config.toml`, falling back
    /// to defaults when the file does not exist.
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                self.base_dir.display()
            )
        })?;

        let config_path = self.base_dir.join("config.toml");
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunking.max_length == 0 {
            return Err(ConfigError::InvalidChunkLength(self.chunking.max_length));
        }

        if self.chunking.overlap >= self.chunking.max_length {
            return Err(ConfigError::InvalidChunkOverlap {
                overlap: self.chunking.overlap,
                max_length: self.chunking.max_length,
            });
        }

        if self.retrieval.top_k == 0 || self.retrieval.top_k > 50 {
            return Err(ConfigError::InvalidTopK(self.retrieval.top_k));
        }

        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(ConfigError::InvalidTemperature(self.generation.temperature));
        }

        self.ollama.validate()
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.url()
    }

    /// Directory holding the persisted LanceDB tables.
    #[inline]
    pub fn vectors_path(&self) -> PathBuf {
        self.base_dir.join("vectors")
    }

    /// Path of the index manifest recording the build fingerprint.
    #[inline]
    pub fn manifest_path(&self) -> PathBuf {
        self.base_dir.join("manifest.json")
    }
}

impl OllamaConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.embed_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embed_model.clone()));
        }

        if self.generate_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.generate_model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if self.embedding_dimension < 64 || self.embedding_dimension > 4096 {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        self.url()?;

        Ok(())
    }

    #[inline]
    pub fn url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }
}
