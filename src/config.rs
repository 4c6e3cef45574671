//! Configuration management for covermatch
//!
//! Provides TOML-based configuration with defaults and validation.
//! Location: ~/.covermatch/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::{Result, SearchError};
use crate::providers::local::DEFAULT_LOCAL_MODEL;
use crate::providers::ollama::{DEFAULT_EMBEDDING_MODEL, DEFAULT_MODEL, DEFAULT_OLLAMA_URL};
use crate::search::PipelineConfig;

/// Directory under the home directory holding the config file
pub const CONFIG_DIR: &str = ".covermatch";

/// Config file name
pub const CONFIG_FILE: &str = "config.toml";

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ollama: OllamaConfig,
    pub qdrant: QdrantConfig,
    pub embedding: EmbeddingConfig,
    pub pipeline: PipelineConfig,
}

/// Ollama connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub url: String,
    pub model: String,
    pub embedding_model: String,
}

/// Qdrant connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantConfig {
    pub url: String,
    pub collection: String,
}

/// Which embedder serves query embeddings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Ollama `/api/embeddings`
    Ollama,
    /// In-process BERT model
    Local,
}

/// Embedding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    /// Hugging Face model id for the local backend
    pub local_model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_OLLAMA_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:6334".to_string(),
            collection: "plan_documents".to_string(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Ollama,
            local_model: DEFAULT_LOCAL_MODEL.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file or use defaults
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            Self::load_from_file(&config_path)
        } else {
            Self::load_default()
        }
    }

    /// Load configuration from specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SearchError::Config(format!("Failed to read config: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| SearchError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from the standard location, or built-in defaults when absent
    pub fn load_default() -> Result<Self> {
        if let Some(config_path) = Self::default_path() {
            if config_path.exists() {
                return Self::load_from_file(&config_path);
            }
        }

        Ok(Config::default())
    }

    /// Standard config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [("ollama.url", &self.ollama.url), ("qdrant.url", &self.qdrant.url)] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(SearchError::Config(format!(
                    "{} must start with http:// or https://",
                    name
                )));
            }
        }

        if self.ollama.model.trim().is_empty() {
            return Err(SearchError::Config("ollama.model must not be empty".to_string()));
        }

        if self.qdrant.collection.trim().is_empty() {
            return Err(SearchError::Config(
                "qdrant.collection must not be empty".to_string(),
            ));
        }

        match self.embedding.backend {
            EmbeddingBackend::Ollama if self.ollama.embedding_model.trim().is_empty() => {
                return Err(SearchError::Config(
                    "ollama.embedding_model must not be empty".to_string(),
                ));
            }
            EmbeddingBackend::Local if self.embedding.local_model.trim().is_empty() => {
                return Err(SearchError::Config(
                    "embedding.local_model must not be empty".to_string(),
                ));
            }
            _ => {}
        }

        self.pipeline.validate()
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| SearchError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SearchError::Config(format!("Failed to create config dir: {}", e)))?;
        }

        std::fs::write(path, contents)
            .map_err(|e| SearchError::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::retrieval::EntityMatch;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.embedding.backend, EmbeddingBackend::Ollama);
        assert_eq!(config.pipeline.fusion.k, 60);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let mut config = Config::default();
        config.qdrant.collection = "brokers".to_string();
        config.pipeline.retrieval.entity_match = EntityMatch::Boost(0.25);
        config.pipeline.rewrite.max_rewrites = 1;
        config.save(&path).unwrap();

        let loaded = Config::load(Some(path)).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            "[qdrant]\ncollection = \"plans\"\n\n[pipeline.fusion]\nk = 30\n",
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.qdrant.collection, "plans");
        assert_eq!(config.qdrant.url, QdrantConfig::default().url);
        assert_eq!(config.pipeline.fusion.k, 30);
        assert_eq!(config.pipeline.fusion.top_k, 15);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.ollama.url = "localhost:11434".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.embedding.backend = EmbeddingBackend::Local;
        config.embedding.local_model = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.embedding_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[qdrant\n").unwrap();

        assert!(matches!(
            Config::load_from_file(&path),
            Err(SearchError::Config(_))
        ));
    }
}
