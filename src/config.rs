//! Configuration for agentmem

use std::path::PathBuf;
use std::str::FromStr;

use crate::embedding::model_dimensions;
use crate::error::{Error, Result};

/// Configuration for the memory system
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for all storage
    pub data_dir: PathBuf,

    /// Embedding model name, resolved by `FastEmbedder`
    pub embedding_model: String,

    /// Embedding dimensions (384 for all-MiniLM-L6-v2)
    pub embedding_dimensions: usize,

    /// Number of texts sent to the model per inference call
    pub embed_batch_size: usize,

    /// Default number of search hits
    pub default_top_k: usize,

    /// Minimum cosine similarity for a search hit (-1.0 - 1.0)
    pub similarity_threshold: f64,

    /// HTTP server bind address
    pub server_host: String,

    /// HTTP server port
    pub server_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("agentmem");

        Self {
            data_dir,
            embedding_model: "all-MiniLM-L6-v2".to_string(),
            embedding_dimensions: 384,
            embed_batch_size: 32,
            default_top_k: 10,
            similarity_threshold: 0.3,
            server_host: "127.0.0.1".to_string(),
            server_port: 8000,
        }
    }
}

impl Config {
    /// Create a new config with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Build the default config and overlay `AGENTMEM_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = lookup("AGENTMEM_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(model) = lookup("AGENTMEM_EMBEDDING_MODEL") {
            if let Some(dimensions) = model_dimensions(&model) {
                config.embedding_dimensions = dimensions;
            }
            config.embedding_model = model;
        }
        if let Some(dimensions) = lookup("AGENTMEM_EMBEDDING_DIMENSIONS") {
            config.embedding_dimensions = parse_var("AGENTMEM_EMBEDDING_DIMENSIONS", &dimensions)?;
        }
        if let Some(host) = lookup("AGENTMEM_HOST") {
            config.server_host = host;
        }
        if let Some(port) = lookup("AGENTMEM_PORT") {
            config.server_port = parse_var("AGENTMEM_PORT", &port)?;
        }
        if let Some(threshold) = lookup("AGENTMEM_SIMILARITY_THRESHOLD") {
            config.similarity_threshold = parse_var("AGENTMEM_SIMILARITY_THRESHOLD", &threshold)?;
        }
        if let Some(batch) = lookup("AGENTMEM_BATCH_SIZE") {
            config.embed_batch_size = parse_var("AGENTMEM_BATCH_SIZE", &batch)?;
        }
        if let Some(top_k) = lookup("AGENTMEM_TOP_K") {
            config.default_top_k = parse_var("AGENTMEM_TOP_K", &top_k)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the numeric settings are usable
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dimensions == 0 {
            return Err(Error::config("embedding_dimensions must be positive"));
        }
        if self.embed_batch_size == 0 {
            return Err(Error::config("embed_batch_size must be positive"));
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(Error::config(format!(
                "similarity_threshold must be within [-1, 1], got {}",
                self.similarity_threshold
            )));
        }
        Ok(())
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("agentmem.db")
    }

    /// Get the address the HTTP server binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::config(format!("{key}={value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_minilm() {
        let config = Config::default();
        assert_eq!(config.embedding_dimensions, 384);
        assert_eq!(config.similarity_threshold, 0.3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = Config::from_lookup(lookup(&[
            ("AGENTMEM_DATA_DIR", "/tmp/agentmem-test"),
            ("AGENTMEM_PORT", "9100"),
            ("AGENTMEM_SIMILARITY_THRESHOLD", "0.5"),
        ]))
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/agentmem-test"));
        assert_eq!(config.server_port, 9100);
        assert_eq!(config.similarity_threshold, 0.5);
        assert_eq!(config.sqlite_path(), PathBuf::from("/tmp/agentmem-test/agentmem.db"));
    }

    #[test]
    fn model_override_brings_its_dimensions() {
        let config =
            Config::from_lookup(lookup(&[("AGENTMEM_EMBEDDING_MODEL", "bge-base-en-v1.5")]))
                .unwrap();
        assert_eq!(config.embedding_model, "bge-base-en-v1.5");
        assert_eq!(config.embedding_dimensions, 768);

        let config = Config::from_lookup(lookup(&[
            ("AGENTMEM_EMBEDDING_MODEL", "custom-model"),
            ("AGENTMEM_EMBEDDING_DIMENSIONS", "512"),
            ("AGENTMEM_TOP_K", "25"),
        ]))
        .unwrap();
        assert_eq!(config.embedding_dimensions, 512);
        assert_eq!(config.default_top_k, 25);
    }

    #[test]
    fn malformed_env_value_is_config_error() {
        let err = Config::from_lookup(lookup(&[("AGENTMEM_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let err = Config::from_lookup(lookup(&[("AGENTMEM_SIMILARITY_THRESHOLD", "1.5")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
