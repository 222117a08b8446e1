//! Configuration loading and management.
//!
//! engramdb reads configuration from `~/.engramdb/config.toml` (if present)
//! with environment variable overrides (`ENGRAMDB_DATA_DIR`,
//! `ENGRAMDB_LOG_LEVEL`, `ENGRAMDB_EMBEDDING_API_KEY`). All fields have
//! sensible defaults — no configuration file is required.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level configuration, deserialized from `config.toml`.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Process logging.
    pub log_level: String,
    /// On-disk data directory and WAL durability mode.
    pub storage: StorageConfig,
    pub wal: WalConfig,
    /// Async write-back cache overlay.
    pub async_writes: AsyncWritesConfig,
    /// Embedder collaborator parameters and worker tuning.
    pub embedding: EmbeddingConfig,
    pub auto_embed: AutoEmbedConfig,
    /// Decay recalculation sweep.
    pub decay: DecayConfig,
    /// Inference-engine-driven auto-link generation.
    pub auto_links: AutoLinksConfig,
    /// Query parallelism.
    pub parallel: ParallelConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// On-disk directory; empty string means in-memory only.
    pub data_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WalConfig {
    /// `"sync"` (flush every record) or `"batch"` (default).
    pub mode: String,
    /// Segment rotation threshold, in bytes.
    pub segment_size: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AsyncWritesConfig {
    pub enabled: bool,
    /// Flusher wake interval, in milliseconds.
    pub flush_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedder provider identifier, passed through opaquely.
    pub provider: String,
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
    /// Worker: how often the periodic ticker wakes, in seconds.
    pub scan_interval_secs: u64,
    /// Worker: delay between processing successive candidates, in milliseconds.
    pub inter_node_delay_ms: u64,
    pub max_retries: u32,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AutoEmbedConfig {
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DecayConfig {
    pub enabled: bool,
    pub recalculate_interval_secs: u64,
    pub archive_threshold: f32,
    /// Half-life, in seconds, of the exponential decay-score falloff.
    pub half_life_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AutoLinksConfig {
    pub enabled: bool,
    pub similarity_threshold: f32,
    pub co_access_window_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ParallelConfig {
    pub enabled: bool,
    pub max_workers: usize,
    pub min_batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            storage: StorageConfig::default(),
            wal: WalConfig::default(),
            async_writes: AsyncWritesConfig::default(),
            embedding: EmbeddingConfig::default(),
            auto_embed: AutoEmbedConfig::default(),
            decay: DecayConfig::default(),
            auto_links: AutoLinksConfig::default(),
            parallel: ParallelConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = default_engramdb_dir()
            .join("data")
            .to_string_lossy()
            .into_owned();
        Self { data_dir }
    }
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            mode: "batch".into(),
            segment_size: 64 * 1024 * 1024,
        }
    }
}

impl Default for AsyncWritesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            flush_interval_ms: 50,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".into(),
            api_url: String::new(),
            api_key: String::new(),
            model: "test-embedder".into(),
            dimensions: 4,
            scan_interval_secs: 15 * 60,
            inter_node_delay_ms: 0,
            max_retries: 3,
            chunk_size: 1000,
            chunk_overlap: 100,
        }
    }
}

impl Default for AutoEmbedConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recalculate_interval_secs: 3600,
            archive_threshold: 0.05,
            half_life_secs: 7 * 24 * 3600,
        }
    }
}

impl Default for AutoLinksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.82,
            co_access_window_secs: 300,
        }
    }
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_workers: 4,
            min_batch_size: 16,
        }
    }
}

/// Returns `~/.engramdb/`
pub fn default_engramdb_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".engramdb")
}

/// Returns the default config file path: `~/.engramdb/config.toml`
pub fn default_config_path() -> PathBuf {
    default_engramdb_dir().join("config.toml")
}

impl Config {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_with(|key| std::env::var(key));
    }

    fn apply_env_overrides_with(&mut self, env: impl Fn(&str) -> Result<String, std::env::VarError>) {
        if let Ok(val) = env("ENGRAMDB_DATA_DIR") {
            self.storage.data_dir = val;
        }
        if let Ok(val) = env("ENGRAMDB_LOG_LEVEL") {
            self.log_level = val;
        }
        if let Ok(val) = env("ENGRAMDB_EMBEDDING_API_KEY") {
            self.embedding.api_key = val;
        }
        if let Ok(val) = env("ENGRAMDB_EMBEDDING_API_URL") {
            self.embedding.api_url = val;
        }
    }

    /// Resolve the data directory, expanding `~` if needed. `None` when
    /// `data_dir` is empty, meaning in-memory only.
    pub fn resolved_data_dir(&self) -> Option<PathBuf> {
        if self.storage.data_dir.is_empty() {
            None
        } else {
            Some(expand_tilde(&self.storage.data_dir))
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.wal.mode, "batch");
        assert_eq!(config.auto_links.similarity_threshold, 0.82);
        assert!(config.storage.data_dir.ends_with(".engramdb/data") || config.storage.data_dir.ends_with("data"));
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
log_level = "debug"

[storage]
data_dir = "/tmp/engramdb-test"

[embedding]
dimensions = 768
chunk_size = 500
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.storage.data_dir, "/tmp/engramdb-test");
        assert_eq!(config.embedding.dimensions, 768);
        assert_eq!(config.embedding.chunk_size, 500);
        // defaults still apply for unset fields
        assert_eq!(config.auto_links.similarity_threshold, 0.82);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        let env = |key: &str| match key {
            "ENGRAMDB_DATA_DIR" => Ok("/tmp/override".into()),
            "ENGRAMDB_LOG_LEVEL" => Ok("trace".into()),
            "ENGRAMDB_EMBEDDING_API_KEY" => Ok("secret".into()),
            _ => Err(std::env::VarError::NotPresent),
        };

        config.apply_env_overrides_with(env);

        assert_eq!(config.storage.data_dir, "/tmp/override");
        assert_eq!(config.log_level, "trace");
        assert_eq!(config.embedding.api_key, "secret");
    }

    #[test]
    fn empty_data_dir_means_in_memory() {
        let mut config = Config::default();
        config.storage.data_dir = String::new();
        assert!(config.resolved_data_dir().is_none());
    }
}
