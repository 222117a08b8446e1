#![allow(dead_code)]

use std::sync::Arc;

use engramdb::config::Config;
use engramdb::db::Db;
use engramdb::embedding::{EmbedError, EmbedResult, Embedder};
use tempfile::TempDir;

/// A config with a fresh on-disk data directory, async writes disabled
/// (scenario 5 turns them on explicitly), and decay disabled so sweeps don't
/// interfere with assertions made shortly after `open`.
pub fn test_config(dimensions: usize) -> (Config, TempDir) {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.data_dir = tmp.path().to_string_lossy().into_owned();
    config.async_writes.enabled = false;
    config.decay.enabled = false;
    config.embedding.dimensions = dimensions;
    config.embedding.scan_interval_secs = 3600;
    (config, tmp)
}

/// An in-memory config (no data directory) for tests that don't need to
/// survive a close/reopen cycle.
pub fn in_memory_config(dimensions: usize) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = String::new();
    config.async_writes.enabled = false;
    config.decay.enabled = false;
    config.embedding.dimensions = dimensions;
    config.embedding.scan_interval_secs = 3600;
    config
}

/// Opens a ready database with the given config.
pub fn open(config: Config) -> Arc<Db> {
    Db::open(config, false).unwrap()
}

/// An embedder that returns the same fixed vector for every non-empty
/// input, so end-to-end assertions can check an exact resulting vector
/// instead of a hash-derived one.
pub struct ConstantEmbedder {
    vector: Vec<f32>,
}

impl ConstantEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        ConstantEmbedder { vector }
    }
}

impl Embedder for ConstantEmbedder {
    fn embed_one(&self, text: &str) -> EmbedResult<Vec<f32>> {
        if text.is_empty() {
            return Err(EmbedError::Permanent("empty input".into()));
        }
        Ok(self.vector.clone())
    }

    fn model_name(&self) -> &str {
        "constant-test-embedder"
    }

    fn dimensions(&self) -> usize {
        self.vector.len()
    }
}

/// An embedder that assigns each chunk a distinct one-hot vector, in the
/// order chunks are submitted — used to check that file chunking produces
/// genuinely distinct per-chunk vectors rather than one repeated vector.
pub struct SequentialEmbedder {
    dimensions: usize,
}

impl SequentialEmbedder {
    pub fn new(dimensions: usize) -> Self {
        SequentialEmbedder { dimensions }
    }
}

impl Embedder for SequentialEmbedder {
    fn embed_one(&self, text: &str) -> EmbedResult<Vec<f32>> {
        if text.is_empty() {
            return Err(EmbedError::Permanent("empty input".into()));
        }
        let mut vector = vec![0f32; self.dimensions];
        let slot = (text.len() + text.bytes().map(|b| b as usize).sum::<usize>()) % self.dimensions;
        vector[slot] = 1.0;
        Ok(vector)
    }

    fn embed_batch(&self, texts: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                if t.is_empty() {
                    return Err(EmbedError::Permanent("empty input".into()));
                }
                let mut vector = vec![0f32; self.dimensions];
                vector[i % self.dimensions] = 1.0;
                Ok(vector)
            })
            .collect()
    }

    fn model_name(&self) -> &str {
        "sequential-test-embedder"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
