//! The embedder interface the core consumes, plus a deterministic test
//! double. A real model-backed implementation is explicitly out of scope:
//! only the capability boundary ships here.

pub mod worker;

use thiserror::Error;

/// The error kinds an embedder call can surface. Distinguished so the
/// embedding worker can decide whether to retry.
#[derive(Debug, Error, Clone)]
pub enum EmbedError {
    #[error("transient embedder failure: {0}")]
    Transient(String),
    #[error("permanent embedder failure: {0}")]
    Permanent(String),
    #[error("embedder returned {got} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl EmbedError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbedError::Transient(_))
    }
}

pub type EmbedResult<T> = std::result::Result<T, EmbedError>;

/// A synchronous capability that turns text into dense vectors. Treated as
/// opaque by the core; expected to be thread-safe since it is shared by the
/// embedding worker, the inference engine, and search query-embedding.
pub trait Embedder: Send + Sync {
    fn embed_one(&self, text: &str) -> EmbedResult<Vec<f32>>;

    /// Implementations may override for batched inference; the default
    /// embeds one at a time.
    fn embed_batch(&self, texts: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed_one(t)).collect()
    }

    fn model_name(&self) -> &str;
    fn dimensions(&self) -> usize;
}

/// A deterministic embedder for tests and for environments with no real
/// model configured: hashes each text into a fixed-dimension vector so
/// identical inputs always produce identical output, without pulling in an
/// inference runtime.
pub struct DeterministicEmbedder {
    model_name: String,
    dimensions: usize,
}

impl DeterministicEmbedder {
    pub fn new(dimensions: usize) -> Self {
        DeterministicEmbedder {
            model_name: "deterministic-test-embedder".into(),
            dimensions,
        }
    }
}

impl Embedder for DeterministicEmbedder {
    fn embed_one(&self, text: &str) -> EmbedResult<Vec<f32>> {
        if text.is_empty() {
            return Err(EmbedError::Permanent("empty input".into()));
        }
        let mut vector = vec![0f32; self.dimensions];
        for (i, byte) in text.bytes().enumerate() {
            let slot = i % self.dimensions;
            vector[slot] += (byte as f32 + 1.0) / 256.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_embedder_is_stable() {
        let embedder = DeterministicEmbedder::new(8);
        let a = embedder.embed_one("hello world").unwrap();
        let b = embedder.embed_one("hello world").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn deterministic_embedder_rejects_empty_text() {
        let embedder = DeterministicEmbedder::new(4);
        assert!(embedder.embed_one("").is_err());
    }

    #[test]
    fn different_text_produces_different_vectors() {
        let embedder = DeterministicEmbedder::new(8);
        let a = embedder.embed_one("alpha").unwrap();
        let b = embedder.embed_one("beta").unwrap();
        assert_ne!(a, b);
    }
}
