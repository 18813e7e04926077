//! Deterministic hash-derived embeddings.

use std::hash::Hasher;

use async_trait::async_trait;
use rustc_hash::FxHasher;

use super::EmbeddingProvider;
use crate::types::ChunkError;

/// Embedding provider that derives unit-normalized vectors from a content
/// hash.
///
/// Identical text always produces the identical vector, which makes this
/// provider suitable both as the local fallback when the real embedding
/// collaborator is unavailable and as a deterministic test double.
#[derive(Clone, Debug)]
pub struct HashEmbeddingProvider {
    dimensions: usize,
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSIONS)
    }
}

impl HashEmbeddingProvider {
    pub const DEFAULT_DIMENSIONS: usize = 64;

    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Computes the vector for one text synchronously.
    ///
    /// Each component mixes the content hash with its index; the result is
    /// L2-normalized so cosine math downstream stays within bounds.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut hasher = FxHasher::default();
        hasher.write(text.as_bytes());
        let seed = hasher.finish();

        let mut vector: Vec<f32> = (0..self.dimensions)
            .map(|i| {
                let bits = seed.rotate_left((i % 64) as u32) ^ ((i as u64).wrapping_mul(0x9E37_79B9));
                // Map into [-1, 1] so directions vary.
                (bits as f64 / u64::MAX as f64 * 2.0 - 1.0) as f32
            })
            .collect();

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    fn name(&self) -> &str {
        "hash-fallback"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ChunkError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
