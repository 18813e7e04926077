//! Embedding collaborator boundary.
//!
//! The chunking and retrieval pipelines never talk to an embedding service
//! directly; they go through [`Embedder`], which batches requests in strict
//! positional order, caches by content hash, and degrades to deterministic
//! hash-derived vectors when the provider fails. Analysis degrades, it does
//! not fail.
//!
//! ```text
//! texts ──► cache lookup ──► pending batches ──► EmbeddingProvider
//!                                   │                  │ error / bad dims
//!                                   │                  ▼
//!                                   └────────── HashEmbeddingProvider
//! ```

mod cache;
mod hash;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::types::ChunkError;

pub use cache::EmbeddingCache;
pub use hash::HashEmbeddingProvider;

/// An external service that turns text into unit-normalized vectors.
///
/// Implementations must preserve input order: the vector at index `i` of the
/// result always corresponds to `texts[i]`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name, surfaced through telemetry.
    fn name(&self) -> &str;

    /// Fixed dimension of every vector this provider returns.
    fn dimensions(&self) -> usize;

    /// Largest batch the provider accepts per call.
    fn max_batch_size(&self) -> usize {
        64
    }

    /// Embeds a batch of texts, order-preserving.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ChunkError>;
}

/// Result of an ordered embedding pass.
#[derive(Clone, Debug)]
pub struct EmbedOutcome {
    /// One vector per input text, in input order.
    pub vectors: Vec<Vec<f32>>,
    /// `true` when any batch fell back to hash-derived vectors.
    pub fallback_used: bool,
}

/// Order-preserving, cached, fallback-capable embedding front end.
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    fallback: HashEmbeddingProvider,
    cache: EmbeddingCache,
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("provider", &self.provider.name())
            .field("dimensions", &self.provider.dimensions())
            .finish()
    }
}

impl Embedder {
    /// Wraps a provider with caching and a dimension-matched hash fallback.
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        let fallback = HashEmbeddingProvider::new(provider.dimensions());
        Self {
            provider,
            fallback,
            cache: EmbeddingCache::new(),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache.hits()
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache.misses()
    }

    /// Embeds `texts`, returning one vector per input in input order.
    ///
    /// Cached texts skip the provider. Uncached texts are batched up to the
    /// provider's limit; a batch that errors or returns wrong-dimension
    /// vectors is replaced wholesale by hash-derived vectors for exactly its
    /// texts, so the positional mapping stays intact.
    pub async fn embed_ordered(&self, texts: &[String]) -> EmbedOutcome {
        let mut vectors: Vec<Option<Vec<f32>>> =
            texts.iter().map(|t| self.cache.get(t)).collect();
        let pending: Vec<usize> = vectors
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.is_none().then_some(i))
            .collect();

        let mut fallback_used = false;
        let batch_size = self.provider.max_batch_size().max(1);

        for batch in pending.chunks(batch_size) {
            let batch_texts: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
            let produced = match self.provider.embed_batch(&batch_texts).await {
                Ok(raw) => match validate_batch(raw, batch_texts.len(), self.dimensions()) {
                    Ok(vs) => vs,
                    Err(err) => {
                        warn!(error = %err, "embedding batch rejected, using hash fallback");
                        fallback_used = true;
                        batch_texts.iter().map(|t| self.fallback.embed_one(t)).collect()
                    }
                },
                Err(err) => {
                    warn!(error = %err, "embedding provider unavailable, using hash fallback");
                    fallback_used = true;
                    batch_texts.iter().map(|t| self.fallback.embed_one(t)).collect()
                }
            };
            for (&i, mut vector) in batch.iter().zip(produced) {
                l2_normalize(&mut vector);
                self.cache.insert(&texts[i], vector.clone());
                vectors[i] = Some(vector);
            }
        }

        EmbedOutcome {
            vectors: vectors
                .into_iter()
                .map(|v| v.unwrap_or_default())
                .collect(),
            fallback_used,
        }
    }

    /// Embeds a single text. Convenience wrapper over [`embed_ordered`](Self::embed_ordered).
    pub async fn embed_one(&self, text: &str) -> (Vec<f32>, bool) {
        let mut outcome = self.embed_ordered(&[text.to_string()]).await;
        (outcome.vectors.remove(0), outcome.fallback_used)
    }
}

/// Checks count and dimensions of a provider response.
fn validate_batch(
    vectors: Vec<Vec<f32>>,
    expected_count: usize,
    expected_dims: usize,
) -> Result<Vec<Vec<f32>>, ChunkError> {
    if vectors.len() != expected_count {
        return Err(ChunkError::Embedding(format!(
            "provider returned {} vectors for {} texts",
            vectors.len(),
            expected_count
        )));
    }
    for vector in &vectors {
        if vector.len() != expected_dims {
            return Err(ChunkError::DimensionMismatch {
                expected: expected_dims,
                actual: vector.len(),
            });
        }
    }
    Ok(vectors)
}

fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine similarity clamped into `[0, 1]`.
///
/// Zero-norm input yields 0 rather than dividing by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Provider that always errors, for exercising the fallback path.
    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }
        fn dimensions(&self) -> usize {
            16
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ChunkError> {
            Err(ChunkError::Embedding("service unreachable".into()))
        }
    }

    /// Provider that returns vectors of the wrong length.
    struct WrongDimsProvider;

    #[async_trait]
    impl EmbeddingProvider for WrongDimsProvider {
        fn name(&self) -> &str {
            "wrong-dims"
        }
        fn dimensions(&self) -> usize {
            16
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ChunkError> {
            Ok(texts.iter().map(|_| vec![0.5; 3]).collect())
        }
    }

    #[tokio::test]
    async fn failing_provider_degrades_to_fallback() {
        let embedder = Embedder::new(Arc::new(FailingProvider));
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let outcome = embedder.embed_ordered(&texts).await;
        assert!(outcome.fallback_used);
        assert_eq!(outcome.vectors.len(), 2);
        assert!(outcome.vectors.iter().all(|v| v.len() == 16));
    }

    #[tokio::test]
    async fn dimension_mismatch_is_absorbed_by_fallback() {
        let embedder = Embedder::new(Arc::new(WrongDimsProvider));
        let (vector, fallback) = embedder.embed_one("text").await;
        assert!(fallback);
        assert_eq!(vector.len(), 16);
    }

    #[tokio::test]
    async fn second_pass_hits_cache() {
        let embedder = Embedder::new(Arc::new(HashEmbeddingProvider::new(8)));
        let texts = vec!["repeated".to_string()];
        embedder.embed_ordered(&texts).await;
        let misses_before = embedder.cache_misses();
        embedder.embed_ordered(&texts).await;
        assert_eq!(embedder.cache_misses(), misses_before);
        assert!(embedder.cache_hits() >= 1);
    }

    #[tokio::test]
    async fn order_matches_inputs() {
        let embedder = Embedder::new(Arc::new(HashEmbeddingProvider::new(8)));
        let provider = HashEmbeddingProvider::new(8);
        let texts: Vec<String> = (0..10).map(|i| format!("text number {i}")).collect();
        let outcome = embedder.embed_ordered(&texts).await;
        for (text, vector) in texts.iter().zip(&outcome.vectors) {
            assert_eq!(vector, &provider.embed_one(text));
        }
    }

    #[test]
    fn cosine_similarity_is_bounded_and_zero_safe() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        let same = cosine_similarity(&[0.6, 0.8], &[0.6, 0.8]);
        assert!((same - 1.0).abs() < 1e-6);
        let opposite = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert_eq!(opposite, 0.0);
    }
}
