//! Content-hash embedding cache.

use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};

/// Caches embeddings by content hash so repeated texts (heading contexts,
/// re-chunked documents) skip the embedding collaborator entirely.
#[derive(Debug, Default)]
pub struct EmbeddingCache {
    entries: RwLock<FxHashMap<u64, Vec<f32>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(text: &str) -> u64 {
        let mut hasher = FxHasher::default();
        hasher.write(text.as_bytes());
        hasher.finish()
    }

    /// Returns the cached vector for `text`, counting a hit or miss.
    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let found = self.entries.read().get(&Self::key(text)).cloned();
        match &found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn insert(&self, text: &str, vector: Vec<f32>) {
        self.entries.write().insert(Self::key(text), vector);
    }

    /// Total cache hits since construction.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Total cache misses since construction.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
