//! In-memory chunk store with cosine similarity search.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ChunkFilter, ScoredChunk, VectorStore};
use crate::chunking::DocumentChunk;
use crate::embeddings::cosine_similarity;
use crate::types::ChunkError;

/// HashMap-backed [`VectorStore`].
///
/// Suitable for tests and small corpora; all operations are async-safe
/// behind a `tokio::sync::RwLock`. Doubles as the deterministic substitute
/// for the external vector store in the test suite.
#[derive(Debug, Default)]
pub struct InMemoryChunkStore {
    chunks: RwLock<HashMap<Uuid, DocumentChunk>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryChunkStore {
    async fn upsert(&self, chunks: &[DocumentChunk]) -> Result<(), ChunkError> {
        let mut store = self.chunks.write().await;
        for chunk in chunks {
            store.insert(chunk.id, chunk.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<ScoredChunk>, ChunkError> {
        let store = self.chunks.read().await;
        let mut scored: Vec<ScoredChunk> = store
            .values()
            .filter(|chunk| filter.matches(chunk))
            .filter_map(|chunk| {
                let vector = chunk.embedding.as_ref()?;
                Some(ScoredChunk {
                    similarity: cosine_similarity(vector, embedding),
                    chunk: chunk.clone(),
                })
            })
            .collect();
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.position.cmp(&b.chunk.position))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn get_by_filter(&self, filter: &ChunkFilter) -> Result<Vec<DocumentChunk>, ChunkError> {
        let store = self.chunks.read().await;
        let mut matching: Vec<DocumentChunk> = store
            .values()
            .filter(|chunk| filter.matches(chunk))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.document_id
                .cmp(&b.document_id)
                .then_with(|| a.position.cmp(&b.position))
        });
        Ok(matching)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<DocumentChunk>, ChunkError> {
        Ok(self.chunks.read().await.get(&id).cloned())
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize, ChunkError> {
        let mut store = self.chunks.write().await;
        let before = store.len();
        store.retain(|_, chunk| chunk.document_id != document_id);
        Ok(before - store.len())
    }

    async fn count(&self) -> Result<usize, ChunkError> {
        Ok(self.chunks.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{ChunkProvenance, ChunkType};

    fn sample_chunk(
        document_id: &str,
        position: usize,
        content: &str,
        embedding: Option<Vec<f32>>,
    ) -> DocumentChunk {
        DocumentChunk {
            id: Uuid::new_v4(),
            document_id: document_id.to_string(),
            content: content.to_string(),
            tokens: content.split_whitespace().count(),
            position,
            heading_path: Vec::new(),
            hierarchy_level: 1,
            chunk_type: ChunkType::Paragraph,
            semantic_density: 1.0,
            topic_keywords: Vec::new(),
            overlap_text: None,
            has_overlap_previous: false,
            has_overlap_next: false,
            previous_chunk_id: None,
            next_chunk_id: None,
            sibling_ids: Vec::new(),
            child_ids: Vec::new(),
            embedding,
            provenance: ChunkProvenance {
                source_id: "src".into(),
                source_name: "src.md".into(),
                chunking_method: "test".into(),
                created_at: chrono::Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = InMemoryChunkStore::new();
        let mut chunk = sample_chunk("d", 0, "original", None);
        store.upsert(std::slice::from_ref(&chunk)).await.unwrap();
        chunk.content = "replaced".into();
        store.upsert(std::slice::from_ref(&chunk)).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        let fetched = store.get_by_id(chunk.id).await.unwrap().unwrap();
        assert_eq!(fetched.content, "replaced");
    }

    #[tokio::test]
    async fn query_orders_by_similarity_and_skips_unembedded() {
        let store = InMemoryChunkStore::new();
        let near = sample_chunk("d", 0, "near", Some(vec![1.0, 0.0]));
        let far = sample_chunk("d", 1, "far", Some(vec![0.0, 1.0]));
        let unembedded = sample_chunk("d", 2, "none", None);
        store
            .upsert(&[near.clone(), far, unembedded])
            .await
            .unwrap();

        let results = store
            .query(&[1.0, 0.0], 10, &ChunkFilter::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.id, near.id);
        assert!(results[0].similarity > results[1].similarity);
    }

    #[tokio::test]
    async fn filters_restrict_results() {
        let store = InMemoryChunkStore::new();
        store
            .upsert(&[
                sample_chunk("doc-a", 0, "a0", Some(vec![1.0, 0.0])),
                sample_chunk("doc-b", 0, "b0", Some(vec![1.0, 0.0])),
            ])
            .await
            .unwrap();

        let filtered = store
            .get_by_filter(&ChunkFilter::for_document("doc-a"))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].document_id, "doc-a");

        let queried = store
            .query(&[1.0, 0.0], 10, &ChunkFilter::for_document("doc-b"))
            .await
            .unwrap();
        assert_eq!(queried.len(), 1);
        assert_eq!(queried[0].chunk.document_id, "doc-b");
    }

    #[tokio::test]
    async fn delete_document_removes_only_that_document() {
        let store = InMemoryChunkStore::new();
        store
            .upsert(&[
                sample_chunk("doc-a", 0, "a0", None),
                sample_chunk("doc-a", 1, "a1", None),
                sample_chunk("doc-b", 0, "b0", None),
            ])
            .await
            .unwrap();
        assert_eq!(store.delete_document("doc-a").await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn heading_path_filter_is_substring_based() {
        let store = InMemoryChunkStore::new();
        let mut chunk = sample_chunk("d", 0, "content", None);
        chunk.heading_path = vec!["Privacy".into(), "Consent Records".into()];
        store.upsert(&[chunk]).await.unwrap();

        let filter = ChunkFilter {
            heading_path_contains: Some("consent".into()),
            ..ChunkFilter::default()
        };
        assert_eq!(store.get_by_filter(&filter).await.unwrap().len(), 1);

        let miss = ChunkFilter {
            heading_path_contains: Some("billing".into()),
            ..ChunkFilter::default()
        };
        assert!(store.get_by_filter(&miss).await.unwrap().is_empty());
    }
}
