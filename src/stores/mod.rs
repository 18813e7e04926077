//! Vector-store collaborator boundary.
//!
//! The retriever never talks to a concrete database; it goes through the
//! [`VectorStore`] trait. Two implementations ship with the crate:
//!
//! - [`memory::InMemoryChunkStore`] for tests and small corpora
//! - [`sqlite::SqliteChunkStore`] (feature `sqlite`) for persistent storage
//!   with `sqlite-vec` similarity search
//!
//! Filters support equality on document id, chunk type, and hierarchy level,
//! plus substring containment on the heading path.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chunking::{ChunkType, DocumentChunk};
use crate::types::ChunkError;

pub use memory::InMemoryChunkStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteChunkStore;

/// Metadata filter for store queries.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChunkFilter {
    pub document_id: Option<String>,
    pub chunk_type: Option<ChunkType>,
    pub hierarchy_level: Option<usize>,
    /// Case-insensitive substring match against the joined heading path.
    pub heading_path_contains: Option<String>,
}

impl ChunkFilter {
    pub fn for_document(document_id: impl Into<String>) -> Self {
        Self {
            document_id: Some(document_id.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.document_id.is_none()
            && self.chunk_type.is_none()
            && self.hierarchy_level.is_none()
            && self.heading_path_contains.is_none()
    }

    /// In-process evaluation of the filter, shared by the in-memory store.
    pub fn matches(&self, chunk: &DocumentChunk) -> bool {
        if let Some(document_id) = &self.document_id {
            if &chunk.document_id != document_id {
                return false;
            }
        }
        if let Some(chunk_type) = self.chunk_type {
            if chunk.chunk_type != chunk_type {
                return false;
            }
        }
        if let Some(level) = self.hierarchy_level {
            if chunk.hierarchy_level != level {
                return false;
            }
        }
        if let Some(needle) = &self.heading_path_contains {
            let haystack = chunk.heading_path.join(" > ").to_lowercase();
            if !haystack.contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// A chunk paired with its query similarity. Retrieval-time data stays on
/// this wrapper; the stored chunk is never written back.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub similarity: f32,
}

/// Storage surface for embedded chunk corpora.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserts or replaces chunks by id.
    ///
    /// Chunks without embeddings are stored but will not surface through
    /// similarity queries.
    async fn upsert(&self, chunks: &[DocumentChunk]) -> Result<(), ChunkError>;

    /// Similarity search, most similar first, limited to `top_k`.
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<ScoredChunk>, ChunkError>;

    /// Fetches chunks matching a metadata filter, ordered by document id and
    /// position.
    async fn get_by_filter(&self, filter: &ChunkFilter) -> Result<Vec<DocumentChunk>, ChunkError>;

    /// Fetches one chunk by id.
    async fn get_by_id(&self, id: Uuid) -> Result<Option<DocumentChunk>, ChunkError>;

    /// Removes all chunks of a document, returning how many were deleted.
    async fn delete_document(&self, document_id: &str) -> Result<usize, ChunkError>;

    /// Total number of stored chunks.
    async fn count(&self) -> Result<usize, ChunkError>;
}
