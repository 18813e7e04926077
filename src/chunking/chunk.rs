//! Chunk data model: the unit of retrieval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::config::ChunkerConfig;
use crate::structure::NodeType;

/// Content classification for a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Heading,
    Paragraph,
    List,
    Table,
    Code,
    Text,
    /// Result of merging chunks with differing content.
    Mixed,
}

impl From<NodeType> for ChunkType {
    fn from(node_type: NodeType) -> Self {
        match node_type {
            NodeType::Heading => ChunkType::Heading,
            NodeType::Paragraph => ChunkType::Paragraph,
            NodeType::List => ChunkType::List,
            NodeType::Table => ChunkType::Table,
            NodeType::Code => ChunkType::Code,
            NodeType::Text => ChunkType::Text,
        }
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChunkType::Heading => "heading",
            ChunkType::Paragraph => "paragraph",
            ChunkType::List => "list",
            ChunkType::Table => "table",
            ChunkType::Code => "code",
            ChunkType::Text => "text",
            ChunkType::Mixed => "mixed",
        };
        write!(f, "{name}")
    }
}

/// Immutable origin metadata stamped onto every chunk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkProvenance {
    /// Id of the source file this chunk came from.
    pub source_id: String,
    /// Human-readable source name.
    pub source_name: String,
    /// Chunking method identifier.
    pub chunking_method: String,
    pub created_at: DateTime<Utc>,
}

/// A retrieval-sized span of document text with structural and semantic
/// metadata.
///
/// Chunks are created by the chunker and never mutated after the overlap and
/// relationship passes complete. Retrieval-time data (similarity scores,
/// attached context) lives on wrapper types, never here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: Uuid,
    pub document_id: String,
    pub content: String,
    /// Token count of the chunk content (heading-context prefixes and
    /// overlap text are context, not counted content).
    pub tokens: usize,
    /// Zero-based position of this chunk within the document.
    pub position: usize,
    /// Ancestor heading titles, outermost first.
    pub heading_path: Vec<String>,
    pub hierarchy_level: usize,
    pub chunk_type: ChunkType,
    /// Coherence of the semantic segments this chunk spans, in `[0, 1]`.
    pub semantic_density: f32,
    pub topic_keywords: Vec<String>,
    /// Trailing text of this chunk duplicated into the next chunk's context.
    pub overlap_text: Option<String>,
    pub has_overlap_previous: bool,
    pub has_overlap_next: bool,
    pub previous_chunk_id: Option<Uuid>,
    pub next_chunk_id: Option<Uuid>,
    /// Chunks at the same hierarchy level within the document.
    pub sibling_ids: Vec<Uuid>,
    /// Chunks belonging to the section this chunk's heading opens.
    pub child_ids: Vec<Uuid>,
    /// Embedding attached at ingestion time, if computed.
    pub embedding: Option<Vec<f32>>,
    pub provenance: ChunkProvenance,
}

/// Aggregate quality metrics for one chunking run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChunkingStats {
    pub total_chunks: usize,
    pub total_tokens: usize,
    pub average_chunk_size: f32,
    /// Fraction of adjacent chunk pairs that received an overlap.
    pub overlap_efficiency: f32,
    /// Mean chunk-level semantic density.
    pub semantic_coherence: f32,
    /// Fraction of adjacent chunk pairs whose heading paths share a prefix.
    pub hierarchy_preservation: f32,
}

/// The chunk set and quality metrics produced by a chunking run.
#[derive(Clone, Debug, Default)]
pub struct ChunkingOutcome {
    pub chunks: Vec<DocumentChunk>,
    pub stats: ChunkingStats,
    /// A fallback path ran; results are usable but of reduced quality.
    pub degraded: bool,
}

/// Operational measurements for one chunking run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChunkTelemetry {
    pub embedder: String,
    pub tokenizer: String,
    pub duration_ms: u64,
    pub fallback_used: bool,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub chunk_count: usize,
    pub average_tokens: f32,
}

/// Input to [`HierarchicalChunker::chunk_document`](super::HierarchicalChunker::chunk_document).
#[derive(Clone, Debug)]
pub struct ChunkDocumentRequest {
    /// Raw extracted document text.
    pub text: String,
    /// Id of the owning document.
    pub document_id: String,
    /// Id of the source file the text was extracted from.
    pub source_id: String,
    /// Human-readable source name.
    pub source_name: String,
    /// Per-request configuration override.
    pub config: Option<ChunkerConfig>,
}

impl ChunkDocumentRequest {
    pub fn new(text: impl Into<String>, document_id: impl Into<String>) -> Self {
        let document_id = document_id.into();
        Self {
            text: text.into(),
            source_id: document_id.clone(),
            source_name: document_id.clone(),
            document_id,
            config: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source_id: impl Into<String>, source_name: impl Into<String>) -> Self {
        self.source_id = source_id.into();
        self.source_name = source_name.into();
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: ChunkerConfig) -> Self {
        self.config = Some(config);
        self
    }
}

/// Chunking result paired with its telemetry.
#[derive(Clone, Debug)]
pub struct ChunkDocumentResponse {
    pub outcome: ChunkingOutcome,
    pub telemetry: ChunkTelemetry,
}
