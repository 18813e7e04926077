//! Hierarchy-aware semantic chunking and multi-strategy retrieval.
//!
//! ```text
//! raw text ──► structure::StructureParser ──► DocumentStructure
//!                                                  │
//!              boundaries::BoundaryDetector ◄──────┤
//!                       │                          │
//!                       ▼                          ▼
//!              chunking::HierarchicalChunker (tree walk, grouping, overlap)
//!                       │
//!                       ├─► embeddings / tokenizer helpers
//!                       ▼
//!              ingest::ingest_document ──► stores::VectorStore
//!                                                  │
//!              retrieval::ChunkRetriever ◄─────────┘
//!              (semantic, hierarchical, hybrid, contextual, keyword)
//! ```
//!
//! The pipeline is built to degrade rather than fail: malformed markup
//! parses as paragraphs, embedding outages fall back to deterministic local
//! vectors, and store failures surface as empty retrieval results. The only
//! caller-visible rejection is an invalid [`chunking::ChunkerConfig`].

pub mod boundaries;
pub mod chunking;
pub mod embeddings;
pub mod ingest;
pub mod retrieval;
pub mod stores;
pub mod structure;
pub mod tokenizer;
pub mod types;

pub use boundaries::{BoundaryAnalysis, BoundaryDetector, BoundaryDetectorConfig};
pub use chunking::{
    ChunkDocumentRequest, ChunkDocumentResponse, ChunkType, ChunkerConfig, ChunkingOutcome,
    DocumentChunk, HierarchicalChunker,
};
pub use embeddings::{Embedder, EmbeddingProvider, HashEmbeddingProvider};
pub use ingest::ingest_document;
pub use retrieval::{ChunkRetriever, RetrievalOptions, RetrievalOutcome, RetrievalStrategy};
pub use stores::{ChunkFilter, InMemoryChunkStore, VectorStore};
pub use structure::{DocumentStructure, StructureParser};
pub use types::ChunkError;
