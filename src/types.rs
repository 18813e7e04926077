//! Crate-wide error type and propagation policy.
//!
//! The chunking pipeline absorbs structural and semantic degradation
//! internally: malformed markup degrades to paragraphs, embedding outages
//! degrade to deterministic fallback vectors, store failures degrade to empty
//! result sets. Only two classes of failure are surfaced to callers:
//!
//! * [`ChunkError::InvalidConfig`] for inverted or out-of-range configuration
//!   bounds, rejected at call entry.
//! * [`ChunkError::DimensionMismatch`] for embeddings whose length disagrees
//!   with the configured dimension. This is raised inside the embedding layer
//!   and substituted by the fallback before it can reach chunking; it only
//!   escapes through APIs that talk to the embedding boundary directly.

use thiserror::Error;

/// Errors produced by chunking, embedding, and retrieval operations.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Configuration bounds are inverted or out of range. Rejected before any
    /// work happens.
    #[error("invalid chunking configuration: {0}")]
    InvalidConfig(String),

    /// The embedding collaborator failed or returned unusable output.
    #[error("embedding provider error: {0}")]
    Embedding(String),

    /// An embedding's length disagrees with the configured dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The vector store rejected or failed an operation.
    #[error("storage backend error: {0}")]
    Storage(String),

    /// A retrieval operation could not be completed.
    #[error("retrieval error: {0}")]
    Retrieval(String),

    /// Filesystem or database I/O failure.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ChunkError {
    fn from(err: std::io::Error) -> Self {
        ChunkError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ChunkError {
    fn from(err: serde_json::Error) -> Self {
        ChunkError::Storage(err.to_string())
    }
}
