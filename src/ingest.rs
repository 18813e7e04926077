//! Glue for turning chunking output into a persisted, embedded corpus.

use tracing::{debug, warn};

use crate::chunking::{
    ChunkDocumentRequest, ChunkTelemetry, ChunkingStats, HierarchicalChunker,
};
use crate::stores::VectorStore;
use crate::types::ChunkError;

/// Summary of one document ingestion.
#[derive(Clone, Debug)]
pub struct IngestReport {
    pub chunks_stored: usize,
    pub stats: ChunkingStats,
    pub telemetry: ChunkTelemetry,
    /// A fallback path ran somewhere in the pipeline; the corpus is usable
    /// but should be surfaced as processed with reduced quality.
    pub degraded: bool,
}

/// Chunks a document, embeds the chunks, and upserts them into the store.
///
/// Embedding order follows chunk order exactly, so vectors and chunks cannot
/// be paired off-by-one. Only configuration and storage errors surface;
/// embedding trouble degrades to fallback vectors.
pub async fn ingest_document(
    chunker: &HierarchicalChunker,
    store: &dyn VectorStore,
    request: ChunkDocumentRequest,
) -> Result<IngestReport, ChunkError> {
    let response = chunker.chunk_document(request).await?;
    let mut outcome = response.outcome;

    if outcome.chunks.is_empty() {
        return Ok(IngestReport {
            chunks_stored: 0,
            stats: outcome.stats,
            telemetry: response.telemetry,
            degraded: outcome.degraded,
        });
    }

    let texts: Vec<String> = outcome.chunks.iter().map(|c| c.content.clone()).collect();
    let embedder = chunker.embedder();
    let embedded = embedder.embed_ordered(&texts).await;
    if embedded.fallback_used {
        warn!("ingestion used fallback embeddings");
    }
    for (chunk, vector) in outcome.chunks.iter_mut().zip(embedded.vectors) {
        chunk.embedding = Some(vector);
    }

    store.upsert(&outcome.chunks).await?;
    debug!(chunks = outcome.chunks.len(), "ingestion stored chunk batch");

    Ok(IngestReport {
        chunks_stored: outcome.chunks.len(),
        stats: outcome.stats,
        telemetry: response.telemetry,
        degraded: outcome.degraded || embedded.fallback_used,
    })
}
