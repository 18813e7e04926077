//! Multi-strategy retrieval over an embedded chunk corpus.
//!
//! ```text
//!                      ┌─────────────────────────┐
//! query ──────────────►│      ChunkRetriever     │
//!                      └───────────┬─────────────┘
//!        semantic ── embed + vector search + threshold
//!        hierarchical ── query hints ──► filter fetch, (level, position) order
//!        hybrid ── 70% semantic + 30% hierarchical, weighted rerank
//!        contextual ── semantic hits ± neighbor chunks via stored links
//!        keyword ── literal/keyword match, exact phrase first
//! ```
//!
//! All strategies share deduplication, similarity filtering, and metadata
//! aggregation. A store failure degrades to an empty, valid outcome rather
//! than propagating a partial result.

mod query;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::chunking::{ChunkType, DocumentChunk};
use crate::embeddings::{Embedder, EmbeddingProvider, HashEmbeddingProvider};
use crate::stores::{ChunkFilter, VectorStore};
use crate::types::ChunkError;

pub use query::{HintParser, QueryHints, keyword_terms};

/// Retrieval strategy selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    Semantic,
    Hierarchical,
    Hybrid,
    Contextual,
    Keyword,
}

impl std::fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RetrievalStrategy::Semantic => "semantic",
            RetrievalStrategy::Hierarchical => "hierarchical",
            RetrievalStrategy::Hybrid => "hybrid",
            RetrievalStrategy::Contextual => "contextual",
            RetrievalStrategy::Keyword => "keyword",
        };
        write!(f, "{name}")
    }
}

/// Per-request retrieval options.
#[derive(Clone, Debug)]
pub struct RetrievalOptions {
    pub top_k: usize,
    /// Semantic hits below this similarity are dropped.
    pub similarity_threshold: f32,
    pub document_id: Option<String>,
    pub chunk_type: Option<ChunkType>,
    pub hierarchy_level: Option<usize>,
    /// Neighbor chunks fetched on each side by the contextual strategy.
    pub context_window: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            similarity_threshold: 0.5,
            document_id: None,
            chunk_type: None,
            hierarchy_level: None,
            context_window: 1,
        }
    }
}

impl RetrievalOptions {
    fn filter(&self) -> ChunkFilter {
        ChunkFilter {
            document_id: self.document_id.clone(),
            chunk_type: self.chunk_type,
            hierarchy_level: self.hierarchy_level,
            heading_path_contains: None,
        }
    }
}

/// One retrieved chunk plus transient, retrieval-time data.
///
/// Similarity and attached context live here, never on the stored chunk.
#[derive(Clone, Debug)]
pub struct RetrievedChunk {
    pub chunk: DocumentChunk,
    /// Cosine similarity to the query, for strategies that compute one.
    pub similarity: Option<f32>,
    /// Neighboring chunks attached by the contextual strategy.
    pub context: Vec<DocumentChunk>,
}

impl RetrievedChunk {
    fn plain(chunk: DocumentChunk) -> Self {
        Self {
            chunk,
            similarity: None,
            context: Vec::new(),
        }
    }
}

/// Aggregated coverage of a retrieval result.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RetrievalMetadata {
    /// Distinct documents covered, in result order.
    pub documents: Vec<String>,
    /// Distinct heading paths covered, joined with " > ".
    pub heading_paths: Vec<String>,
    /// Distinct hierarchy levels touched, ascending.
    pub hierarchy_levels: Vec<usize>,
    /// Mean similarity over the hits that carry one; 0.0 otherwise.
    pub mean_similarity: f32,
}

/// Result of one retrieval call.
#[derive(Clone, Debug)]
pub struct RetrievalOutcome {
    pub chunks: Vec<RetrievedChunk>,
    pub total_found: usize,
    pub strategy: RetrievalStrategy,
    pub processing_time_ms: u64,
    pub metadata: RetrievalMetadata,
}

/// One entry of a reconstructed table of contents.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TocEntry {
    pub chunk_id: Uuid,
    pub title: String,
    pub level: usize,
    pub position: usize,
    pub children: Vec<TocEntry>,
}

/// Multi-strategy retriever over a [`VectorStore`].
pub struct ChunkRetriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<Embedder>,
    hints: HintParser,
}

impl std::fmt::Debug for ChunkRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkRetriever")
            .field("embedder", &self.embedder)
            .finish()
    }
}

impl ChunkRetriever {
    pub fn builder() -> ChunkRetrieverBuilder {
        ChunkRetrieverBuilder::default()
    }

    /// Runs one retrieval strategy.
    ///
    /// Store failures degrade to an empty outcome with valid (empty)
    /// metadata; they are logged, not propagated.
    pub async fn retrieve(
        &self,
        query: &str,
        strategy: RetrievalStrategy,
        options: RetrievalOptions,
    ) -> RetrievalOutcome {
        let started = Instant::now();
        let result = match strategy {
            RetrievalStrategy::Semantic => self.semantic(query, &options).await,
            RetrievalStrategy::Hierarchical => self.hierarchical(query, &options).await,
            RetrievalStrategy::Hybrid => self.hybrid(query, &options).await,
            RetrievalStrategy::Contextual => self.contextual(query, &options).await,
            RetrievalStrategy::Keyword => self.keyword(query, &options).await,
        };
        let chunks = match result {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!(%strategy, error = %err, "retrieval degraded to empty result");
                Vec::new()
            }
        };
        RetrievalOutcome {
            total_found: chunks.len(),
            metadata: aggregate_metadata(&chunks),
            chunks,
            strategy,
            processing_time_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Embed the query, search the store, drop hits under the threshold.
    async fn semantic(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievedChunk>, ChunkError> {
        let (vector, _) = self.embedder.embed_one(query).await;
        let scored = self
            .store
            .query(&vector, options.top_k, &options.filter())
            .await?;
        Ok(scored
            .into_iter()
            .filter(|s| s.similarity >= options.similarity_threshold)
            .map(|s| RetrievedChunk {
                similarity: Some(s.similarity),
                chunk: s.chunk,
                context: Vec::new(),
            })
            .collect())
    }

    /// Fetch by parsed level/heading-path cues, ordered by (level, position).
    async fn hierarchical(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievedChunk>, ChunkError> {
        let hints = self.hints.parse(query);
        let mut found: Vec<DocumentChunk> = Vec::new();

        if let Some(level) = hints.level.or(options.hierarchy_level) {
            let filter = ChunkFilter {
                hierarchy_level: Some(level),
                document_id: options.document_id.clone(),
                ..ChunkFilter::default()
            };
            found.extend(self.store.get_by_filter(&filter).await?);
        }
        let terms = if hints.section_terms.is_empty() && hints.level.is_none() {
            // No structural cues: match query words against heading paths.
            keyword_terms(query)
        } else {
            hints.section_terms.clone()
        };
        for term in &terms {
            let filter = ChunkFilter {
                heading_path_contains: Some(term.clone()),
                document_id: options.document_id.clone(),
                ..ChunkFilter::default()
            };
            found.extend(self.store.get_by_filter(&filter).await?);
        }

        let mut unique = dedupe_chunks(found);
        unique.sort_by(|a, b| {
            a.hierarchy_level
                .cmp(&b.hierarchy_level)
                .then_with(|| a.position.cmp(&b.position))
        });
        unique.truncate(options.top_k);
        Ok(unique.into_iter().map(RetrievedChunk::plain).collect())
    }

    /// 70% semantic, 30% hierarchical, merged and reranked by weighted score.
    async fn hybrid(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievedChunk>, ChunkError> {
        let semantic_share = RetrievalOptions {
            top_k: ((options.top_k as f32) * 0.7).ceil() as usize,
            ..options.clone()
        };
        let hierarchical_share = RetrievalOptions {
            top_k: ((options.top_k as f32) * 0.3).ceil() as usize,
            ..options.clone()
        };

        let mut merged = self.semantic(query, &semantic_share).await?;
        for hit in self.hierarchical(query, &hierarchical_share).await? {
            if !merged.iter().any(|m| m.chunk.id == hit.chunk.id) {
                merged.push(hit);
            }
        }

        merged.sort_by(|a, b| {
            let score_a = hybrid_score(a);
            let score_b = hybrid_score(b);
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.position.cmp(&b.chunk.position))
        });
        merged.truncate(options.top_k);
        Ok(merged)
    }

    /// Semantic hits, each with its stored-order neighbors attached.
    async fn contextual(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievedChunk>, ChunkError> {
        let mut hits = self.semantic(query, options).await?;
        for hit in &mut hits {
            hit.context = self
                .neighbors(&hit.chunk, options.context_window)
                .await?;
        }
        Ok(hits)
    }

    /// Literal and keyword matching, exact phrase matches first.
    async fn keyword(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievedChunk>, ChunkError> {
        let terms = keyword_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let query_lower = query.trim().to_lowercase();
        let candidates = self.store.get_by_filter(&options.filter()).await?;

        let mut scored: Vec<(f32, DocumentChunk)> = candidates
            .into_iter()
            .filter_map(|chunk| {
                let score = query::keyword_score(&chunk, &query_lower, &terms);
                (score > 0.0).then_some((score, chunk))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.position.cmp(&b.1.position))
        });
        scored.truncate(options.top_k);
        Ok(scored
            .into_iter()
            .map(|(_, chunk)| RetrievedChunk::plain(chunk))
            .collect())
    }

    /// Walks stored prev/next links `window` steps in each direction.
    async fn neighbors(
        &self,
        chunk: &DocumentChunk,
        window: usize,
    ) -> Result<Vec<DocumentChunk>, ChunkError> {
        let mut context = Vec::new();
        let mut cursor = chunk.previous_chunk_id;
        for _ in 0..window {
            match cursor {
                Some(id) => match self.store.get_by_id(id).await? {
                    Some(neighbor) => {
                        cursor = neighbor.previous_chunk_id;
                        context.push(neighbor);
                    }
                    None => break,
                },
                None => break,
            }
        }
        context.reverse();
        let mut cursor = chunk.next_chunk_id;
        for _ in 0..window {
            match cursor {
                Some(id) => match self.store.get_by_id(id).await? {
                    Some(neighbor) => {
                        cursor = neighbor.next_chunk_id;
                        context.push(neighbor);
                    }
                    None => break,
                },
                None => break,
            }
        }
        Ok(context)
    }

    /// Reconstructs a table of contents for one document by nesting the
    /// distinct heading paths its chunks cover under their ancestors.
    pub async fn browse_by_structure(
        &self,
        document_id: &str,
    ) -> Result<Vec<TocEntry>, ChunkError> {
        let all = self
            .store
            .get_by_filter(&ChunkFilter::for_document(document_id))
            .await?;

        // One entry per distinct section path, keyed to the first chunk that
        // covers it. Standalone heading chunks name their section via their
        // own first content line; everything else is located by its path.
        let mut seen_paths: Vec<Vec<String>> = Vec::new();
        let mut flat: Vec<TocEntry> = Vec::new();
        for chunk in &all {
            let mut path = chunk.heading_path.clone();
            if chunk.chunk_type == ChunkType::Heading {
                let title = chunk.content.lines().next().unwrap_or_default().trim();
                if !title.is_empty() {
                    path.push(title.to_string());
                }
            }
            if path.is_empty() || seen_paths.contains(&path) {
                continue;
            }
            flat.push(TocEntry {
                chunk_id: chunk.id,
                title: path.last().cloned().unwrap_or_default(),
                level: path.len(),
                position: chunk.position,
                children: Vec::new(),
            });
            seen_paths.push(path);
        }

        let mut roots: Vec<TocEntry> = Vec::new();
        let mut stack: Vec<TocEntry> = Vec::new();
        for entry in flat {
            loop {
                match stack.pop() {
                    Some(done) if done.level >= entry.level => match stack.last_mut() {
                        Some(parent) => parent.children.push(done),
                        None => roots.push(done),
                    },
                    Some(open) => {
                        stack.push(open);
                        break;
                    }
                    None => break,
                }
            }
            stack.push(entry);
        }
        while let Some(done) = stack.pop() {
            match stack.last_mut() {
                Some(parent) => parent.children.push(done),
                None => roots.push(done),
            }
        }
        Ok(roots)
    }

    /// Sibling, parent/child, and semantically similar chunks for one chunk,
    /// deduplicated and excluding the source.
    pub async fn related_chunks(
        &self,
        chunk_id: Uuid,
        limit: usize,
    ) -> Result<Vec<DocumentChunk>, ChunkError> {
        let Some(chunk) = self.store.get_by_id(chunk_id).await? else {
            return Ok(Vec::new());
        };

        let mut related: Vec<DocumentChunk> = Vec::new();
        for id in chunk.sibling_ids.iter().chain(&chunk.child_ids).take(limit * 2) {
            if let Some(found) = self.store.get_by_id(*id).await? {
                related.push(found);
            }
        }

        // Parent: the section-owning chunk that lists this one as a child.
        let document = self
            .store
            .get_by_filter(&ChunkFilter::for_document(&chunk.document_id))
            .await?;
        related.extend(
            document
                .into_iter()
                .filter(|c| c.child_ids.contains(&chunk_id)),
        );

        if let Some(vector) = &chunk.embedding {
            let similar = self
                .store
                .query(vector, limit, &ChunkFilter::default())
                .await?;
            related.extend(similar.into_iter().map(|s| s.chunk));
        }

        let mut unique: Vec<DocumentChunk> = dedupe_chunks(related)
            .into_iter()
            .filter(|c| c.id != chunk_id)
            .collect();
        unique.truncate(limit);
        Ok(unique)
    }
}

fn hybrid_score(hit: &RetrievedChunk) -> f32 {
    0.7 * hit.similarity.unwrap_or(0.0) + query::structural_bonus(&hit.chunk)
}

fn dedupe_chunks(chunks: Vec<DocumentChunk>) -> Vec<DocumentChunk> {
    let mut seen = std::collections::HashSet::new();
    chunks
        .into_iter()
        .filter(|c| seen.insert(c.id))
        .collect()
}

fn aggregate_metadata(chunks: &[RetrievedChunk]) -> RetrievalMetadata {
    let mut documents = Vec::new();
    let mut heading_paths = Vec::new();
    let mut hierarchy_levels = Vec::new();
    let mut similarity_total = 0.0f32;
    let mut similarity_count = 0usize;

    for hit in chunks {
        if !documents.contains(&hit.chunk.document_id) {
            documents.push(hit.chunk.document_id.clone());
        }
        let path = hit.chunk.heading_path.join(" > ");
        if !path.is_empty() && !heading_paths.contains(&path) {
            heading_paths.push(path);
        }
        if !hierarchy_levels.contains(&hit.chunk.hierarchy_level) {
            hierarchy_levels.push(hit.chunk.hierarchy_level);
        }
        if let Some(similarity) = hit.similarity {
            similarity_total += similarity;
            similarity_count += 1;
        }
    }
    hierarchy_levels.sort_unstable();

    RetrievalMetadata {
        documents,
        heading_paths,
        hierarchy_levels,
        mean_similarity: if similarity_count == 0 {
            0.0
        } else {
            similarity_total / similarity_count as f32
        },
    }
}

/// Builder for [`ChunkRetriever`].
#[derive(Default)]
pub struct ChunkRetrieverBuilder {
    store: Option<Arc<dyn VectorStore>>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    embedder: Option<Arc<Embedder>>,
}

impl ChunkRetrieverBuilder {
    /// Vector store holding the chunk corpus. Required.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Embedding collaborator for query vectors; defaults to the hash
    /// provider.
    #[must_use]
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Shares an embedder (and its cache) with the chunking service so query
    /// and corpus vectors agree.
    #[must_use]
    pub fn embedder_arc(mut self, embedder: Arc<Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Builds the retriever.
    ///
    /// # Panics
    ///
    /// Panics if [`store()`](Self::store) was not called.
    pub fn build(self) -> ChunkRetriever {
        let embedder = self.embedder.unwrap_or_else(|| {
            let provider = self
                .provider
                .unwrap_or_else(|| Arc::new(HashEmbeddingProvider::default()));
            Arc::new(Embedder::new(provider))
        });
        ChunkRetriever {
            store: self.store.expect("ChunkRetrieverBuilder requires a store"),
            embedder,
            hints: HintParser::new(),
        }
    }
}
