//! Hierarchy-aware semantic chunking.
//!
//! ```text
//! raw text ──► structure::parse ──► boundaries::analyze ──► adaptive sizing
//!                                                               │
//!                    bottom-up tree walk (tree.rs) ◄────────────┘
//!                            │
//!                    sibling grouping pass
//!                            │
//!                    overlap injection (overlap.rs)
//!                            │
//!                    relationships + quality metrics ──► ChunkingOutcome
//! ```
//!
//! The pipeline degrades instead of failing: malformed structure parses as
//! paragraphs, embedding outages fall back to deterministic vectors (flagged
//! through [`ChunkingOutcome::degraded`]), and a single malformed node never
//! aborts the run. The one caller-visible rejection is an invalid
//! [`ChunkerConfig`], checked at entry.

mod chunk;
mod config;
mod overlap;
mod tree;

use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashMap;
use tracing::debug;
use uuid::Uuid;

use crate::boundaries::{BoundaryAnalysis, BoundaryDetector, BoundaryDetectorConfig, extract_keywords};
use crate::embeddings::{Embedder, EmbeddingProvider, HashEmbeddingProvider};
use crate::structure::StructureParser;
use crate::tokenizer::TokenCounter;
use crate::types::ChunkError;

pub use chunk::{
    ChunkDocumentRequest, ChunkDocumentResponse, ChunkProvenance, ChunkTelemetry, ChunkType,
    ChunkingOutcome, ChunkingStats, DocumentChunk,
};
pub use config::ChunkerConfig;

use tree::ChunkDraft;

/// Boundary strength above which a merge across the boundary is vetoed.
const STRONG_BOUNDARY_VETO: f32 = 0.8;

/// Method identifier stamped into chunk provenance.
const CHUNKING_METHOD: &str = "hierarchical-semantic";

/// The chunking service: parse, analyze, walk, group, overlap, relate.
///
/// Construct through [`builder()`](Self::builder). The service holds no
/// per-document state; independent documents can be chunked concurrently
/// from the same instance.
pub struct HierarchicalChunker {
    config: ChunkerConfig,
    boundary_config: BoundaryDetectorConfig,
    embedder: Arc<Embedder>,
    parser: StructureParser,
    counter: TokenCounter,
}

impl std::fmt::Debug for HierarchicalChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchicalChunker")
            .field("config", &self.config)
            .field("embedder", &self.embedder)
            .finish()
    }
}

impl Default for HierarchicalChunker {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl HierarchicalChunker {
    pub fn builder() -> HierarchicalChunkerBuilder {
        HierarchicalChunkerBuilder::default()
    }

    /// Shared embedder, for reuse by retrieval over the same corpus.
    pub fn embedder(&self) -> Arc<Embedder> {
        Arc::clone(&self.embedder)
    }

    /// Chunks one document into a size-bounded, overlap-linked chunk set.
    ///
    /// Fails fast on invalid configuration; every other degradation is
    /// absorbed and surfaced through [`ChunkingOutcome::degraded`] and the
    /// telemetry. Empty input produces an empty, valid outcome.
    pub async fn chunk_document(
        &self,
        request: ChunkDocumentRequest,
    ) -> Result<ChunkDocumentResponse, ChunkError> {
        let config = request.config.clone().unwrap_or_else(|| self.config.clone());
        config.validate()?;

        let started = Instant::now();
        let hits_before = self.embedder.cache_hits();
        let misses_before = self.embedder.cache_misses();

        if request.text.trim().is_empty() {
            return Ok(ChunkDocumentResponse {
                outcome: ChunkingOutcome::default(),
                telemetry: self.telemetry(started, hits_before, misses_before, false, &[]),
            });
        }

        let structure = self.parser.parse(&request.text);
        let detector = BoundaryDetector::new(self.boundary_config.clone());
        let analysis = detector.analyze(&structure, &self.embedder).await;

        let total_tokens: usize = structure
            .nodes()
            .iter()
            .map(|n| self.counter.count(&n.content))
            .sum();
        let config = config.adaptive_for(total_tokens);
        debug!(
            document = %request.document_id,
            nodes = structure.len(),
            total_tokens,
            "chunking document"
        );

        let tree = tree::build_tree(&structure, &self.counter);
        let drafts = tree::chunk_tree(&tree, &structure, &config, &self.counter);
        let mut drafts = group_pass(drafts, &analysis, &config);
        overlap::inject_overlap(&mut drafts, &config, &self.counter);

        let chunks = finalize(drafts, &analysis, &config, &request);
        let stats = compute_stats(&chunks);
        debug!(
            document = %request.document_id,
            chunks = chunks.len(),
            degraded = analysis.fallback_used,
            "chunking complete"
        );

        let telemetry = self.telemetry(
            started,
            hits_before,
            misses_before,
            analysis.fallback_used,
            &chunks,
        );
        Ok(ChunkDocumentResponse {
            outcome: ChunkingOutcome {
                chunks,
                stats,
                degraded: analysis.fallback_used,
            },
            telemetry,
        })
    }

    fn telemetry(
        &self,
        started: Instant,
        hits_before: u64,
        misses_before: u64,
        fallback_used: bool,
        chunks: &[DocumentChunk],
    ) -> ChunkTelemetry {
        let total: usize = chunks.iter().map(|c| c.tokens).sum();
        ChunkTelemetry {
            embedder: self.embedder.provider_name().to_string(),
            tokenizer: self.counter.backend_name().to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            fallback_used,
            cache_hits: self.embedder.cache_hits() - hits_before,
            cache_misses: self.embedder.cache_misses() - misses_before,
            chunk_count: chunks.len(),
            average_tokens: if chunks.is_empty() {
                0.0
            } else {
                total as f32 / chunks.len() as f32
            },
        }
    }
}

/// Builder for [`HierarchicalChunker`].
#[derive(Default)]
pub struct HierarchicalChunkerBuilder {
    config: Option<ChunkerConfig>,
    boundary_config: Option<BoundaryDetectorConfig>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    embedder: Option<Arc<Embedder>>,
}

impl HierarchicalChunkerBuilder {
    /// Default chunk size configuration for requests without an override.
    #[must_use]
    pub fn config(mut self, config: ChunkerConfig) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn boundary_config(mut self, config: BoundaryDetectorConfig) -> Self {
        self.boundary_config = Some(config);
        self
    }

    /// Embedding collaborator; defaults to the deterministic hash provider.
    #[must_use]
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Shares an existing embedder (and its cache) across services.
    #[must_use]
    pub fn embedder_arc(mut self, embedder: Arc<Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn build(self) -> HierarchicalChunker {
        let embedder = self.embedder.unwrap_or_else(|| {
            let provider = self
                .provider
                .unwrap_or_else(|| Arc::new(HashEmbeddingProvider::default()));
            Arc::new(Embedder::new(provider))
        });
        HierarchicalChunker {
            config: self.config.unwrap_or_default(),
            boundary_config: self.boundary_config.unwrap_or_default(),
            embedder,
            parser: StructureParser::new(),
            counter: TokenCounter::new(),
        }
    }
}

/// Merges adjacent sibling drafts under the size, relatedness, and boundary
/// rules.
fn group_pass(
    drafts: Vec<ChunkDraft>,
    analysis: &BoundaryAnalysis,
    config: &ChunkerConfig,
) -> Vec<ChunkDraft> {
    let mut out: Vec<ChunkDraft> = Vec::with_capacity(drafts.len());
    for draft in drafts {
        match out.pop() {
            Some(prev) if can_merge(&prev, &draft, analysis, config) => {
                out.push(merge_grouped(prev, draft));
            }
            Some(prev) => {
                out.push(prev);
                out.push(draft);
            }
            None => out.push(draft),
        }
    }
    out
}

fn can_merge(
    a: &ChunkDraft,
    b: &ChunkDraft,
    analysis: &BoundaryAnalysis,
    config: &ChunkerConfig,
) -> bool {
    if a.tokens + b.tokens > config.max_chunk_tokens {
        return false;
    }
    let undersized = a.tokens < config.min_chunk_tokens || b.tokens < config.min_chunk_tokens;
    let both_code = a.chunk_type == ChunkType::Code && b.chunk_type == ChunkType::Code;
    let related = (a.chunk_type == ChunkType::Heading && b.chunk_type != ChunkType::Heading)
        || (a.level == b.level && a.level != 0);
    if !(undersized || both_code || related) {
        return false;
    }
    if config.respect_semantic_boundaries
        && analysis.max_strength_between(a.end_position, b.start_position) > STRONG_BOUNDARY_VETO
    {
        return false;
    }
    if config.respect_section_boundaries && crosses_section(a, b) {
        return false;
    }
    true
}

/// A merge crosses a section boundary when the later draft opens a new
/// heading, or when neither heading path contains the other.
fn crosses_section(a: &ChunkDraft, b: &ChunkDraft) -> bool {
    if b.starts_with_heading {
        return true;
    }
    !(is_path_prefix(&a.heading_path, &b.heading_path)
        || is_path_prefix(&b.heading_path, &a.heading_path))
}

fn is_path_prefix(prefix: &[String], path: &[String]) -> bool {
    prefix.len() <= path.len() && prefix.iter().zip(path).all(|(a, b)| a == b)
}

/// Grouping-pass merge: concatenates content, sums tokens, unions keywords,
/// averages density, and marks the result mixed.
fn merge_grouped(mut a: ChunkDraft, b: ChunkDraft) -> ChunkDraft {
    a.content.push_str("\n\n");
    a.content.push_str(&b.content);
    a.tokens += b.tokens;
    a.end_position = b.end_position;
    a.keywords = tree::union_keywords(&a.keywords, &b.keywords);
    a.semantic_density = (a.semantic_density + b.semantic_density) / 2.0;
    a.chunk_type = ChunkType::Mixed;
    if a.heading_node.is_none() {
        a.heading_node = b.heading_node;
    }
    a
}

/// Turns drafts into finished chunks: ids, provenance, heading context,
/// densities, and the prev/next/sibling/child relationship pass.
fn finalize(
    drafts: Vec<ChunkDraft>,
    analysis: &BoundaryAnalysis,
    config: &ChunkerConfig,
    request: &ChunkDocumentRequest,
) -> Vec<DocumentChunk> {
    let created_at = chrono::Utc::now();
    let mut chunks: Vec<DocumentChunk> = drafts
        .iter()
        .enumerate()
        .map(|(i, draft)| {
            let content = if config.include_heading_context
                && !draft.heading_path.is_empty()
                && !draft.starts_with_heading
            {
                format!("{}\n\n{}", draft.heading_path.join(" > "), draft.content)
            } else {
                draft.content.clone()
            };
            let topic_keywords = if draft.keywords.is_empty() {
                extract_keywords(&draft.content, 5)
            } else {
                draft.keywords.clone()
            };
            DocumentChunk {
                id: Uuid::new_v4(),
                document_id: request.document_id.clone(),
                content,
                tokens: draft.tokens,
                position: i,
                heading_path: draft.heading_path.clone(),
                hierarchy_level: draft.level,
                chunk_type: draft.chunk_type,
                semantic_density: analysis
                    .coherence_over(draft.start_position, draft.end_position),
                topic_keywords,
                overlap_text: draft.overlap_text.clone(),
                has_overlap_previous: draft.has_overlap_previous,
                has_overlap_next: draft.has_overlap_next,
                previous_chunk_id: None,
                next_chunk_id: None,
                sibling_ids: Vec::new(),
                child_ids: Vec::new(),
                embedding: None,
                provenance: ChunkProvenance {
                    source_id: request.source_id.clone(),
                    source_name: request.source_name.clone(),
                    chunking_method: CHUNKING_METHOD.to_string(),
                    created_at,
                },
            }
        })
        .collect();

    // Document-order links.
    let ids: Vec<Uuid> = chunks.iter().map(|c| c.id).collect();
    for (i, chunk) in chunks.iter_mut().enumerate() {
        if i > 0 {
            chunk.previous_chunk_id = Some(ids[i - 1]);
        }
        if i + 1 < ids.len() {
            chunk.next_chunk_id = Some(ids[i + 1]);
        }
    }

    // Siblings: equal hierarchy level, self excluded.
    let mut by_level: FxHashMap<usize, Vec<Uuid>> = FxHashMap::default();
    for chunk in &chunks {
        by_level.entry(chunk.hierarchy_level).or_default().push(chunk.id);
    }
    for chunk in &mut chunks {
        chunk.sibling_ids = by_level[&chunk.hierarchy_level]
            .iter()
            .copied()
            .filter(|id| *id != chunk.id)
            .collect();
    }

    // Children: chunks whose owning section heading lives in another chunk.
    let owners: FxHashMap<Uuid, usize> = drafts
        .iter()
        .enumerate()
        .filter_map(|(i, d)| d.heading_node.map(|h| (h, i)))
        .collect();
    for (i, draft) in drafts.iter().enumerate() {
        if let Some(section) = draft.section {
            if let Some(&owner) = owners.get(&section) {
                if owner != i {
                    let child_id = ids[i];
                    chunks[owner].child_ids.push(child_id);
                }
            }
        }
    }

    chunks
}

fn compute_stats(chunks: &[DocumentChunk]) -> ChunkingStats {
    if chunks.is_empty() {
        return ChunkingStats::default();
    }
    let total_tokens: usize = chunks.iter().map(|c| c.tokens).sum();
    let pairs = chunks.len().saturating_sub(1);

    let (overlap_efficiency, hierarchy_preservation) = if pairs == 0 {
        (1.0, 1.0)
    } else {
        let overlapped = chunks[..chunks.len() - 1]
            .iter()
            .filter(|c| c.has_overlap_next)
            .count();
        let preserved = chunks
            .windows(2)
            .filter(|pair| shares_path_prefix(&pair[0], &pair[1]))
            .count();
        (
            overlapped as f32 / pairs as f32,
            preserved as f32 / pairs as f32,
        )
    };

    ChunkingStats {
        total_chunks: chunks.len(),
        total_tokens,
        average_chunk_size: total_tokens as f32 / chunks.len() as f32,
        overlap_efficiency,
        semantic_coherence: chunks.iter().map(|c| c.semantic_density).sum::<f32>()
            / chunks.len() as f32,
        hierarchy_preservation,
    }
}

/// Adjacent chunks preserve hierarchy when their paths agree on the first
/// element; two root-level chunks count trivially.
fn shares_path_prefix(a: &DocumentChunk, b: &DocumentChunk) -> bool {
    match (a.heading_path.first(), b.heading_path.first()) {
        (Some(x), Some(y)) => x == y,
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: &str) -> ChunkDocumentRequest {
        ChunkDocumentRequest::new(text, "doc-1").with_source("file-1", "handbook.md")
    }

    fn chunker() -> HierarchicalChunker {
        HierarchicalChunker::builder().build()
    }

    #[tokio::test]
    async fn empty_document_yields_empty_outcome() {
        let response = chunker().chunk_document(request("")).await.unwrap();
        assert!(response.outcome.chunks.is_empty());
        assert_eq!(response.outcome.stats.total_chunks, 0);
        assert_eq!(response.outcome.stats.total_tokens, 0);
        assert_eq!(response.telemetry.chunk_count, 0);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_at_entry() {
        let bad = ChunkerConfig {
            min_chunk_tokens: 900,
            target_chunk_tokens: 400,
            max_chunk_tokens: 800,
            ..ChunkerConfig::default()
        };
        let result = chunker()
            .chunk_document(request("some text").with_config(bad))
            .await;
        assert!(matches!(result, Err(ChunkError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn section_boundaries_keep_sections_apart() {
        let response = chunker()
            .chunk_document(request("# A\npara1.\n\n# B\npara2.\n"))
            .await
            .unwrap();
        let chunks = &response.outcome.chunks;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].content.contains("para1"));
        assert!(!chunks[0].content.contains("para2"));
        assert!(chunks[1].content.contains("para2"));
        assert!(!chunks[1].content.contains("para1"));
    }

    #[tokio::test]
    async fn consecutive_list_items_form_one_list_chunk() {
        let text = "- first item\n- second item\n- third item\n- fourth item\n- fifth item\n";
        let config = ChunkerConfig {
            min_chunk_tokens: 50,
            ..ChunkerConfig::default()
        };
        let response = chunker()
            .chunk_document(request(text).with_config(config))
            .await
            .unwrap();
        let chunks = &response.outcome.chunks;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, ChunkType::List);
        assert_eq!(chunks[0].content.matches("- ").count(), 5);
    }

    #[tokio::test]
    async fn provenance_is_stamped_on_every_chunk() {
        let response = chunker()
            .chunk_document(request("# T\nsome content for the section\n"))
            .await
            .unwrap();
        for chunk in &response.outcome.chunks {
            assert_eq!(chunk.provenance.source_id, "file-1");
            assert_eq!(chunk.provenance.source_name, "handbook.md");
            assert_eq!(chunk.provenance.chunking_method, CHUNKING_METHOD);
            assert_eq!(chunk.document_id, "doc-1");
        }
    }

    #[tokio::test]
    async fn relationships_link_document_order() {
        let text = "# A\nfirst section content with words\n\n# B\nsecond section content \
                    with words\n\n# C\nthird section content with words\n";
        let response = chunker().chunk_document(request(text)).await.unwrap();
        let chunks = &response.outcome.chunks;
        assert!(chunks.len() >= 2);
        assert!(chunks[0].previous_chunk_id.is_none());
        assert!(chunks[chunks.len() - 1].next_chunk_id.is_none());
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].next_chunk_id, Some(pair[1].id));
            assert_eq!(pair[1].previous_chunk_id, Some(pair[0].id));
        }
        // Same-level chunks list each other as siblings.
        for chunk in chunks {
            for sibling in &chunk.sibling_ids {
                let other = chunks.iter().find(|c| c.id == *sibling).unwrap();
                assert_eq!(other.hierarchy_level, chunk.hierarchy_level);
            }
        }
    }

    #[tokio::test]
    async fn rechunking_identical_text_is_idempotent() {
        let text = "# Guide\nintro paragraph with a fair amount of words in it.\n\n\
                    ## Part One\ncontent for part one goes here with details.\n\n\
                    ## Part Two\ncontent for part two goes here with details.\n";
        let service = chunker();
        let first = service.chunk_document(request(text)).await.unwrap();
        let second = service.chunk_document(request(text)).await.unwrap();

        let mut a: Vec<(String, usize)> = first
            .outcome
            .chunks
            .iter()
            .map(|c| (c.content.clone(), c.tokens))
            .collect();
        let mut b: Vec<(String, usize)> = second
            .outcome
            .chunks
            .iter()
            .map(|c| (c.content.clone(), c.tokens))
            .collect();
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn stats_are_within_bounds() {
        let text = "# One\nalpha content with enough words to matter for sizing.\n\n\
                    # Two\nbeta content with enough words to matter for sizing.\n";
        let response = chunker().chunk_document(request(text)).await.unwrap();
        let stats = &response.outcome.stats;
        assert!((0.0..=1.0).contains(&stats.overlap_efficiency));
        assert!((0.0..=1.0).contains(&stats.semantic_coherence));
        assert!((0.0..=1.0).contains(&stats.hierarchy_preservation));
        assert_eq!(stats.total_chunks, response.outcome.chunks.len());
    }

    #[test]
    fn merge_sets_mixed_type_and_averages_density() {
        let a = ChunkDraft {
            content: "heading text".into(),
            tokens: 3,
            start_position: 0,
            end_position: 0,
            heading_path: vec![],
            level: 1,
            chunk_type: ChunkType::Heading,
            keywords: vec!["heading".into()],
            section: None,
            heading_node: None,
            starts_with_heading: true,
            semantic_density: 1.0,
            overlap_text: None,
            has_overlap_previous: false,
            has_overlap_next: false,
        };
        let b = ChunkDraft {
            content: "body text".into(),
            tokens: 2,
            chunk_type: ChunkType::Paragraph,
            keywords: vec!["body".into()],
            semantic_density: 0.5,
            starts_with_heading: false,
            ..a.clone()
        };
        let merged = merge_grouped(a, b);
        assert_eq!(merged.chunk_type, ChunkType::Mixed);
        assert_eq!(merged.tokens, 5);
        assert!((merged.semantic_density - 0.75).abs() < 1e-6);
        assert!(merged.keywords.contains(&"heading".to_string()));
        assert!(merged.keywords.contains(&"body".to_string()));
    }

    #[test]
    fn path_prefix_rules() {
        let a = vec!["A".to_string()];
        let ab = vec!["A".to_string(), "B".to_string()];
        let c = vec!["C".to_string()];
        assert!(is_path_prefix(&a, &ab));
        assert!(is_path_prefix(&[], &a));
        assert!(!is_path_prefix(&ab, &a));
        assert!(!is_path_prefix(&a, &c));
    }
}
