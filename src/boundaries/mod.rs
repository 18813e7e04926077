//! Semantic boundary detection.
//!
//! Walks the parsed node sequence, embeds one text unit per node (heading
//! path prefixed for context), and annotates every adjacent pair with a
//! boundary strength derived from how far its similarity falls below the
//! local neighborhood and the absolute threshold. Units are then grouped
//! into coherence segments by cutting at strong boundaries and at moderate
//! boundaries that also show a keyword-level topic shift.
//!
//! Embedding failures never abort analysis: the [`Embedder`] substitutes
//! deterministic hash vectors and the analysis is marked degraded.

mod keywords;

use serde::{Deserialize, Serialize};

use crate::embeddings::{Embedder, cosine_similarity};
use crate::structure::DocumentStructure;
use crate::tokenizer::TokenCounter;

pub use keywords::{extract_keywords, keyword_overlap};

/// Tuning for boundary classification and segment grouping.
#[derive(Clone, Debug)]
pub struct BoundaryDetectorConfig {
    /// Absolute similarity threshold; boundaries below it are at least
    /// moderate, below half of it strong.
    pub similarity_threshold: f32,
    /// Half-width of the local similarity window, in adjacent-pair steps.
    pub window: usize,
    /// Keyword-set overlap below this fraction flags a topic shift.
    pub topic_overlap_threshold: f32,
    /// Minimum accumulated tokens before a split point is recommended.
    pub min_segment_tokens: usize,
}

impl Default for BoundaryDetectorConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            window: 3,
            topic_overlap_threshold: 0.3,
            min_segment_tokens: 100,
        }
    }
}

/// Boundary classification by raw similarity against the absolute threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryKind {
    Weak,
    Moderate,
    Strong,
}

/// Annotation between two adjacent text units.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SemanticBoundary {
    /// Document position of the unit that follows the boundary.
    pub position: usize,
    /// Combined strength in `[0, 1]`: how far similarity fell below the
    /// local window average and the absolute threshold.
    pub boundary_strength: f32,
    /// Raw gap between the local window average and this pair's similarity.
    pub similarity_drop: f32,
    /// Keyword overlap between the two units fell below the shift threshold.
    pub topic_shift_detected: bool,
    pub kind: BoundaryKind,
}

/// A coherence-grouped span of adjacent units.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SemanticSegment {
    pub start_position: usize,
    pub end_position: usize,
    pub content: String,
    /// Mean pairwise similarity among member embeddings; 1.0 for singletons.
    pub coherence: f32,
    pub topic_keywords: Vec<String>,
    /// Averaged, re-normalized member embedding.
    pub embedding: Option<Vec<f32>>,
    pub similarity_to_previous: Option<f32>,
    pub similarity_to_next: Option<f32>,
}

/// Full result of a boundary analysis pass.
#[derive(Clone, Debug, Default)]
pub struct BoundaryAnalysis {
    pub segments: Vec<SemanticSegment>,
    pub boundaries: Vec<SemanticBoundary>,
    /// Mean of all adjacent-pair similarities; 1.0 when fewer than two units.
    pub overall_coherence: f32,
    /// Positions where a split is both strong enough and far enough from the
    /// previous split to avoid over-fragmentation.
    pub recommended_split_points: Vec<usize>,
    /// The embedding fallback ran during analysis.
    pub fallback_used: bool,
}

impl BoundaryAnalysis {
    /// Analysis of an empty document: fully coherent, nothing to split.
    pub fn empty() -> Self {
        Self {
            overall_coherence: 1.0,
            ..Self::default()
        }
    }

    /// Strongest boundary strictly after `start` and at or before `end`,
    /// by document position. Zero when the range holds no boundary.
    pub fn max_strength_between(&self, start: usize, end: usize) -> f32 {
        self.boundaries
            .iter()
            .filter(|b| b.position > start && b.position <= end)
            .map(|b| b.boundary_strength)
            .fold(0.0, f32::max)
    }

    /// Coherence of the segments overlapping `[start, end]` positions,
    /// averaged; 1.0 when no segment overlaps (single-unit documents).
    pub fn coherence_over(&self, start: usize, end: usize) -> f32 {
        let overlapping: Vec<f32> = self
            .segments
            .iter()
            .filter(|s| s.start_position <= end && s.end_position >= start)
            .map(|s| s.coherence)
            .collect();
        if overlapping.is_empty() {
            1.0
        } else {
            overlapping.iter().sum::<f32>() / overlapping.len() as f32
        }
    }
}

struct Unit {
    position: usize,
    content: String,
    context_text: String,
    tokens: usize,
}

/// Detects semantic boundaries over a parsed document.
#[derive(Debug)]
pub struct BoundaryDetector {
    config: BoundaryDetectorConfig,
    tokens: TokenCounter,
}

impl Default for BoundaryDetector {
    fn default() -> Self {
        Self::new(BoundaryDetectorConfig::default())
    }
}

impl BoundaryDetector {
    pub fn new(config: BoundaryDetectorConfig) -> Self {
        Self {
            config,
            tokens: TokenCounter::new(),
        }
    }

    pub fn config(&self) -> &BoundaryDetectorConfig {
        &self.config
    }

    /// Analyzes the node sequence of `structure`.
    ///
    /// Produces per-pair boundary annotations, coherence segments, overall
    /// coherence, and recommended split points. Degrades (never fails) when
    /// the embedding collaborator is unavailable.
    pub async fn analyze(
        &self,
        structure: &DocumentStructure,
        embedder: &Embedder,
    ) -> BoundaryAnalysis {
        let units: Vec<Unit> = structure
            .nodes()
            .iter()
            .filter(|n| !n.content.trim().is_empty())
            .map(|n| {
                let context_text = if n.path.is_empty() {
                    n.content.clone()
                } else {
                    format!("{}\n{}", n.path.join(" > "), n.content)
                };
                Unit {
                    position: n.position,
                    content: n.content.clone(),
                    tokens: self.tokens.count(&n.content),
                    context_text,
                }
            })
            .collect();

        if units.is_empty() {
            return BoundaryAnalysis::empty();
        }

        let texts: Vec<String> = units.iter().map(|u| u.context_text.clone()).collect();
        let embed = embedder.embed_ordered(&texts).await;
        let vectors = embed.vectors;

        if units.len() == 1 {
            let segment = build_segment(&units, &vectors, 0, 0);
            return BoundaryAnalysis {
                segments: vec![segment],
                boundaries: Vec::new(),
                overall_coherence: 1.0,
                recommended_split_points: Vec::new(),
                fallback_used: embed.fallback_used,
            };
        }

        let similarities: Vec<f32> = vectors
            .windows(2)
            .map(|pair| cosine_similarity(&pair[0], &pair[1]))
            .collect();
        let unit_keywords: Vec<Vec<String>> = units
            .iter()
            .map(|u| extract_keywords(&u.content, 5))
            .collect();

        let boundaries: Vec<SemanticBoundary> = similarities
            .iter()
            .enumerate()
            .map(|(i, &similarity)| {
                let local = local_average(&similarities, i, self.config.window);
                let similarity_drop = (local - similarity).max(0.0);
                let relative_drop = if local > f32::EPSILON {
                    similarity_drop / local
                } else {
                    0.0
                };
                let shortfall = (self.config.similarity_threshold - similarity).max(0.0)
                    / self.config.similarity_threshold;
                let kind = if similarity < 0.5 * self.config.similarity_threshold {
                    BoundaryKind::Strong
                } else if similarity < self.config.similarity_threshold {
                    BoundaryKind::Moderate
                } else {
                    BoundaryKind::Weak
                };
                SemanticBoundary {
                    position: units[i + 1].position,
                    boundary_strength: (0.5 * relative_drop + 0.5 * shortfall).clamp(0.0, 1.0),
                    similarity_drop,
                    topic_shift_detected: keyword_overlap(&unit_keywords[i], &unit_keywords[i + 1])
                        < self.config.topic_overlap_threshold,
                    kind,
                }
            })
            .collect();

        // Cut after unit i when the boundary to its successor is strong, or
        // moderate with a topic shift on top.
        let mut segments = Vec::new();
        let mut start = 0;
        for (i, boundary) in boundaries.iter().enumerate() {
            let cut = boundary.kind == BoundaryKind::Strong
                || (boundary.kind == BoundaryKind::Moderate && boundary.topic_shift_detected);
            if cut {
                segments.push(build_segment(&units, &vectors, start, i));
                start = i + 1;
            }
        }
        segments.push(build_segment(&units, &vectors, start, units.len() - 1));
        link_segment_similarities(&mut segments);

        let overall_coherence =
            similarities.iter().sum::<f32>() / similarities.len() as f32;

        let mut recommended_split_points = Vec::new();
        let mut accumulated = 0usize;
        for (i, boundary) in boundaries.iter().enumerate() {
            accumulated += units[i].tokens;
            if boundary.kind != BoundaryKind::Weak
                && accumulated >= self.config.min_segment_tokens
            {
                recommended_split_points.push(boundary.position);
                accumulated = 0;
            }
        }

        BoundaryAnalysis {
            segments,
            boundaries,
            overall_coherence,
            recommended_split_points,
            fallback_used: embed.fallback_used,
        }
    }
}

/// Average similarity in the window around pair `i`, excluding `i` itself.
///
/// Excluding the center keeps a genuine topic cliff from diluting its own
/// neighborhood average. Falls back to the pair's own similarity when the
/// window is otherwise empty (two-unit documents).
fn local_average(similarities: &[f32], i: usize, window: usize) -> f32 {
    let lo = i.saturating_sub(window);
    let hi = (i + window).min(similarities.len() - 1);
    let neighbors: Vec<f32> = (lo..=hi)
        .filter(|&j| j != i)
        .map(|j| similarities[j])
        .collect();
    if neighbors.is_empty() {
        similarities[i]
    } else {
        neighbors.iter().sum::<f32>() / neighbors.len() as f32
    }
}

fn build_segment(units: &[Unit], vectors: &[Vec<f32>], start: usize, end: usize) -> SemanticSegment {
    let members = &units[start..=end];
    let member_vectors = &vectors[start..=end];

    let coherence = if members.len() < 2 {
        1.0
    } else {
        let mut total = 0.0;
        let mut pairs = 0usize;
        for a in 0..member_vectors.len() {
            for b in (a + 1)..member_vectors.len() {
                total += cosine_similarity(&member_vectors[a], &member_vectors[b]);
                pairs += 1;
            }
        }
        total / pairs as f32
    };

    let content = members
        .iter()
        .map(|u| u.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let embedding = average_embedding(member_vectors);

    SemanticSegment {
        start_position: members[0].position,
        end_position: members[members.len() - 1].position,
        topic_keywords: extract_keywords(&content, 5),
        content,
        coherence,
        embedding,
        similarity_to_previous: None,
        similarity_to_next: None,
    }
}

fn average_embedding(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let dims = vectors.first().map(|v| v.len())?;
    if dims == 0 {
        return None;
    }
    let mut avg = vec![0.0f32; dims];
    for vector in vectors {
        for (slot, v) in avg.iter_mut().zip(vector) {
            *slot += v;
        }
    }
    let norm: f32 = avg.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut avg {
            *v /= norm;
        }
    }
    Some(avg)
}

fn link_segment_similarities(segments: &mut [SemanticSegment]) {
    for i in 1..segments.len() {
        let similarity = match (&segments[i - 1].embedding, &segments[i].embedding) {
            (Some(a), Some(b)) => Some(cosine_similarity(a, b)),
            _ => None,
        };
        segments[i].similarity_to_previous = similarity;
        segments[i - 1].similarity_to_next = similarity;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::embeddings::HashEmbeddingProvider;
    use crate::structure::StructureParser;

    fn embedder() -> Embedder {
        Embedder::new(Arc::new(HashEmbeddingProvider::new(32)))
    }

    #[tokio::test]
    async fn empty_structure_yields_empty_analysis() {
        let structure = StructureParser::new().parse("");
        let analysis = BoundaryDetector::default()
            .analyze(&structure, &embedder())
            .await;
        assert!(analysis.segments.is_empty());
        assert!(analysis.boundaries.is_empty());
        assert_eq!(analysis.overall_coherence, 1.0);
    }

    #[tokio::test]
    async fn single_unit_is_one_fully_coherent_segment() {
        let structure = StructureParser::new().parse("just one paragraph here\n");
        let analysis = BoundaryDetector::default()
            .analyze(&structure, &embedder())
            .await;
        assert_eq!(analysis.segments.len(), 1);
        assert_eq!(analysis.segments[0].coherence, 1.0);
        assert_eq!(analysis.overall_coherence, 1.0);
    }

    #[tokio::test]
    async fn similarities_and_coherence_stay_in_bounds() {
        let text = "# One\nfirst paragraph about storage engines\n\n# Two\nsecond paragraph \
                    about gardening tips\n\n# Three\nthird paragraph about orbital mechanics\n";
        let structure = StructureParser::new().parse(text);
        let analysis = BoundaryDetector::default()
            .analyze(&structure, &embedder())
            .await;
        assert!(!analysis.boundaries.is_empty());
        for boundary in &analysis.boundaries {
            assert!((0.0..=1.0).contains(&boundary.boundary_strength));
        }
        for segment in &analysis.segments {
            assert!((0.0..=1.0).contains(&segment.coherence));
        }
        assert!((0.0..=1.0).contains(&analysis.overall_coherence));
    }

    #[tokio::test]
    async fn overall_coherence_is_the_mean_of_adjacent_similarities() {
        let text = "alpha paragraph content\n\n# H\nbeta paragraph content\n\ngamma paragraph\n";
        let structure = StructureParser::new().parse(text);
        let shared = embedder();
        let analysis = BoundaryDetector::default().analyze(&structure, &shared).await;

        // Recompute from the same deterministic embeddings.
        let texts: Vec<String> = structure
            .nodes()
            .iter()
            .filter(|n| !n.content.trim().is_empty())
            .map(|n| {
                if n.path.is_empty() {
                    n.content.clone()
                } else {
                    format!("{}\n{}", n.path.join(" > "), n.content)
                }
            })
            .collect();
        let vectors = shared.embed_ordered(&texts).await.vectors;
        let sims: Vec<f32> = vectors
            .windows(2)
            .map(|p| cosine_similarity(&p[0], &p[1]))
            .collect();
        let mean = sims.iter().sum::<f32>() / sims.len() as f32;
        assert!((analysis.overall_coherence - mean).abs() < 1e-6);
    }

    #[tokio::test]
    async fn disjoint_vocabulary_flags_topic_shift() {
        let text = "consent privacy records consent privacy disclosure\n\n# Next\nlatency \
                    throughput caching latency throughput buffers\n";
        let structure = StructureParser::new().parse(text);
        let analysis = BoundaryDetector::default()
            .analyze(&structure, &embedder())
            .await;
        assert!(
            analysis
                .boundaries
                .iter()
                .any(|b| b.topic_shift_detected)
        );
    }

    #[tokio::test]
    async fn segments_cover_every_unit_in_order() {
        let text = "# A\none two three\n\n# B\nfour five six\n\n# C\nseven eight nine\n";
        let structure = StructureParser::new().parse(text);
        let analysis = BoundaryDetector::default()
            .analyze(&structure, &embedder())
            .await;
        assert!(!analysis.segments.is_empty());
        for pair in analysis.segments.windows(2) {
            assert!(pair[0].end_position < pair[1].start_position);
        }
        for segment in &analysis.segments {
            assert!(segment.start_position <= segment.end_position);
        }
    }

    #[tokio::test]
    async fn short_documents_recommend_no_splits() {
        let structure = StructureParser::new().parse("# A\ntiny\n\n# B\nalso tiny\n");
        let analysis = BoundaryDetector::default()
            .analyze(&structure, &embedder())
            .await;
        assert!(analysis.recommended_split_points.is_empty());
    }

    #[test]
    fn window_excludes_center_pair() {
        // A cliff at index 2 must not drag down its own neighborhood average.
        let sims = [0.9, 0.9, 0.1, 0.9, 0.9];
        let local = local_average(&sims, 2, 3);
        assert!((local - 0.9).abs() < 1e-6);
        // With only two units the window is empty and falls back to the pair.
        let lone = [0.4];
        assert_eq!(local_average(&lone, 0, 3), 0.4);
    }

    #[test]
    fn max_strength_between_respects_position_range() {
        let mut analysis = BoundaryAnalysis::empty();
        analysis.boundaries = vec![
            SemanticBoundary {
                position: 2,
                boundary_strength: 0.9,
                similarity_drop: 0.5,
                topic_shift_detected: true,
                kind: BoundaryKind::Strong,
            },
            SemanticBoundary {
                position: 5,
                boundary_strength: 0.3,
                similarity_drop: 0.1,
                topic_shift_detected: false,
                kind: BoundaryKind::Weak,
            },
        ];
        assert_eq!(analysis.max_strength_between(0, 2), 0.9);
        assert_eq!(analysis.max_strength_between(2, 5), 0.3);
        assert_eq!(analysis.max_strength_between(5, 9), 0.0);
    }
}
