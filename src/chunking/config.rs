//! Chunking run configuration.

use serde::{Deserialize, Serialize};

use crate::types::ChunkError;

/// Immutable configuration for one chunking run.
///
/// All sizes are token counts. Adaptive variants for short documents are
/// derived with [`adaptive_for`](Self::adaptive_for); the original config is
/// never mutated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Smallest chunk the grouping pass aims for.
    pub min_chunk_tokens: usize,
    /// Preferred chunk size when splitting oversized content.
    pub target_chunk_tokens: usize,
    /// Hard upper bound; only degenerate single sentences may exceed it.
    pub max_chunk_tokens: usize,
    /// Fraction of a chunk's trailing tokens duplicated into the next chunk's
    /// context, in `[0, 0.5]`.
    pub overlap_percentage: f32,
    /// Veto merges across strong semantic boundaries.
    pub respect_semantic_boundaries: bool,
    /// Veto merges across section (heading) boundaries.
    pub respect_section_boundaries: bool,
    /// Prefix chunks with their heading path when they do not already start
    /// with their own heading.
    pub include_heading_context: bool,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_chunk_tokens: 100,
            target_chunk_tokens: 400,
            max_chunk_tokens: 800,
            overlap_percentage: 0.15,
            respect_semantic_boundaries: true,
            respect_section_boundaries: true,
            include_heading_context: true,
        }
    }
}

impl ChunkerConfig {
    /// Rejects inverted or out-of-range bounds.
    ///
    /// This is the one caller-visible rejection in the pipeline; everything
    /// downstream degrades instead of failing.
    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.min_chunk_tokens == 0 {
            return Err(ChunkError::InvalidConfig(
                "min_chunk_tokens must be at least 1".into(),
            ));
        }
        if self.min_chunk_tokens > self.target_chunk_tokens {
            return Err(ChunkError::InvalidConfig(format!(
                "min_chunk_tokens ({}) exceeds target_chunk_tokens ({})",
                self.min_chunk_tokens, self.target_chunk_tokens
            )));
        }
        if self.target_chunk_tokens > self.max_chunk_tokens {
            return Err(ChunkError::InvalidConfig(format!(
                "target_chunk_tokens ({}) exceeds max_chunk_tokens ({})",
                self.target_chunk_tokens, self.max_chunk_tokens
            )));
        }
        if !self.overlap_percentage.is_finite()
            || !(0.0..=0.5).contains(&self.overlap_percentage)
        {
            return Err(ChunkError::InvalidConfig(format!(
                "overlap_percentage ({}) must be within [0.0, 0.5]",
                self.overlap_percentage
            )));
        }
        Ok(())
    }

    /// Derives a size profile matched to the document's total token count.
    ///
    /// Short documents get proportionally smaller bounds so they are not
    /// forced into oversized single chunks; large documents keep the
    /// configured bounds. Component-wise `min` against an ordered tier
    /// preserves `min <= target <= max`.
    pub fn adaptive_for(&self, total_tokens: usize) -> Self {
        let tier = match total_tokens {
            0..=499 => (50, 150, 300),
            500..=1999 => (75, 200, 400),
            2000..=4999 => (100, 300, 600),
            _ => return self.clone(),
        };
        Self {
            min_chunk_tokens: self.min_chunk_tokens.min(tier.0),
            target_chunk_tokens: self.target_chunk_tokens.min(tier.1),
            max_chunk_tokens: self.max_chunk_tokens.min(tier.2),
            ..self.clone()
        }
    }
}
