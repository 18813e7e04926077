//! Query parsing and scoring helpers shared by the retrieval strategies.

use regex::Regex;

use crate::chunking::{ChunkType, DocumentChunk};

/// Structural cues parsed out of a query ("section 2", "level 3", "chapter
/// Intro").
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryHints {
    /// Explicit hierarchy level, from "level N" or a numeric section cue.
    pub level: Option<usize>,
    /// Terms to match against heading paths.
    pub section_terms: Vec<String>,
}

impl QueryHints {
    pub fn is_empty(&self) -> bool {
        self.level.is_none() && self.section_terms.is_empty()
    }
}

/// Compiled hint patterns.
#[derive(Debug)]
pub struct HintParser {
    level: Regex,
    section: Regex,
}

impl Default for HintParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HintParser {
    pub fn new() -> Self {
        Self {
            level: Regex::new(r"(?i)\blevel\s+(\d+)\b").expect("static pattern"),
            section: Regex::new(r"(?i)\b(?:section|chapter|part|heading)\s+([\w][\w.\-]*)")
                .expect("static pattern"),
        }
    }

    pub fn parse(&self, query: &str) -> QueryHints {
        let mut hints = QueryHints::default();
        if let Some(caps) = self.level.captures(query) {
            hints.level = caps[1].parse().ok();
        }
        for caps in self.section.captures_iter(query) {
            let term = caps[1].to_string();
            // A bare numeric cue ("section 2") doubles as a level hint.
            if hints.level.is_none() {
                if let Ok(level) = term.parse::<usize>() {
                    hints.level = Some(level);
                }
            }
            hints.section_terms.push(term);
        }
        hints
    }
}

/// Lowercase query tokens longer than two characters.
pub fn keyword_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2)
        .map(|w| w.to_lowercase())
        .collect()
}

/// Keyword-match score for one chunk.
///
/// A literal substring match of the whole query outranks any keyword-only
/// match; within each class, the fraction of matched terms orders results.
pub fn keyword_score(chunk: &DocumentChunk, query_lower: &str, terms: &[String]) -> f32 {
    let content = chunk.content.to_lowercase();
    let matched = terms
        .iter()
        .filter(|term| {
            content.contains(term.as_str())
                || chunk
                    .topic_keywords
                    .iter()
                    .any(|k| k.contains(term.as_str()))
        })
        .count();
    if terms.is_empty() {
        return 0.0;
    }
    let fraction = matched as f32 / terms.len() as f32;
    if !query_lower.is_empty() && content.contains(query_lower) {
        1.0 + fraction
    } else {
        fraction
    }
}

/// Rerank bonus for structurally prominent chunks.
pub fn structural_bonus(chunk: &DocumentChunk) -> f32 {
    if chunk.chunk_type == ChunkType::Heading && chunk.hierarchy_level <= 1 {
        0.15
    } else if chunk.hierarchy_level <= 1 {
        0.1
    } else if chunk.hierarchy_level == 2 {
        0.05
    } else {
        0.0
    }
}
