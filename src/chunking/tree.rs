//! Explicit hierarchy tree and the bottom-up chunking walk.
//!
//! The walk is an iterative post-order reduction: every subtree produces an
//! immutable draft list, and parents combine child lists without any shared
//! mutable accumulator. Malformed heading jumps (an H3 directly under an H1)
//! are corrected here: depth is always `parent depth + 1`, not the literal
//! heading level.

use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use super::chunk::ChunkType;
use super::config::ChunkerConfig;
use crate::boundaries::extract_keywords;
use crate::structure::{DocumentStructure, HierarchyNode};
use crate::tokenizer::TokenCounter;

/// One node of the corrected hierarchy tree.
pub(crate) struct TreeNode {
    /// Index into `DocumentStructure::nodes()`.
    pub node_index: usize,
    /// Corrected depth: parent depth + 1 regardless of literal heading level.
    pub depth: usize,
    /// Child tree indices in document order.
    pub children: Vec<usize>,
    /// Token total of this node and its whole subtree.
    pub subtree_tokens: usize,
    pub own_tokens: usize,
}

pub(crate) struct ChunkTree {
    pub nodes: Vec<TreeNode>,
    pub roots: Vec<usize>,
}

/// Builds the corrected tree from the flat node arena.
pub(crate) fn build_tree(structure: &DocumentStructure, counter: &TokenCounter) -> ChunkTree {
    let mut nodes: Vec<TreeNode> = Vec::with_capacity(structure.len());
    let mut roots = Vec::new();
    // Maps structure node id to its tree index.
    let mut tree_index = rustc_hash::FxHashMap::default();

    for (i, snode) in structure.nodes().iter().enumerate() {
        let own_tokens = counter.count(&snode.content);
        let (depth, parent_tree) = match snode.parent_id.and_then(|p| tree_index.get(&p).copied()) {
            Some(p) => (nodes[p as usize].depth + 1, Some(p as usize)),
            None => {
                let depth = if snode.is_heading() { 1 } else { 0 };
                (depth, None)
            }
        };
        let t = nodes.len();
        nodes.push(TreeNode {
            node_index: i,
            depth,
            children: Vec::new(),
            subtree_tokens: own_tokens,
            own_tokens,
        });
        tree_index.insert(snode.id, t as u32);
        match parent_tree {
            Some(p) => nodes[p].children.push(t),
            None => roots.push(t),
        }
    }

    // Accumulate subtree totals bottom-up.
    for t in post_order(&nodes, &roots) {
        let child_total: usize = nodes[t]
            .children
            .clone()
            .into_iter()
            .map(|c| nodes[c].subtree_tokens)
            .sum();
        nodes[t].subtree_tokens = nodes[t].own_tokens + child_total;
    }

    ChunkTree { nodes, roots }
}

fn post_order(nodes: &[TreeNode], roots: &[usize]) -> Vec<usize> {
    let mut order = Vec::with_capacity(nodes.len());
    let mut stack: Vec<(usize, bool)> = roots.iter().rev().map(|&r| (r, false)).collect();
    while let Some((t, expanded)) = stack.pop() {
        if expanded {
            order.push(t);
        } else {
            stack.push((t, true));
            for &c in nodes[t].children.iter().rev() {
                stack.push((c, false));
            }
        }
    }
    order
}

/// Intermediate chunk produced by the tree walk, before finalization.
#[derive(Clone, Debug)]
pub(crate) struct ChunkDraft {
    pub content: String,
    pub tokens: usize,
    /// Document position of the first source node.
    pub start_position: usize,
    /// Document position of the last source node.
    pub end_position: usize,
    pub heading_path: Vec<String>,
    pub level: usize,
    pub chunk_type: ChunkType,
    pub keywords: Vec<String>,
    /// The heading node whose section owns this content.
    pub section: Option<Uuid>,
    /// Set when the draft carries a heading's own text.
    pub heading_node: Option<Uuid>,
    pub starts_with_heading: bool,
    pub semantic_density: f32,
    pub overlap_text: Option<String>,
    pub has_overlap_previous: bool,
    pub has_overlap_next: bool,
}

impl ChunkDraft {
    fn from_content(
        content: String,
        tokens: usize,
        snode: &HierarchyNode,
        depth: usize,
    ) -> Self {
        Self {
            keywords: extract_keywords(&content, 5),
            content,
            tokens,
            start_position: snode.position,
            end_position: snode.position,
            heading_path: snode.path.clone(),
            level: depth,
            chunk_type: snode.node_type.into(),
            section: snode.parent_id,
            heading_node: snode.is_heading().then_some(snode.id),
            starts_with_heading: snode.is_heading(),
            semantic_density: 1.0,
            overlap_text: None,
            has_overlap_previous: false,
            has_overlap_next: false,
        }
    }
}

/// Runs the bottom-up walk over the whole tree.
///
/// Leaves become one draft each (split when oversized). For internal nodes,
/// each child subtree that meets the minimum size (or is itself a heading)
/// is kept independent; smaller subtrees are buffered as fragments and
/// grouped. The heading's own text joins its first child's draft when that
/// stays under the max size, otherwise it stands alone.
pub(crate) fn chunk_tree(
    tree: &ChunkTree,
    structure: &DocumentStructure,
    config: &ChunkerConfig,
    counter: &TokenCounter,
) -> Vec<ChunkDraft> {
    let mut results: Vec<Vec<ChunkDraft>> = (0..tree.nodes.len()).map(|_| Vec::new()).collect();

    for t in post_order(&tree.nodes, &tree.roots) {
        let node = &tree.nodes[t];
        let snode = &structure.nodes()[node.node_index];

        if !snode.is_heading() {
            results[t] = leaf_drafts(snode, node.depth, config, counter);
            continue;
        }

        let mut combined = combine_children(&node.children, &mut results, tree, structure, config);

        let heading_tokens = node.own_tokens;
        let attach = combined.first().is_some_and(|first| {
            !first.starts_with_heading && heading_tokens + first.tokens <= config.max_chunk_tokens
        });
        if attach {
            let first = &mut combined[0];
            first.content = format!("{}\n\n{}", snode.content, first.content);
            first.tokens += heading_tokens;
            first.start_position = snode.position;
            first.level = node.depth;
            first.section = snode.parent_id;
            first.heading_node = Some(snode.id);
            first.starts_with_heading = true;
            first.keywords = union_keywords(&extract_keywords(&snode.content, 5), &first.keywords);
        } else {
            combined.insert(
                0,
                ChunkDraft::from_content(snode.content.clone(), heading_tokens, snode, node.depth),
            );
        }
        results[t] = combined;
    }

    combine_children(&tree.roots, &mut results, tree, structure, config)
}

/// Pure reduction over a node's children: independent subtrees pass through,
/// undersized ones are buffered and grouped.
fn combine_children(
    children: &[usize],
    results: &mut [Vec<ChunkDraft>],
    tree: &ChunkTree,
    structure: &DocumentStructure,
    config: &ChunkerConfig,
) -> Vec<ChunkDraft> {
    let mut combined = Vec::new();
    let mut fragments: Vec<ChunkDraft> = Vec::new();

    for &c in children {
        let child = &tree.nodes[c];
        let child_is_heading = structure.nodes()[child.node_index].is_heading();
        let child_result = std::mem::take(&mut results[c]);

        if child.subtree_tokens >= config.min_chunk_tokens || child_is_heading {
            flush_fragments(&mut fragments, &mut combined, config);
            combined.extend(child_result);
        } else {
            for draft in child_result {
                if fragment_total(&fragments) + draft.tokens > config.max_chunk_tokens {
                    flush_fragments(&mut fragments, &mut combined, config);
                }
                fragments.push(draft);
                if fragment_total(&fragments) >= config.target_chunk_tokens {
                    flush_fragments(&mut fragments, &mut combined, config);
                }
            }
        }
    }
    flush_fragments(&mut fragments, &mut combined, config);
    combined
}

fn fragment_total(fragments: &[ChunkDraft]) -> usize {
    fragments.iter().map(|f| f.tokens).sum()
}

fn flush_fragments(fragments: &mut Vec<ChunkDraft>, out: &mut Vec<ChunkDraft>, _config: &ChunkerConfig) {
    if fragments.is_empty() {
        return;
    }
    let run: Vec<ChunkDraft> = std::mem::take(fragments);
    out.push(merge_run(run));
}

/// Merges a run of drafts into one, keeping the run's type when uniform.
pub(crate) fn merge_run(run: Vec<ChunkDraft>) -> ChunkDraft {
    let mut iter = run.into_iter();
    let mut merged = iter.next().expect("merge_run requires at least one draft");
    for draft in iter {
        merged.content.push_str("\n\n");
        merged.content.push_str(&draft.content);
        merged.tokens += draft.tokens;
        merged.end_position = draft.end_position;
        merged.keywords = union_keywords(&merged.keywords, &draft.keywords);
        merged.semantic_density = (merged.semantic_density + draft.semantic_density) / 2.0;
        if merged.chunk_type != draft.chunk_type {
            merged.chunk_type = ChunkType::Mixed;
        }
        if draft.heading_node.is_some() && merged.heading_node.is_none() {
            merged.heading_node = draft.heading_node;
        }
    }
    merged
}

pub(crate) fn union_keywords(a: &[String], b: &[String]) -> Vec<String> {
    let mut union = a.to_vec();
    for word in b {
        if !union.contains(word) {
            union.push(word.clone());
        }
    }
    union
}

/// One draft per leaf node, split sentence-wise when the node alone exceeds
/// the max size.
fn leaf_drafts(
    snode: &HierarchyNode,
    depth: usize,
    config: &ChunkerConfig,
    counter: &TokenCounter,
) -> Vec<ChunkDraft> {
    let tokens = counter.count(&snode.content);
    if tokens == 0 {
        return Vec::new();
    }
    if tokens <= config.max_chunk_tokens {
        return vec![ChunkDraft::from_content(snode.content.clone(), tokens, snode, depth)];
    }

    split_to_target(&snode.content, config, counter)
        .into_iter()
        .map(|piece| {
            let piece_tokens = counter.count(&piece);
            ChunkDraft::from_content(piece, piece_tokens, snode, depth)
        })
        .collect()
}

/// Splits text into pieces of roughly the target size, sentence-first and
/// word-wise for degenerate sentences longer than the max.
fn split_to_target(text: &str, config: &ChunkerConfig, counter: &TokenCounter) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0usize;

    let mut flush = |current: &mut String, current_tokens: &mut usize, pieces: &mut Vec<String>| {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            pieces.push(trimmed.to_string());
        }
        current.clear();
        *current_tokens = 0;
    };

    for sentence in text.unicode_sentences() {
        let sentence_tokens = counter.count(sentence);
        if sentence_tokens > config.max_chunk_tokens {
            flush(&mut current, &mut current_tokens, &mut pieces);
            pieces.extend(split_words(sentence, config.target_chunk_tokens, counter));
            continue;
        }
        if current_tokens + sentence_tokens > config.target_chunk_tokens && current_tokens > 0 {
            flush(&mut current, &mut current_tokens, &mut pieces);
        }
        current.push_str(sentence);
        current_tokens += sentence_tokens;
    }
    flush(&mut current, &mut current_tokens, &mut pieces);
    pieces
}

fn split_words(text: &str, target: usize, counter: &TokenCounter) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0usize;
    for word in text.split_whitespace() {
        let word_tokens = counter.count(word).max(1);
        if current_tokens + word_tokens > target && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
        current_tokens += word_tokens;
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::StructureParser;

    fn build(text: &str) -> (DocumentStructure, ChunkTree, TokenCounter) {
        let structure = StructureParser::new().parse(text);
        let counter = TokenCounter::new();
        let tree = build_tree(&structure, &counter);
        (structure, tree, counter)
    }

    #[test]
    fn depth_is_corrected_for_level_jumps() {
        let (structure, tree, _) = build("# Top\n#### Jumpy\ncontent under jumpy\n");
        let jumpy = tree
            .nodes
            .iter()
            .find(|t| structure.nodes()[t.node_index].content == "Jumpy")
            .expect("heading in tree");
        // Literal level is 4, corrected depth is parent + 1.
        assert_eq!(structure.nodes()[jumpy.node_index].level, 4);
        assert_eq!(jumpy.depth, 2);
    }

    #[test]
    fn subtree_tokens_cover_descendants() {
        let (_, tree, _) = build("# A\nsome words here\n## B\nmore words in the subsection\n");
        let root = &tree.nodes[tree.roots[0]];
        let descendant_total: usize = tree
            .nodes
            .iter()
            .map(|t| t.own_tokens)
            .sum();
        assert_eq!(root.subtree_tokens, descendant_total);
    }

    #[test]
    fn heading_text_joins_first_child_chunk() {
        let (structure, tree, counter) = build("# Intro\nwelcome paragraph with some words\n");
        let drafts = chunk_tree(&tree, &structure, &ChunkerConfig::default(), &counter);
        assert_eq!(drafts.len(), 1);
        assert!(drafts[0].content.starts_with("Intro"));
        assert!(drafts[0].content.contains("welcome paragraph"));
        assert!(drafts[0].starts_with_heading);
    }

    #[test]
    fn childless_heading_becomes_its_own_draft() {
        let (structure, tree, counter) = build("# Lonely\n");
        let drafts = chunk_tree(&tree, &structure, &ChunkerConfig::default(), &counter);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].chunk_type, ChunkType::Heading);
    }

    #[test]
    fn oversized_leaf_is_split_under_target() {
        let config = ChunkerConfig {
            min_chunk_tokens: 5,
            target_chunk_tokens: 20,
            max_chunk_tokens: 40,
            ..ChunkerConfig::default()
        };
        let counter = TokenCounter::new();
        let long: String = (0..60)
            .map(|i| format!("Sentence number {i} has several words in it. "))
            .collect();
        let pieces = split_to_target(&long, &config, &counter);
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(counter.count(piece) <= config.max_chunk_tokens);
        }
    }

    #[test]
    fn merge_run_keeps_uniform_type_and_unions_keywords() {
        let (structure, _, counter) = build("alpha beta gamma delta\n\nepsilon zeta eta theta\n");
        // Parser merges the paragraphs; rebuild two drafts manually.
        let snode = &structure.nodes()[0];
        let a = ChunkDraft::from_content("alpha beta gamma delta".into(), counter.count("alpha beta gamma delta"), snode, 0);
        let b = ChunkDraft::from_content("epsilon zeta eta theta".into(), counter.count("epsilon zeta eta theta"), snode, 0);
        let merged = merge_run(vec![a, b]);
        assert_eq!(merged.chunk_type, ChunkType::Paragraph);
        assert!(merged.keywords.contains(&"alpha".to_string()));
        assert!(merged.keywords.contains(&"theta".to_string()));
    }
}
