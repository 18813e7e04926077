//! Line-oriented structure parsing.

use regex::Regex;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use super::node::{DocumentStructure, HierarchyNode, NodeType};

/// Classification result for a single source line.
enum Line {
    Heading { level: usize, title: String },
    Content { node_type: NodeType, content: String },
}

/// Parses raw text into a [`DocumentStructure`].
///
/// Each non-empty line is classified through ordered pattern checks: markdown
/// heading, numbered heading, list item, table row, code, then paragraph.
/// Heading levels drive parent resolution through a level stack; everything
/// else attaches to the innermost open heading. Parsing never fails; lines
/// that match no structural pattern become paragraphs.
#[derive(Debug)]
pub struct StructureParser {
    md_heading: Regex,
    numbered_heading: Regex,
    bullet_item: Regex,
    numeric_item: Regex,
    inline_code: Regex,
}

impl Default for StructureParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StructureParser {
    pub fn new() -> Self {
        Self {
            md_heading: Regex::new(r"^(#{1,6})\s+(.+)$").expect("static pattern"),
            numbered_heading: Regex::new(r"^(\d+(?:\.\d+)*)([.)])?\s+(\S.*)$")
                .expect("static pattern"),
            bullet_item: Regex::new(r"^[-*+•]\s+").expect("static pattern"),
            numeric_item: Regex::new(r"^\d+[.)]\s+").expect("static pattern"),
            inline_code: Regex::new(r"^`[^`]+`$").expect("static pattern"),
        }
    }

    /// Parses `text` into a typed node tree.
    ///
    /// Empty or whitespace-only input yields an empty structure.
    pub fn parse(&self, text: &str) -> DocumentStructure {
        let mut builder = Builder::default();
        let mut fence: Option<Vec<String>> = None;

        for line in text.lines() {
            let trimmed = line.trim();

            if trimmed.starts_with("```") {
                match fence.take() {
                    Some(buffer) => builder.attach_code_block(buffer),
                    None => fence = Some(Vec::new()),
                }
                continue;
            }
            if let Some(buffer) = fence.as_mut() {
                buffer.push(line.trim_end().to_string());
                continue;
            }
            if trimmed.is_empty() {
                continue;
            }

            match self.classify(line, trimmed) {
                Line::Heading { level, title } => builder.attach_heading(level, title, line),
                Line::Content { node_type, content } => {
                    builder.attach_content(node_type, content, line)
                }
            }
        }

        // Unterminated fence: keep whatever was collected rather than dropping it.
        if let Some(buffer) = fence {
            builder.attach_code_block(buffer);
        }

        builder.finish()
    }

    fn classify(&self, line: &str, trimmed: &str) -> Line {
        let indented = line.len() != line.trim_start().len();
        let indent_width = line.chars().take_while(|c| *c == ' ' || *c == '\t').fold(
            0usize,
            |acc, c| if c == '\t' { acc + 4 } else { acc + 1 },
        );

        if let Some(caps) = self.md_heading.captures(trimmed) {
            return Line::Heading {
                level: caps[1].len(),
                title: caps[2].trim().to_string(),
            };
        }

        // Numbered headings ("1.2.3 Title") only match at the left margin;
        // indented numerals and "1)" forms read as list items instead.
        if !indented {
            if let Some(caps) = self.numbered_heading.captures(trimmed) {
                let segments = caps[1].split('.').count();
                let paren_form = caps.get(2).map(|m| m.as_str()) == Some(")");
                let dotted = caps.get(2).map(|m| m.as_str()) == Some(".");
                if !paren_form && (segments > 1 || dotted) {
                    return Line::Heading {
                        level: segments,
                        title: trimmed.to_string(),
                    };
                }
            }
        }

        if self.bullet_item.is_match(trimmed) || self.numeric_item.is_match(trimmed) {
            return Line::Content {
                node_type: NodeType::List,
                content: trimmed.to_string(),
            };
        }

        if trimmed.matches('|').count() >= 2 {
            return Line::Content {
                node_type: NodeType::Table,
                content: trimmed.to_string(),
            };
        }

        if indent_width >= 4 || self.inline_code.is_match(trimmed) {
            return Line::Content {
                node_type: NodeType::Code,
                content: line.trim_end().to_string(),
            };
        }

        if !trimmed.chars().any(|c| c.is_alphanumeric()) {
            return Line::Content {
                node_type: NodeType::Text,
                content: trimmed.to_string(),
            };
        }

        Line::Content {
            node_type: NodeType::Paragraph,
            content: trimmed.to_string(),
        }
    }
}

/// Accumulates nodes during the line pass, then runs sibling merging.
#[derive(Default)]
struct Builder {
    nodes: Vec<HierarchyNode>,
    /// Indices of the currently open headings, outermost first.
    stack: Vec<usize>,
    position: usize,
}

impl Builder {
    fn attach_heading(&mut self, level: usize, title: String, raw: &str) {
        while let Some(&top) = self.stack.last() {
            if self.nodes[top].level >= level {
                self.stack.pop();
            } else {
                break;
            }
        }
        let idx = self.push_node(NodeType::Heading, level, title, raw);
        self.stack.push(idx);
    }

    fn attach_content(&mut self, node_type: NodeType, content: String, raw: &str) {
        let level = self
            .stack
            .last()
            .map(|&i| self.nodes[i].level + 1)
            .unwrap_or(0);
        self.push_node(node_type, level, content, raw);
    }

    fn attach_code_block(&mut self, lines: Vec<String>) {
        if lines.iter().all(|l| l.trim().is_empty()) {
            return;
        }
        let raw = lines.join("\n");
        let level = self
            .stack
            .last()
            .map(|&i| self.nodes[i].level + 1)
            .unwrap_or(0);
        self.push_node(NodeType::Code, level, raw.clone(), &raw);
    }

    fn push_node(&mut self, node_type: NodeType, level: usize, content: String, raw: &str) -> usize {
        let parent_idx = self.stack.last().copied();
        let path: Vec<String> = self
            .stack
            .iter()
            .map(|&i| self.nodes[i].content.clone())
            .collect();
        let node = HierarchyNode {
            id: Uuid::new_v4(),
            node_type,
            level,
            content,
            parent_id: parent_idx.map(|i| self.nodes[i].id),
            children_ids: Vec::new(),
            path,
            position: self.position,
            raw_text: raw.to_string(),
        };
        self.position += 1;
        if let Some(p) = parent_idx {
            let child_id = node.id;
            self.nodes[p].children_ids.push(child_id);
        }
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn finish(self) -> DocumentStructure {
        let nodes = merge_sibling_runs(self.nodes);
        DocumentStructure::from_nodes(nodes)
    }
}

/// Merges contiguous runs of same-typed siblings into single nodes.
///
/// Consecutive paragraphs concatenate with spaces; consecutive list items and
/// table rows become one block joined with newlines. Only paragraph, list,
/// and table nodes participate.
fn merge_sibling_runs(mut nodes: Vec<HierarchyNode>) -> Vec<HierarchyNode> {
    let index_of: FxHashMap<Uuid, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id, i))
        .collect();
    let mut absorbed = vec![false; nodes.len()];

    let mut i = 0;
    while i < nodes.len() {
        if absorbed[i] || !nodes[i].node_type.is_mergeable() {
            i += 1;
            continue;
        }
        let separator = match nodes[i].node_type {
            NodeType::Paragraph => " ",
            _ => "\n",
        };
        let mut j = i + 1;
        let mut content = nodes[i].content.clone();
        let mut raw = nodes[i].raw_text.clone();
        let mut run_ids = Vec::new();
        while j < nodes.len()
            && nodes[j].node_type == nodes[i].node_type
            && nodes[j].parent_id == nodes[i].parent_id
        {
            content.push_str(separator);
            content.push_str(&nodes[j].content);
            raw.push('\n');
            raw.push_str(&nodes[j].raw_text);
            absorbed[j] = true;
            run_ids.push(nodes[j].id);
            j += 1;
        }
        if !run_ids.is_empty() {
            nodes[i].content = content;
            nodes[i].raw_text = raw;
            if let Some(parent_id) = nodes[i].parent_id {
                if let Some(&p) = index_of.get(&parent_id) {
                    nodes[p].children_ids.retain(|id| !run_ids.contains(id));
                }
            }
        }
        i = j;
    }

    nodes
        .into_iter()
        .zip(absorbed)
        .filter(|(_, gone)| !gone)
        .map(|(n, _)| n)
        .collect()
}

/// Renders a structure back to text, one block per node.
///
/// Headings get markdown markers matching their level; code blocks are
/// re-fenced. Whitespace is normalized, content is preserved.
pub fn structure_to_text(structure: &DocumentStructure) -> String {
    let mut out = String::new();
    for node in structure.nodes() {
        match node.node_type {
            NodeType::Heading => {
                out.push_str(&"#".repeat(node.level.max(1)));
                out.push(' ');
                out.push_str(&node.content);
            }
            NodeType::Code => {
                out.push_str("```\n");
                out.push_str(&node.content);
                out.push_str("\n```");
            }
            _ => out.push_str(&node.content),
        }
        out.push_str("\n\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> DocumentStructure {
        StructureParser::new().parse(text)
    }

    #[test]
    fn empty_input_yields_empty_structure() {
        assert!(parse("").is_empty());
        assert!(parse("  \n\t\n  ").is_empty());
    }

    #[test]
    fn positions_strictly_increase() {
        let structure = parse("# A\npara one\n\n## B\npara two\n- item\n");
        let positions: Vec<usize> = structure.nodes().iter().map(|n| n.position).collect();
        for pair in positions.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn parent_child_links_are_consistent() {
        let structure = parse("# Top\nintro\n## Sub\ndetail\n# Next\nmore\n");
        for node in structure.nodes() {
            if let Some(parent_id) = node.parent_id {
                let parent = structure.node(&parent_id).expect("parent exists");
                assert!(parent.children_ids.contains(&node.id));
            }
            for child_id in &node.children_ids {
                let child = structure.node(child_id).expect("child exists");
                assert_eq!(child.parent_id, Some(node.id));
            }
        }
    }

    #[test]
    fn heading_stack_resolves_parents() {
        let structure = parse("# A\n## B\n### C\n## D\n");
        let nodes = structure.nodes();
        assert_eq!(nodes.len(), 4);
        assert_eq!(nodes[1].parent_id, Some(nodes[0].id));
        assert_eq!(nodes[2].parent_id, Some(nodes[1].id));
        // D pops back to A's scope.
        assert_eq!(nodes[3].parent_id, Some(nodes[0].id));
    }

    #[test]
    fn level_gap_attaches_to_nearest_shallower_heading() {
        let structure = parse("# A\n### Deep\ntext under deep\n");
        let nodes = structure.nodes();
        assert_eq!(nodes[1].level, 3);
        assert_eq!(nodes[1].parent_id, Some(nodes[0].id));
        assert_eq!(nodes[2].parent_id, Some(nodes[1].id));
    }

    #[test]
    fn path_lists_ancestor_headings() {
        let structure = parse("# Guide\n## Install\nrun the installer\n");
        let para = structure
            .nodes()
            .iter()
            .find(|n| n.node_type == NodeType::Paragraph)
            .expect("paragraph parsed");
        assert_eq!(para.path, vec!["Guide".to_string(), "Install".to_string()]);
        let sub = &structure.nodes()[1];
        assert_eq!(sub.path, vec!["Guide".to_string()]);
    }

    #[test]
    fn numbered_headings_use_segment_count() {
        let structure = parse("1. Scope\n1.1 Detail\n1.1.1 Fine print\n");
        let levels: Vec<usize> = structure.nodes().iter().map(|n| n.level).collect();
        assert_eq!(levels, vec![1, 2, 3]);
        assert!(structure.nodes().iter().all(|n| n.is_heading()));
    }

    #[test]
    fn indented_and_paren_numerals_are_list_items() {
        let structure = parse("# H\n  1. first\n  2. second\n");
        let list = structure
            .nodes()
            .iter()
            .find(|n| n.node_type == NodeType::List)
            .expect("list parsed");
        assert!(list.content.contains("first"));
        assert!(list.content.contains("second"));
    }

    #[test]
    fn consecutive_paragraphs_merge_with_spaces() {
        let structure = parse("# H\nfirst sentence.\nsecond sentence.\n");
        let paras: Vec<&HierarchyNode> = structure
            .nodes()
            .iter()
            .filter(|n| n.node_type == NodeType::Paragraph)
            .collect();
        assert_eq!(paras.len(), 1);
        assert_eq!(paras[0].content, "first sentence. second sentence.");
    }

    #[test]
    fn consecutive_list_items_merge_into_one_block() {
        let structure = parse("- a\n- b\n- c\n- d\n- e\n");
        let lists: Vec<&HierarchyNode> = structure
            .nodes()
            .iter()
            .filter(|n| n.node_type == NodeType::List)
            .collect();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].content.lines().count(), 5);
        assert!(lists[0].content.lines().all(|l| l.starts_with("- ")));
    }

    #[test]
    fn table_rows_merge_into_one_block() {
        let structure = parse("| a | b |\n| - | - |\n| 1 | 2 |\n");
        let tables: Vec<&HierarchyNode> = structure
            .nodes()
            .iter()
            .filter(|n| n.node_type == NodeType::Table)
            .collect();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].content.lines().count(), 3);
    }

    #[test]
    fn fenced_code_becomes_single_node() {
        let structure = parse("# H\n```\nlet x = 1;\nlet y = 2;\n```\nafter\n");
        let code: Vec<&HierarchyNode> = structure
            .nodes()
            .iter()
            .filter(|n| n.node_type == NodeType::Code)
            .collect();
        assert_eq!(code.len(), 1);
        assert!(code[0].content.contains("let x = 1;"));
        assert!(code[0].content.contains("let y = 2;"));
    }

    #[test]
    fn unterminated_fence_keeps_content() {
        let structure = parse("```\norphaned code\n");
        assert_eq!(structure.len(), 1);
        assert_eq!(structure.nodes()[0].node_type, NodeType::Code);
    }

    #[test]
    fn malformed_markup_degrades_to_paragraph() {
        let structure = parse("####### too deep for a heading\n");
        assert_eq!(structure.nodes()[0].node_type, NodeType::Paragraph);
    }

    #[test]
    fn round_trip_preserves_headings_and_paragraphs() {
        let original = "# Title\n\nSome paragraph content here.\n\n## Section\n\nMore prose.\n";
        let first = parse(original);
        let second = parse(&structure_to_text(&first));
        assert_eq!(first.len(), second.len());
        for (a, b) in first.nodes().iter().zip(second.nodes()) {
            assert_eq!(a.node_type, b.node_type);
            assert_eq!(a.level, b.level);
            assert_eq!(a.content, b.content);
        }
    }

    #[test]
    fn horizontal_rule_is_text_node() {
        let structure = parse("above\n\n---\n\nbelow\n");
        assert!(
            structure
                .nodes()
                .iter()
                .any(|n| n.node_type == NodeType::Text)
        );
    }
}
