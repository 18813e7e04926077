//! Arena-backed node storage for parsed document structure.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Structural classification of a document unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Section heading (markdown `#` style or numbered `1.2.3 Title` style).
    Heading,
    /// Prose paragraph. Also the degradation target for malformed markup.
    Paragraph,
    /// Bulleted or numbered list block.
    List,
    /// Pipe-delimited table block.
    Table,
    /// Indented, fenced, or inline-backtick code.
    Code,
    /// Non-structural text such as horizontal rules and symbol-only lines.
    Text,
}

impl NodeType {
    /// Runs of these types under the same parent are merged into one node
    /// after the line pass, preventing pathological single-line chunks.
    pub(crate) fn is_mergeable(self) -> bool {
        matches!(self, NodeType::Paragraph | NodeType::List | NodeType::Table)
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeType::Heading => "heading",
            NodeType::Paragraph => "paragraph",
            NodeType::List => "list",
            NodeType::Table => "table",
            NodeType::Code => "code",
            NodeType::Text => "text",
        };
        write!(f, "{name}")
    }
}

/// One structural unit of a parsed document.
///
/// Nodes are created during parsing and are immutable once post-processing
/// (sibling merging) completes; later pipeline stages only read them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HierarchyNode {
    /// Unique node id.
    pub id: Uuid,
    /// Structural classification.
    pub node_type: NodeType,
    /// Depth in the heading hierarchy: 0 for root-level content, 1 for a top
    /// heading's scope, and so on.
    pub level: usize,
    /// Normalized text content. Headings carry their title (numbered headings
    /// keep their numbering), lists and tables keep their line markers.
    pub content: String,
    /// Owning heading node, if any.
    pub parent_id: Option<Uuid>,
    /// Direct children in document order. Always nodes whose `parent_id`
    /// refers back to this node.
    pub children_ids: Vec<Uuid>,
    /// Titles of the ancestor headings above this node, outermost first.
    pub path: Vec<String>,
    /// Monotonic document-order position.
    pub position: usize,
    /// Original source text for this node.
    pub raw_text: String,
}

impl HierarchyNode {
    /// Returns `true` for heading nodes.
    pub fn is_heading(&self) -> bool {
        self.node_type == NodeType::Heading
    }
}

/// The full node set for one parsed document.
///
/// Owns the arena of nodes in insertion (document) order plus the id lookup
/// maps. Created once per parse and read-only thereafter.
#[derive(Clone, Debug, Default)]
pub struct DocumentStructure {
    nodes: Vec<HierarchyNode>,
    index: FxHashMap<Uuid, usize>,
    root_nodes: Vec<Uuid>,
    heading_paths: FxHashMap<Uuid, Vec<String>>,
}

impl DocumentStructure {
    pub(crate) fn from_nodes(nodes: Vec<HierarchyNode>) -> Self {
        let mut index = FxHashMap::default();
        let mut root_nodes = Vec::new();
        let mut heading_paths = FxHashMap::default();
        for (i, node) in nodes.iter().enumerate() {
            index.insert(node.id, i);
            if node.parent_id.is_none() {
                root_nodes.push(node.id);
            }
            heading_paths.insert(node.id, node.path.clone());
        }
        Self {
            nodes,
            index,
            root_nodes,
            heading_paths,
        }
    }

    /// All nodes in document order.
    pub fn nodes(&self) -> &[HierarchyNode] {
        &self.nodes
    }

    /// Looks a node up by id.
    pub fn node(&self, id: &Uuid) -> Option<&HierarchyNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Ids of nodes without a parent, in document order.
    pub fn root_nodes(&self) -> &[Uuid] {
        &self.root_nodes
    }

    /// Heading path for a node id, outermost heading first.
    pub fn heading_path(&self, id: &Uuid) -> Option<&[String]> {
        self.heading_paths.get(id).map(|p| p.as_slice())
    }

    /// Number of nodes in the structure.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` when the document produced no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
