//! Document structure recovery.
//!
//! Turns flat document text into a typed node tree: headings, paragraphs,
//! lists, tables, and code, with parent/child links and heading-path context.
//! The tree is arena-backed (a flat node vector plus id indexes) so there are
//! no cyclic ownership graphs to manage.
//!
//! ```text
//! raw text ──► StructureParser::parse ──► DocumentStructure
//!                    │
//!                    ├─► line classification (ordered pattern checks)
//!                    ├─► heading level stack (parent resolution)
//!                    └─► sibling merge (paragraph/list/table runs)
//! ```
//!
//! Parsing never fails: malformed markup degrades to paragraph nodes and
//! empty input yields an empty structure.

mod node;
mod parser;

pub use node::{DocumentStructure, HierarchyNode, NodeType};
pub use parser::{StructureParser, structure_to_text};
