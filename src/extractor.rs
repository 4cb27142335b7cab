use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::debug;
use tree_sitter::{Language, LanguageError, Node, Parser};

use crate::entity::{ByteRange, CodeEntity, EntityKind};

/// Tree-sitter grammar used to parse a document.
///
/// JavaScript files go through the TSX grammar, since `.js` sources often carry
/// JSX; the node kinds we care about are identical in both grammars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grammar {
    TypeScript,
    Tsx,
}

const TYPESCRIPT_EXTENSIONS: &[&str] = &["ts", "mts", "cts"];
const TSX_EXTENSIONS: &[&str] = &["tsx", "jsx", "js", "mjs", "cjs"];

impl Grammar {
    pub fn name(self) -> &'static str {
        match self {
            Grammar::TypeScript => "typescript",
            Grammar::Tsx => "tsx",
        }
    }

    /// Pick a grammar from the file extension. `None` means the file is not a
    /// supported document and gets no lenses.
    pub fn for_path(path: &Path) -> Option<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        if TYPESCRIPT_EXTENSIONS.contains(&ext.as_str()) {
            Some(Grammar::TypeScript)
        } else if TSX_EXTENSIONS.contains(&ext.as_str()) {
            Some(Grammar::Tsx)
        } else {
            None
        }
    }

    pub fn language(self) -> Language {
        match self {
            Grammar::TypeScript => tree_sitter_typescript::language_typescript(),
            Grammar::Tsx => tree_sitter_typescript::language_tsx(),
        }
    }
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to load the {grammar} grammar: {source}")]
    Language {
        grammar: Grammar,
        #[source]
        source: LanguageError,
    },

    #[error("parser returned no syntax tree")]
    NoTree,

    #[error("syntax error near byte {offset}")]
    Syntax { offset: usize },
}

/// The slice of a syntax tree the extractor needs. Implemented for tree-sitter
/// nodes; any other parser can plug in by providing the same four accessors.
pub trait SyntaxNode: Sized {
    fn kind(&self) -> &str;
    fn children(&self) -> Vec<Self>;
    fn field(&self, name: &str) -> Option<Self>;
    fn byte_range(&self) -> ByteRange;
}

impl<'tree> SyntaxNode for Node<'tree> {
    fn kind(&self) -> &str {
        Node::kind(self)
    }

    fn children(&self) -> Vec<Self> {
        let mut cursor = self.walk();
        Node::children(self, &mut cursor).collect()
    }

    fn field(&self, name: &str) -> Option<Self> {
        self.child_by_field_name(name)
    }

    fn byte_range(&self) -> ByteRange {
        ByteRange::new(self.start_byte(), self.end_byte())
    }
}

/// Depth-first, pre-order walk emitting every named function, class and method.
///
/// Children are visited in source order, so a class always precedes its methods.
/// Declarations without a usable `name` field (anonymous functions, default-export
/// classes) are skipped.
pub fn collect_entities<N: SyntaxNode>(root: N, source: &str) -> Vec<CodeEntity> {
    let mut out: Vec<CodeEntity> = Vec::new();
    let mut stack: Vec<N> = vec![root];

    while let Some(node) = stack.pop() {
        if let Some(kind) = EntityKind::from_node_kind(node.kind()) {
            let name = node
                .field("name")
                .and_then(|n| n.byte_range().slice(source).map(str::trim))
                .filter(|s| !s.is_empty());
            if let Some(name) = name {
                out.push(CodeEntity::new(name, kind, node.byte_range()));
            }
        }

        let mut children = node.children();
        children.reverse();
        stack.extend(children);
    }

    out
}

/// Parse `source` and return its entities, or the reason extraction failed.
///
/// A tree containing any error or missing node is treated as a failure: ranges
/// computed from a recovered tree do not reliably delimit whole declarations.
pub fn try_extract_entities(source: &str, grammar: Grammar) -> Result<Vec<CodeEntity>, ExtractError> {
    let mut parser = Parser::new();
    parser
        .set_language(&grammar.language())
        .map_err(|err| ExtractError::Language { grammar, source: err })?;

    let tree = parser.parse(source, None).ok_or(ExtractError::NoTree)?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(ExtractError::Syntax {
            offset: first_error_offset(root),
        });
    }

    Ok(collect_entities(root, source))
}

/// Lossy form of [`try_extract_entities`]: any failure yields an empty list, so
/// callers cannot tell "no entities" from "could not parse".
pub fn extract_entities(source: &str, grammar: Grammar) -> Vec<CodeEntity> {
    match try_extract_entities(source, grammar) {
        Ok(entities) => entities,
        Err(e) => {
            debug!(%grammar, error = %e, "entity extraction failed");
            vec![]
        }
    }
}

fn first_error_offset(root: Node) -> usize {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return node.start_byte();
        }
        if !node.has_error() {
            continue;
        }
        let mut children = SyntaxNode::children(&node);
        children.reverse();
        stack.extend(children);
    }
    root.start_byte()
}
