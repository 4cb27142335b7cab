use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Function,
    Class,
    Method,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Function => "function",
            EntityKind::Class => "class",
            EntityKind::Method => "method",
        }
    }

    /// Map a tree-sitter node kind to the entity it declares, if any.
    pub fn from_node_kind(node_kind: &str) -> Option<Self> {
        match node_kind {
            "function_declaration" => Some(EntityKind::Function),
            "class_declaration" => Some(EntityKind::Class),
            "method_definition" => Some(EntityKind::Method),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "function" | "fn" => Ok(EntityKind::Function),
            "class" => Ok(EntityKind::Class),
            "method" => Ok(EntityKind::Method),
            other => Err(format!(
                "unknown entity kind `{other}` (expected function, class or method)"
            )),
        }
    }
}

/// Half-open byte interval `[start, end)` into one specific text version.
///
/// Serialized as a two-element array so editor clients can pass it back verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[usize; 2]", into = "[usize; 2]")]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when `other` lies entirely inside `self`.
    pub fn contains(&self, other: &ByteRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Slice `text` with this range. `None` when the range is out of bounds or
    /// does not fall on char boundaries, which usually means the range was
    /// computed against a different version of the text.
    pub fn slice<'a>(&self, text: &'a str) -> Option<&'a str> {
        if self.start > self.end {
            return None;
        }
        text.get(self.start..self.end)
    }
}

impl From<[usize; 2]> for ByteRange {
    fn from(v: [usize; 2]) -> Self {
        Self::new(v[0], v[1])
    }
}

impl From<ByteRange> for [usize; 2] {
    fn from(r: ByteRange) -> Self {
        [r.start, r.end]
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A named function, class, or method and its span within one version of a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeEntity {
    pub name: String,
    pub kind: EntityKind,
    pub range: ByteRange,
}

impl CodeEntity {
    pub fn new(name: impl Into<String>, kind: EntityKind, range: ByteRange) -> Self {
        Self {
            name: name.into(),
            kind,
            range,
        }
    }

    /// Identity across text versions: same name and same kind.
    pub fn same_identity(&self, other: &CodeEntity) -> bool {
        self.kind == other.kind && self.name == other.name
    }

    pub fn text<'a>(&self, source: &'a str) -> Option<&'a str> {
        self.range.slice(source)
    }

    pub fn label(&self) -> String {
        format!("{} \"{}\"", self.kind, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("Method".parse::<EntityKind>().unwrap(), EntityKind::Method);
        assert_eq!(" class ".parse::<EntityKind>().unwrap(), EntityKind::Class);
        assert!("struct".parse::<EntityKind>().is_err());
    }

    #[test]
    fn range_serializes_as_pair() {
        let e = CodeEntity::new("add", EntityKind::Function, ByteRange::new(0, 30));
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v, serde_json::json!({"name": "add", "kind": "function", "range": [0, 30]}));

        let back: CodeEntity = serde_json::from_value(v).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn slice_rejects_stale_ranges() {
        let text = "héllo";
        assert_eq!(ByteRange::new(0, 1).slice(text), Some("h"));
        // Splits the two-byte `é`.
        assert_eq!(ByteRange::new(0, 2).slice(text), None);
        assert_eq!(ByteRange::new(3, 99).slice(text), None);
        assert_eq!(ByteRange::new(4, 2).slice(text), None);
    }

    #[test]
    fn containment_and_overlap() {
        let class = ByteRange::new(0, 19);
        let method = ByteRange::new(10, 17);
        assert!(class.contains(&method));
        assert!(!method.contains(&class));
        assert!(class.overlaps(&method));
        assert!(!ByteRange::new(0, 5).overlaps(&ByteRange::new(5, 9)));
    }
}
