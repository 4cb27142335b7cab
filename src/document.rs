use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::entity::ByteRange;
use crate::extractor::Grammar;

/// Stable identifier of an open document: its normalized path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn from_path(path: &Path) -> Self {
        Self(path.to_string_lossy().replace('\\', "/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 0-based line and UTF-16 column, the convention editors use for positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditError {
    #[error("range {range} is out of bounds for a document of {len} bytes")]
    OutOfBounds { range: ByteRange, len: usize },

    #[error("range {range} does not fall on character boundaries")]
    NotCharBoundary { range: ByteRange },
}

/// An in-memory text buffer. Every successful edit bumps `version`.
#[derive(Debug, Clone)]
pub struct Document {
    id: DocumentId,
    path: PathBuf,
    text: String,
    version: u64,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            id: DocumentId::from_path(&path),
            path,
            text: text.into(),
            version: 0,
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Self::new(path, text))
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Grammar inferred from the document's extension.
    pub fn grammar(&self) -> Option<Grammar> {
        Grammar::for_path(&self.path)
    }

    pub fn slice(&self, range: ByteRange) -> Option<&str> {
        range.slice(&self.text)
    }

    /// Convert a byte offset to a line/character position. Offsets past the end
    /// clamp to the end of the document; offsets inside a multi-byte character
    /// resolve to the start of that character.
    pub fn position_at(&self, offset: usize) -> Position {
        let mut offset = offset.min(self.text.len());
        while !self.text.is_char_boundary(offset) {
            offset -= 1;
        }

        let before = &self.text[..offset];
        let line = before.matches('\n').count();
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let character: usize = before[line_start..].chars().map(char::len_utf16).sum();

        Position {
            line: line as u32,
            character: character as u32,
        }
    }

    /// Replace exactly one contiguous range. Either the whole edit applies or
    /// the document is left untouched.
    pub fn replace(&mut self, range: ByteRange, replacement: &str) -> Result<(), EditError> {
        if range.start > range.end || range.end > self.text.len() {
            return Err(EditError::OutOfBounds {
                range,
                len: self.text.len(),
            });
        }
        if !self.text.is_char_boundary(range.start) || !self.text.is_char_boundary(range.end) {
            return Err(EditError::NotCharBoundary { range });
        }

        self.text.replace_range(range.start..range.end, replacement);
        self.version += 1;
        Ok(())
    }

    /// Write the buffer back to its path via a temp file + rename.
    pub fn save(&self) -> Result<()> {
        let tmp_path = self.path.with_extension("git-rescue.tmp");
        fs::write(&tmp_path, &self.text)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        // Keep the original's mode bits; the temp file was created with defaults.
        if let Ok(meta) = fs::metadata(&self.path) {
            fs::set_permissions(&tmp_path, meta.permissions())
                .with_context(|| format!("Failed to copy permissions onto {}", tmp_path.display()))?;
        }
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to rename {} to {}", tmp_path.display(), self.path.display()))?;
        Ok(())
    }
}
