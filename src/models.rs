//! Core data models shared by the loader, chunker, index, and manager.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Format tag derived from a file's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// `.txt` / `.md`, read as UTF-8.
    PlainText,
    /// `.pdf`, extracted page by page.
    Paginated,
    /// `.docx`, text runs from `word/document.xml`.
    WordProcessor,
    Unsupported,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "txt" | "md" => SourceFormat::PlainText,
            "pdf" => SourceFormat::Paginated,
            "docx" => SourceFormat::WordProcessor,
            _ => SourceFormat::Unsupported,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::PlainText => "text",
            SourceFormat::Paginated => "pdf",
            SourceFormat::WordProcessor => "docx",
            SourceFormat::Unsupported => "unsupported",
        }
    }
}

/// A file in the knowledge-base directory. Read-only to this crate.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub format: SourceFormat,
}

impl SourceDocument {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = SourceFormat::from_path(&path);
        Self { path, format }
    }

    /// File name used as the chunk's `source` label.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// One contiguous, word-bounded slice of a document.
///
/// `id` is the chunk's position in the global chunk sequence and is the
/// key every index vector carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: u64,
    pub source: String,
    /// Position within its source document.
    pub position: usize,
    pub text: String,
}

/// A retrieved chunk with its squared L2 distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk_id: u64,
    pub source: String,
    pub distance: f32,
    pub text: String,
}
