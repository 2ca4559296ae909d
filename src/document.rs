//! Documents produced by the loader and the chunks derived from them.
//!
//! Metadata is a fixed-field record. Anything that does not fit the fixed fields travels in a small
//! extension map that is validated once at ingestion (see [`crate::ingestion::sanitize`]) and never
//! re-checked at read time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum number of entries allowed in a metadata extension map.
pub const MAX_EXTRA_FIELDS: usize = 16;

/// Department assigned when the caller does not provide one.
pub const DEFAULT_DEPARTMENT: &str = "General";
/// Document type assigned when the caller does not provide one.
pub const DEFAULT_DOC_TYPE: &str = "Document";
/// Access level assigned when the caller does not provide one.
pub const DEFAULT_ACCESS_LEVEL: &str = "Employee";

/// Metadata attached to a loaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// File name the document was loaded from.
    pub source: String,
    /// 1-based page number for paginated formats.
    pub page_number: Option<u32>,
    /// Owning department, used by access filtering.
    pub department: String,
    /// Free-form document classification (`Policy`, `Manual`, ...).
    pub doc_type: String,
    /// Access level label carried for display and future policy use.
    pub access_level: String,
    /// Optional section heading.
    pub section: Option<String>,
    /// Bounded extension map for caller-provided keys.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl DocumentMetadata {
    /// Build metadata for `source` with the default department, type, and access level.
    pub fn for_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            page_number: None,
            department: DEFAULT_DEPARTMENT.to_string(),
            doc_type: DEFAULT_DOC_TYPE.to_string(),
            access_level: DEFAULT_ACCESS_LEVEL.to_string(),
            section: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Raw text unit produced by the loader: one per page for PDFs, one per file otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Extracted text.
    pub content: String,
    /// Source metadata.
    pub metadata: DocumentMetadata,
}

/// Metadata stored with every chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// File name of the originating document.
    pub source: String,
    /// Page of the originating document, when paginated.
    pub page_number: Option<u32>,
    /// Owning department.
    pub department: String,
    /// Document classification.
    pub doc_type: String,
    /// Access level label.
    pub access_level: String,
    /// Optional section heading.
    pub section: Option<String>,
    /// 0-based position of the chunk within its document.
    pub chunk_index: usize,
    /// Number of chunks produced for the originating document.
    pub total_chunks: usize,
    /// Length of the chunk content in characters.
    pub chunk_size: usize,
    /// Extension map inherited from the document.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// Bounded text slice of a document; the unit that is embedded, stored, and retrieved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk text.
    pub content: String,
    /// Inherited and derived metadata.
    pub metadata: ChunkMetadata,
}

impl ChunkMetadata {
    /// Copy document metadata onto a chunk at `chunk_index` of `total_chunks`.
    pub fn from_document(
        document: &DocumentMetadata,
        chunk_index: usize,
        total_chunks: usize,
        chunk_size: usize,
    ) -> Self {
        Self {
            source: document.source.clone(),
            page_number: document.page_number,
            department: document.department.clone(),
            doc_type: document.doc_type.clone(),
            access_level: document.access_level.clone(),
            section: document.section.clone(),
            chunk_index,
            total_chunks,
            chunk_size,
            extra: document.extra.clone(),
        }
    }
}
