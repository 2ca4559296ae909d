//! Helpers for validating uploads and normalizing metadata values.
//!
//! Everything here runs once per ingestion; stored metadata is trusted afterwards.

use crate::document::{
    DEFAULT_ACCESS_LEVEL, DEFAULT_DEPARTMENT, DEFAULT_DOC_TYPE, DocumentMetadata,
    MAX_EXTRA_FIELDS,
};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Longest accepted filename, in characters.
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Rejected ingestion input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Filename was blank.
    #[error("Filename is required")]
    EmptyFilename,
    /// Filename exceeded [`MAX_FILENAME_LENGTH`].
    #[error("Filename too long ({0} characters)")]
    FilenameTooLong(usize),
    /// Filename started with a dot.
    #[error("Hidden files are not accepted: {0}")]
    HiddenFile(String),
    /// Upload contained no bytes.
    #[error("File is empty")]
    EmptyFile,
    /// Upload exceeded the configured size limit.
    #[error("File size {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge {
        /// Upload size in bytes.
        size: usize,
        /// Configured limit in bytes.
        limit: usize,
    },
    /// Extension map had too many entries.
    #[error("Too many metadata fields ({0}, max {MAX_EXTRA_FIELDS})")]
    TooManyExtraFields(usize),
    /// Extension map had a blank key.
    #[error("Metadata field names must not be empty")]
    EmptyExtraKey,
}

/// Caller-supplied metadata for an ingestion request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestMetadata {
    /// Owning department.
    pub department: Option<String>,
    /// Document classification.
    pub doc_type: Option<String>,
    /// Access level label.
    pub access_level: Option<String>,
    /// Optional section heading.
    pub section: Option<String>,
    /// Additional key/value pairs, bounded by [`MAX_EXTRA_FIELDS`].
    pub extra: BTreeMap<String, String>,
}

/// Trim a value and drop it when empty.
pub(crate) fn sanitize_string(value: Option<&str>) -> Option<String> {
    value.and_then(|input| {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Check an uploaded filename and return its final path component, trimmed.
///
/// Directory parts are discarded, so `../hr/salaries.txt` is stored as `salaries.txt`.
pub fn validate_filename(filename: &str) -> Result<String, ValidationError> {
    let trimmed = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyFilename);
    }
    let length = trimmed.chars().count();
    if length > MAX_FILENAME_LENGTH {
        return Err(ValidationError::FilenameTooLong(length));
    }
    if trimmed.starts_with('.') {
        return Err(ValidationError::HiddenFile(trimmed.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Check upload size against `limit` bytes.
pub fn validate_size(size: usize, limit: usize) -> Result<(), ValidationError> {
    if size == 0 {
        return Err(ValidationError::EmptyFile);
    }
    if size > limit {
        return Err(ValidationError::FileTooLarge { size, limit });
    }
    Ok(())
}

/// Build document metadata for `source`, applying defaults and bounding the extension map.
pub fn normalize_metadata(
    source: &str,
    metadata: &IngestMetadata,
) -> Result<DocumentMetadata, ValidationError> {
    if metadata.extra.len() > MAX_EXTRA_FIELDS {
        return Err(ValidationError::TooManyExtraFields(metadata.extra.len()));
    }
    let mut extra = BTreeMap::new();
    for (key, value) in &metadata.extra {
        let key = key.trim();
        if key.is_empty() {
            return Err(ValidationError::EmptyExtraKey);
        }
        extra.insert(key.to_string(), value.trim().to_string());
    }

    Ok(DocumentMetadata {
        source: source.to_string(),
        page_number: None,
        department: sanitize_string(metadata.department.as_deref())
            .unwrap_or_else(|| DEFAULT_DEPARTMENT.to_string()),
        doc_type: sanitize_string(metadata.doc_type.as_deref())
            .unwrap_or_else(|| DEFAULT_DOC_TYPE.to_string()),
        access_level: sanitize_string(metadata.access_level.as_deref())
            .unwrap_or_else(|| DEFAULT_ACCESS_LEVEL.to_string()),
        section: sanitize_string(metadata.section.as_deref()),
        extra,
    })
}

/// Identifier reported for an ingested file: `{department}_{file stem}`.
pub fn document_identifier(department: &str, filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(filename);
    format!("{department}_{stem}")
}
