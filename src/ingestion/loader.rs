//! Parse raw files into documents.
//!
//! PDFs yield one document per page with a 1-based `page_number`; DOCX, plain text, and Markdown
//! yield one document per file. The format is decided from the extension before any I/O.

use crate::document::{Document, DocumentMetadata};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Extensions accepted by the loader.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["pdf", "docx", "txt", "md"];

/// Errors raised while loading files.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Extension is not one of [`SUPPORTED_EXTENSIONS`].
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),
    /// Path does not exist.
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),
    /// Directory load was pointed at something else.
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    /// Reading the file failed.
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Content could not be parsed.
    #[error("Could not parse {file}: {reason}")]
    Corrupt {
        /// File name.
        file: String,
        /// Parser message.
        reason: String,
    },
    /// File parsed but held no text.
    #[error("No extractable text in {0}")]
    NoText(String),
}

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// Portable Document Format.
    Pdf,
    /// Office Open XML word processing document.
    Docx,
    /// UTF-8 plain text.
    Text,
    /// UTF-8 Markdown.
    Markdown,
}

impl DocumentFormat {
    /// Determine the format from a file name's extension.
    pub fn from_filename(filename: &str) -> Result<Self, LoaderError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "txt" => Ok(Self::Text),
            "md" => Ok(Self::Markdown),
            _ => Err(LoaderError::UnsupportedFormat(if extension.is_empty() {
                filename.to_string()
            } else {
                format!(".{extension}")
            })),
        }
    }
}

/// Files that failed during a directory load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadFailure {
    /// Offending file.
    pub path: PathBuf,
    /// Error message.
    pub error: String,
}

/// Parse `bytes` named `filename`. `base` supplies department, type, and access level.
pub fn load_bytes(
    filename: &str,
    bytes: &[u8],
    base: &DocumentMetadata,
) -> Result<Vec<Document>, LoaderError> {
    let format = DocumentFormat::from_filename(filename)?;
    let pages = match format {
        DocumentFormat::Pdf => pdf_pages(filename, bytes)?,
        DocumentFormat::Docx => vec![(None, docx_text(filename, bytes)?)],
        DocumentFormat::Text | DocumentFormat::Markdown => vec![(None, utf8_text(filename, bytes)?)],
    };

    let documents: Vec<Document> = pages
        .into_iter()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(page_number, content)| {
            let mut metadata = base.clone();
            metadata.source = filename.to_string();
            metadata.page_number = page_number;
            Document { content, metadata }
        })
        .collect();

    if documents.is_empty() {
        return Err(LoaderError::NoText(filename.to_string()));
    }
    tracing::debug!(source = filename, documents = documents.len(), format = ?format, "Loaded file");
    Ok(documents)
}

/// Read the raw bytes of the file at `path`. Unsupported formats are rejected before any I/O.
pub async fn read_file(path: &Path) -> Result<Vec<u8>, LoaderError> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| LoaderError::UnsupportedFormat(path.display().to_string()))?;
    DocumentFormat::from_filename(filename)?;

    let bytes = tokio::fs::read(path).await.map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            LoaderError::NotFound(path.to_path_buf())
        } else {
            LoaderError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "Read file");
    Ok(bytes)
}

/// Supported, non-hidden files under `dir`, recursively, in path order.
pub fn supported_files(dir: &Path) -> Result<Vec<PathBuf>, LoaderError> {
    if !dir.exists() {
        return Err(LoaderError::NotFound(dir.to_path_buf()));
    }
    if !dir.is_dir() {
        return Err(LoaderError::NotADirectory(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(error = %error, "Skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if name.starts_with('.') || DocumentFormat::from_filename(name).is_err() {
            continue;
        }
        files.push(entry.into_path());
    }
    Ok(files)
}

fn corrupt(filename: &str, reason: impl ToString) -> LoaderError {
    LoaderError::Corrupt {
        file: filename.to_string(),
        reason: reason.to_string(),
    }
}

fn utf8_text(filename: &str, bytes: &[u8]) -> Result<String, LoaderError> {
    let text = std::str::from_utf8(bytes).map_err(|error| corrupt(filename, error))?;
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

fn pdf_pages(filename: &str, bytes: &[u8]) -> Result<Vec<(Option<u32>, String)>, LoaderError> {
    let document = lopdf::Document::load_mem(bytes).map_err(|error| corrupt(filename, error))?;
    let mut pages = Vec::new();
    for page_number in document.get_pages().keys() {
        match document.extract_text(&[*page_number]) {
            Ok(text) => pages.push((Some(*page_number), text)),
            Err(error) => {
                tracing::warn!(source = filename, page = page_number, error = %error, "Skipping unreadable PDF page");
            }
        }
    }
    Ok(pages)
}

fn docx_text(filename: &str, bytes: &[u8]) -> Result<String, LoaderError> {
    let docx = docx_rs::read_docx(bytes).map_err(|error| corrupt(filename, error))?;
    let mut content = String::new();
    for child in docx.document.children {
        if let docx_rs::DocumentChild::Paragraph(paragraph) = child {
            for child in paragraph.children {
                if let docx_rs::ParagraphChild::Run(run) = child {
                    for child in run.children {
                        if let docx_rs::RunChild::Text(text) = child {
                            content.push_str(&text.text);
                        }
                    }
                }
            }
            content.push('\n');
        }
    }
    Ok(content)
}
