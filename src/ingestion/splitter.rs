//! Recursive, boundary-aware character splitter.
//!
//! Text is cut at the coarsest separator that occurs in it (paragraph, line, sentence, word, then
//! character) and any piece still too long is cut again with the next finer separator. Pieces keep
//! their trailing separator, so the pieces of a text concatenate back to it exactly. Pieces are
//! then packed greedily into chunk bodies, and every chunk after the first is prefixed with the
//! `chunk_overlap` characters that precede its body in the source. Bodies holding nothing but
//! whitespace are dropped.
//!
//! Lengths are measured in characters, not bytes.

use crate::document::{Chunk, ChunkMetadata, Document};
use std::ops::Range;
use thiserror::Error;

/// Separators tried in order, coarsest first. The empty separator splits between characters.
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Invalid splitter settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SplitterError {
    /// Chunk size of zero.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap that leaves no room for new text.
    #[error("chunk overlap {overlap} must be smaller than chunk size {chunk_size}")]
    InvalidOverlap {
        /// Requested overlap.
        overlap: usize,
        /// Requested chunk size.
        chunk_size: usize,
    },
}

/// Splits documents into overlapping chunks.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
    section_key: Option<String>,
}

impl TextSplitter {
    /// Splitter producing chunks of at most `chunk_size` characters sharing `chunk_overlap`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, SplitterError> {
        if chunk_size == 0 {
            return Err(SplitterError::InvalidChunkSize);
        }
        if chunk_overlap >= chunk_size {
            return Err(SplitterError::InvalidOverlap {
                overlap: chunk_overlap,
                chunk_size,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| (*s).to_string()).collect(),
            section_key: None,
        })
    }

    /// Replace the separator list. Without a trailing `""`, an oversized atomic piece is kept
    /// whole and its chunk may exceed the chunk size.
    pub fn with_separators<I, S>(mut self, separators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.separators = separators.into_iter().map(Into::into).collect();
        self
    }

    /// Copy the document extension value under `key` into each chunk's `section`.
    pub fn with_section_key(mut self, key: impl Into<String>) -> Self {
        self.section_key = Some(key.into());
        self
    }

    /// Split `text` into chunk strings. Whitespace-only text yields nothing, and no chunk is
    /// built around a whitespace-only body.
    pub fn split_text<'a>(&self, text: &'a str) -> Vec<&'a str> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let piece_limit = self.chunk_size - self.chunk_overlap;
        let mut pieces = Vec::new();
        split_ranges(text, 0, &self.separators, piece_limit, &mut pieces);

        let bodies = self.merge(text, pieces);
        bodies
            .into_iter()
            .enumerate()
            .filter(|(_, body)| !text[body.clone()].trim().is_empty())
            .map(|(index, body)| {
                let start = if index == 0 {
                    body.start
                } else {
                    overlap_start(text, body.start, self.chunk_overlap)
                };
                &text[start..body.end]
            })
            .collect()
    }

    /// Split every document, numbering chunks per document.
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for document in documents {
            let pieces = self.split_text(&document.content);
            let total = pieces.len();
            let section = self
                .section_key
                .as_ref()
                .and_then(|key| document.metadata.extra.get(key))
                .cloned();
            for (index, piece) in pieces.into_iter().enumerate() {
                let mut metadata = ChunkMetadata::from_document(
                    &document.metadata,
                    index,
                    total,
                    piece.chars().count(),
                );
                if section.is_some() {
                    metadata.section = section.clone();
                }
                chunks.push(Chunk {
                    content: piece.to_string(),
                    metadata,
                });
            }
            tracing::debug!(
                source = %document.metadata.source,
                page = ?document.metadata.page_number,
                chunks = total,
                "Split document"
            );
        }
        chunks
    }

    /// Pack pieces greedily. The first body may use the whole chunk size. Later bodies are held to
    /// `chunk_size - chunk_overlap` characters, so body plus overlap prefix stays within the chunk
    /// size; the prefix is exactly `chunk_overlap` characters whenever that many precede the body.
    fn merge(&self, text: &str, pieces: Vec<Range<usize>>) -> Vec<Range<usize>> {
        let mut bodies: Vec<Range<usize>> = Vec::new();
        let mut current: Option<Range<usize>> = None;
        let mut current_len = 0;

        for piece in pieces {
            let len = text[piece.clone()].chars().count();
            let budget = if bodies.is_empty() {
                self.chunk_size
            } else {
                self.chunk_size - self.chunk_overlap
            };
            match current.as_mut() {
                Some(body) if current_len + len <= budget => {
                    body.end = piece.end;
                    current_len += len;
                }
                _ => {
                    if let Some(done) = current.take() {
                        bodies.push(done);
                    }
                    current = Some(piece);
                    current_len = len;
                }
            }
        }
        if let Some(done) = current {
            bodies.push(done);
        }
        bodies
    }
}

fn split_ranges(
    text: &str,
    offset: usize,
    separators: &[String],
    limit: usize,
    out: &mut Vec<Range<usize>>,
) {
    if text.chars().count() <= limit {
        out.push(offset..offset + text.len());
        return;
    }
    let Some((index, separator)) = separators
        .iter()
        .enumerate()
        .find(|(_, separator)| separator.is_empty() || text.contains(separator.as_str()))
    else {
        out.push(offset..offset + text.len());
        return;
    };

    if separator.is_empty() {
        let mut start = 0;
        let mut count = 0;
        for (position, _) in text.char_indices() {
            if count == limit {
                out.push(offset + start..offset + position);
                start = position;
                count = 0;
            }
            count += 1;
        }
        out.push(offset + start..offset + text.len());
        return;
    }

    let finer = &separators[index + 1..];
    let mut position = 0;
    for part in text.split_inclusive(separator.as_str()) {
        split_ranges(part, offset + position, finer, limit, out);
        position += part.len();
    }
}

/// Byte offset where the `overlap` characters preceding `body_start` begin.
fn overlap_start(text: &str, body_start: usize, overlap: usize) -> usize {
    if overlap == 0 {
        return body_start;
    }
    text[..body_start]
        .char_indices()
        .rev()
        .nth(overlap - 1)
        .map_or(0, |(position, _)| position)
}
