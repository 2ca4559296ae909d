//! Error taxonomy reported at the outer boundary.
//!
//! Component errors are converted here. Storage and unclassified failures are logged in full during
//! conversion and reach callers only as a generic message.

use crate::embedding::EmbeddingError;
use crate::generation::GenerationError;
use crate::index::IndexError;
use crate::ingestion::{LoaderError, SplitterError, ValidationError};
use crate::retrieval::RetrievalError;
use crate::synthesis::SynthesisError;
use thiserror::Error;

const INTERNAL_MESSAGE: &str = "An internal error occurred";
const PROVIDER_MESSAGE: &str = "A model provider request failed; please try again later";

/// Errors returned by [`crate::pipeline::KnowledgeBase`] operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// Caller input was rejected. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),
    /// A file or directory does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
    /// Embedding or generation backend failed after retries.
    #[error("Provider error: {0}")]
    Provider(String),
    /// Vector index read or write failed.
    #[error("Storage error: {0}")]
    Storage(String),
    /// Anything else.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RagError {
    /// Caller-safe description. Storage and internal details are withheld.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(message) | Self::NotFound(message) => message.clone(),
            Self::Provider(_) => PROVIDER_MESSAGE.to_string(),
            Self::Storage(_) | Self::Internal(_) => INTERNAL_MESSAGE.to_string(),
        }
    }

    /// Short machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Provider(_) => "provider",
            Self::Storage(_) => "storage",
            Self::Internal(_) => "internal",
        }
    }

    fn provider(error: &dyn std::fmt::Display) -> Self {
        tracing::warn!(error = %error, "Provider failure");
        Self::Provider(error.to_string())
    }

    fn storage(error: &dyn std::fmt::Display) -> Self {
        tracing::error!(error = %error, "Index storage failure");
        Self::Storage(error.to_string())
    }

    fn internal(error: &dyn std::fmt::Display) -> Self {
        tracing::error!(error = %error, "Unclassified failure");
        Self::Internal(error.to_string())
    }
}

impl From<ValidationError> for RagError {
    fn from(error: ValidationError) -> Self {
        Self::Validation(error.to_string())
    }
}

impl From<LoaderError> for RagError {
    fn from(error: LoaderError) -> Self {
        match error {
            LoaderError::UnsupportedFormat(_)
            | LoaderError::Corrupt { .. }
            | LoaderError::NoText(_) => Self::Validation(error.to_string()),
            LoaderError::NotFound(_) | LoaderError::NotADirectory(_) => {
                Self::NotFound(error.to_string())
            }
            LoaderError::Io { .. } => Self::internal(&error),
        }
    }
}

impl From<SplitterError> for RagError {
    fn from(error: SplitterError) -> Self {
        Self::internal(&error)
    }
}

impl From<EmbeddingError> for RagError {
    fn from(error: EmbeddingError) -> Self {
        match error {
            EmbeddingError::EmptyInput => Self::Validation(error.to_string()),
            _ => Self::provider(&error),
        }
    }
}

impl From<GenerationError> for RagError {
    fn from(error: GenerationError) -> Self {
        Self::provider(&error)
    }
}

impl From<IndexError> for RagError {
    fn from(error: IndexError) -> Self {
        match error {
            IndexError::Embedding(error) => error.into(),
            IndexError::Storage(error) => Self::storage(&error),
        }
    }
}

impl From<RetrievalError> for RagError {
    fn from(error: RetrievalError) -> Self {
        match error {
            RetrievalError::Index(error) => error.into(),
        }
    }
}

impl From<SynthesisError> for RagError {
    fn from(error: SynthesisError) -> Self {
        match error {
            SynthesisError::Generation(error) => error.into(),
            SynthesisError::EmptyAnswer => Self::provider(&error),
        }
    }
}
