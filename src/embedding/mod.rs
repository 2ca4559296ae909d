//! Embedding client abstraction and provider adapters.
//!
//! Adapters only translate requests; timeouts and retries are applied by callers through
//! [`crate::retry::with_retry`]. Every adapter validates its output with [`check_batch`] so a
//! short, empty, or wrongly sized response becomes an error instead of a partial result.

mod gemini;
mod hash;
mod ollama;

pub use gemini::GeminiEmbeddingClient;
pub use hash::HashEmbeddingClient;
pub use ollama::OllamaEmbeddingClient;

use crate::config::{Config, EmbeddingProvider};
use crate::retry::RetryableError;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Request did not complete within its deadline.
    #[error("Embedding request timed out after {0:?}")]
    Timeout(Duration),
    /// HTTP layer failed before a response was received.
    #[error("Embedding HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Provider answered with a non-success status.
    #[error("Embedding provider returned {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Response body, for diagnostics.
        body: String,
    },
    /// Provider response could not be decoded.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
    /// Provider returned a different number of vectors than inputs.
    #[error("Embedding provider returned {actual} vectors for {expected} inputs")]
    CountMismatch {
        /// Number of inputs sent.
        expected: usize,
        /// Number of vectors received.
        actual: usize,
    },
    /// Returned vector length does not match the configured dimension.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimension.
        expected: usize,
        /// Dimension produced by the provider.
        actual: usize,
    },
    /// Input text had nothing to embed.
    #[error("Cannot embed empty text")]
    EmptyInput,
    /// Provider is misconfigured (missing key, bad URL).
    #[error("Embedding provider misconfigured: {0}")]
    Configuration(String),
}

impl RetryableError for EmbeddingError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Http(error) => error.is_timeout() || error.is_connect() || error.is_request(),
            Self::UnexpectedStatus { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            _ => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        Self::Timeout(after)
    }
}

/// Interface implemented by embedding backends.
///
/// Implementations are deterministic for a fixed model version, preserve input order and length,
/// and never return a zero or partial vector: failures are errors.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce one vector per input text, in input order.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Produce a vector for a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_many(&[text.to_string()]).await?;
        vectors.pop().ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            actual: 0,
        })
    }

    /// Fixed dimension of every produced vector.
    fn dimension(&self) -> usize;

    /// Model identifier reported in index statistics.
    fn model_id(&self) -> &str;
}

/// Build the embedding client selected by configuration.
pub fn build_embedding_client(
    config: &Config,
) -> Result<Arc<dyn EmbeddingClient>, EmbeddingError> {
    tracing::info!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        dimension = config.embedding_dimension,
        "Initializing embedding client"
    );
    if config.embedding_dimension == 0 {
        return Err(EmbeddingError::Configuration(
            "embedding dimension must be greater than zero".into(),
        ));
    }

    let client: Arc<dyn EmbeddingClient> = match config.embedding_provider {
        EmbeddingProvider::Hash => Arc::new(HashEmbeddingClient::new(config.embedding_dimension)),
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbeddingClient::new(
            &config.ollama_url,
            &config.embedding_model,
            config.embedding_dimension,
            config.provider_timeout,
        )?),
        EmbeddingProvider::Gemini => {
            let api_key = config.google_api_key.clone().ok_or_else(|| {
                EmbeddingError::Configuration("GOOGLE_API_KEY is not set".into())
            })?;
            Arc::new(GeminiEmbeddingClient::new(
                &config.gemini_base_url,
                api_key,
                &config.embedding_model,
                config.embedding_dimension,
                config.provider_timeout,
            )?)
        }
    };
    Ok(client)
}

/// Validate a provider batch: one vector per input, each of the expected dimension.
pub(crate) fn check_batch(
    expected_count: usize,
    dimension: usize,
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if vectors.len() != expected_count {
        return Err(EmbeddingError::CountMismatch {
            expected: expected_count,
            actual: vectors.len(),
        });
    }
    for vector in &vectors {
        if vector.len() != dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().all(|value| *value == 0.0) {
            return Err(EmbeddingError::InvalidResponse(
                "provider returned an all-zero vector".into(),
            ));
        }
    }
    Ok(vectors)
}
