//! Generative language model abstraction.
//!
//! Used for answer synthesis and for paraphrasing queries in multi-query retrieval. Adapters issue
//! one HTTP request per call; deadlines and retries are applied by callers via
//! [`crate::retry::with_retry`].

mod gemini;
mod ollama;

pub use gemini::GeminiLanguageModel;
pub use ollama::OllamaLanguageModel;

use crate::config::{Config, GenerationProvider};
use crate::retry::RetryableError;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by generative model providers.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Request did not complete within its deadline.
    #[error("Generation request timed out after {0:?}")]
    Timeout(Duration),
    /// HTTP layer failed before a response was received.
    #[error("Generation HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Provider answered with a non-success status.
    #[error("Generation provider returned {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Response body, for diagnostics.
        body: String,
    },
    /// Provider response could not be decoded or held no text.
    #[error("Malformed generation response: {0}")]
    InvalidResponse(String),
    /// Provider is misconfigured.
    #[error("Generation provider misconfigured: {0}")]
    Configuration(String),
}

impl RetryableError for GenerationError {
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

/// Prompt and sampling settings for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Complete prompt text.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Output token cap.
    pub max_tokens: u32,
}

/// Interface implemented by generative model backends.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for `request`.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    /// Model identifier, for logs.
    fn model_id(&self) -> &str;
}

/// Build the generative model selected by configuration.
pub fn build_language_model(config: &Config) -> Result<Arc<dyn LanguageModel>, GenerationError> {
    tracing::info!(
        provider = ?config.generation_provider,
        model = %config.generation_model,
        "Initializing generative model"
    );
    let model: Arc<dyn LanguageModel> = match config.generation_provider {
        GenerationProvider::Ollama => Arc::new(OllamaLanguageModel::new(
            &config.ollama_url,
            &config.generation_model,
            config.provider_timeout,
        )?),
        GenerationProvider::Gemini => {
            let api_key = config.google_api_key.clone().ok_or_else(|| {
                GenerationError::Configuration("GOOGLE_API_KEY is not set".into())
            })?;
            Arc::new(GeminiLanguageModel::new(
                &config.gemini_base_url,
                api_key,
                &config.generation_model,
                config.provider_timeout,
            )?)
        }
    };
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_throttling_are_transient() {
        let unavailable = GenerationError::UnexpectedStatus {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        };
        let bad_request = GenerationError::UnexpectedStatus {
            status: StatusCode::BAD_REQUEST,
            body: String::new(),
        };
        assert!(unavailable.is_transient());
        assert!(!bad_request.is_transient());
        assert!(!GenerationError::InvalidResponse("empty".into()).is_transient());
    }

    #[test]
    fn gemini_requires_api_key() {
        let config = Config {
            generation_provider: GenerationProvider::Gemini,
            google_api_key: None,
            ..Config::default()
        };
        assert!(matches!(
            build_language_model(&config),
            Err(GenerationError::Configuration(_))
        ));
    }

    #[test]
    fn ollama_model_reports_its_id() {
        let config = Config {
            generation_provider: GenerationProvider::Ollama,
            generation_model: "llama3.1".into(),
            ..Config::default()
        };
        let model = build_language_model(&config).expect("ollama model");
        assert_eq!(model.model_id(), "llama3.1");
    }
}
