//! Query paraphrasing for multi-query retrieval.
//!
//! Expansion is a separate fallible call with its own retry policy; the orchestrator decides what
//! to do when it fails.

use crate::generation::{GenerationError, GenerationRequest, LanguageModel};
use crate::retry::{RetryPolicy, with_retry};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

const EXPANSION_MAX_TOKENS: u32 = 256;

/// Errors raised while generating query variants.
#[derive(Debug, Error)]
pub enum ExpansionError {
    /// Generative model call failed.
    #[error("Query expansion failed: {0}")]
    Generation(#[from] GenerationError),
    /// Model answered but no usable variant could be parsed.
    #[error("Query expansion produced no variants")]
    NoVariants,
}

/// Generates alternative phrasings of a query with a language model.
pub struct QueryExpander {
    model: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    variants: usize,
    temperature: f32,
}

impl QueryExpander {
    /// Request `variants` paraphrases per query, bounding each call by `retry`.
    pub fn new(
        model: Arc<dyn LanguageModel>,
        retry: RetryPolicy,
        variants: usize,
        temperature: f32,
    ) -> Self {
        Self {
            model,
            retry,
            variants: variants.max(1),
            temperature,
        }
    }

    /// Paraphrase `query`. Returns between one and the configured number of distinct variants.
    pub async fn expand(&self, query: &str) -> Result<Vec<String>, ExpansionError> {
        let request = GenerationRequest {
            prompt: expansion_prompt(query, self.variants),
            temperature: self.temperature,
            max_tokens: EXPANSION_MAX_TOKENS,
        };
        let text = with_retry("expand_query", &self.retry, || self.model.generate(&request)).await?;
        let variants = parse_variants(&text, self.variants);
        if variants.is_empty() {
            return Err(ExpansionError::NoVariants);
        }
        tracing::debug!(variants = variants.len(), "Expanded query");
        Ok(variants)
    }
}

fn expansion_prompt(query: &str, variants: usize) -> String {
    format!(
        "You help search an internal document collection. Write {variants} different versions of \
         the user question below so that together they retrieve more relevant passages from a \
         vector database. Vary wording and perspective but keep the meaning. Put each version on \
         its own line with no numbering or commentary.\n\nOriginal question: {query}"
    )
}

/// Split model output into distinct, cleaned query lines.
pub(crate) fn parse_variants(text: &str, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    text.lines()
        .map(strip_list_marker)
        .map(|line| line.trim_matches('"').trim())
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(line.to_lowercase()))
        .take(limit)
        .map(str::to_string)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let after_digits = line.trim_start_matches(|c: char| c.is_ascii_digit());
    if after_digits.len() < line.len()
        && let Some(rest) = after_digits
            .strip_prefix('.')
            .or_else(|| after_digits.strip_prefix(')'))
            .filter(|rest| rest.starts_with(char::is_whitespace))
    {
        return rest.trim();
    }
    line.trim_start_matches(['-', '*', '•']).trim()
}
