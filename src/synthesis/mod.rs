//! Grounded answer generation from retrieved chunks.
//!
//! An empty retrieval short-circuits to [`SENTINEL_ANSWER`] without calling the model. Otherwise the
//! chunks are rendered into a numbered context block, trimmed to the token budget, and sent to the
//! model with a fixed instruction contract.

use crate::generation::{GenerationError, GenerationRequest, LanguageModel};
use crate::index::RetrievedChunk;
use crate::retry::{RetryPolicy, with_retry};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Answer returned when no permitted chunk matched the query.
pub const SENTINEL_ANSWER: &str =
    "I don't have any relevant information in the knowledge base to answer this question.";

/// Characters of chunk content kept in a source preview.
pub const SOURCE_PREVIEW_CHARS: usize = 200;

const INSTRUCTIONS: &str = "You are KnowFlow, an enterprise knowledge assistant.

Answer the question using only the numbered context documents below.
Rules:
- If the context does not contain the answer, reply exactly: \"I don't have this information in the knowledge base.\"
- Cite the documents you used by source name, and page when given.
- Use bullet points when the question has several parts.
- Be accurate and concise. Do not add facts that are not in the context.";

type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Errors raised while synthesizing an answer.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Generative model call failed after retries.
    #[error("Answer generation failed: {0}")]
    Generation(#[from] GenerationError),
    /// Model returned only whitespace.
    #[error("Model returned an empty answer")]
    EmptyAnswer,
}

/// Metadata attached to each cited source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceMetadata {
    /// Originating file name.
    pub source: String,
    /// Section heading, when known.
    pub section: Option<String>,
    /// 1-based page number for paged formats.
    pub page: Option<u32>,
    /// Owning department.
    pub department: String,
    /// Document classification.
    pub doc_type: String,
    /// Access level label.
    pub access_level: String,
}

/// A retrieved chunk as presented to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    /// Content preview of at most [`SOURCE_PREVIEW_CHARS`] characters, plus `...` when cut.
    pub content: String,
    /// Chunk metadata.
    pub metadata: SourceMetadata,
    /// Relevance score from retrieval.
    pub score: f32,
}

impl From<&RetrievedChunk> for Source {
    fn from(hit: &RetrievedChunk) -> Self {
        let metadata = &hit.chunk.metadata;
        Self {
            content: preview(&hit.chunk.content),
            metadata: SourceMetadata {
                source: metadata.source.clone(),
                section: metadata.section.clone(),
                page: metadata.page_number,
                department: metadata.department.clone(),
                doc_type: metadata.doc_type.clone(),
                access_level: metadata.access_level.clone(),
            },
            score: hit.score,
        }
    }
}

/// Synthesized answer with its supporting sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    /// Answer text.
    pub text: String,
    /// One entry per retrieved chunk, in retrieval order.
    pub sources: Vec<Source>,
    /// True when the sentinel was returned without a model call.
    pub sentinel: bool,
}

/// Produces answers from retrieved context with a generative model.
pub struct AnswerSynthesizer {
    model: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    temperature: f32,
    max_tokens: u32,
    max_context_tokens: usize,
    count_tokens: TokenCounter,
}

impl AnswerSynthesizer {
    /// Synthesizer that keeps the context block within `max_context_tokens`.
    pub fn new(
        model: Arc<dyn LanguageModel>,
        retry: RetryPolicy,
        temperature: f32,
        max_tokens: u32,
        max_context_tokens: usize,
    ) -> Self {
        Self {
            model,
            retry,
            temperature,
            max_tokens,
            max_context_tokens,
            count_tokens: token_counter(),
        }
    }

    /// Answer `query` from `chunks`.
    pub async fn synthesize(
        &self,
        query: &str,
        chunks: &[RetrievedChunk],
    ) -> Result<Answer, SynthesisError> {
        if chunks.is_empty() {
            tracing::info!("No permitted context for query, returning sentinel answer");
            return Ok(Answer {
                text: SENTINEL_ANSWER.to_string(),
                sources: Vec::new(),
                sentinel: true,
            });
        }

        let (context, used) = build_context(chunks, &self.count_tokens, self.max_context_tokens);
        if used < chunks.len() {
            tracing::debug!(
                used,
                retrieved = chunks.len(),
                budget = self.max_context_tokens,
                "Context trimmed to token budget"
            );
        }
        let request = GenerationRequest {
            prompt: build_prompt(&context, query),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let text = with_retry("synthesize_answer", &self.retry, || {
            self.model.generate(&request)
        })
        .await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(SynthesisError::EmptyAnswer);
        }

        tracing::info!(
            model = self.model.model_id(),
            context_documents = used,
            "Synthesized answer"
        );
        Ok(Answer {
            text: text.to_string(),
            sources: chunks.iter().map(Source::from).collect(),
            sentinel: false,
        })
    }
}

fn build_prompt(context: &str, query: &str) -> String {
    format!("{INSTRUCTIONS}\n\nContext:\n{context}\n\nQuestion: {query}\n\nAnswer:")
}

/// Render one context entry: `[Document n: source - section (Page p)]` then the content.
fn context_entry(position: usize, hit: &RetrievedChunk) -> String {
    let metadata = &hit.chunk.metadata;
    let mut header = format!("[Document {position}: {}", metadata.source);
    if let Some(section) = &metadata.section {
        header.push_str(" - ");
        header.push_str(section);
    }
    if let Some(page) = metadata.page_number {
        header.push_str(&format!(" (Page {page})"));
    }
    header.push(']');
    format!("{header}\n{}\n", hit.chunk.content)
}

/// Numbered context block within `budget` tokens and the number of entries it holds.
///
/// The first entry is always kept; later entries are dropped once one would exceed the budget.
fn build_context(
    chunks: &[RetrievedChunk],
    count_tokens: &TokenCounter,
    budget: usize,
) -> (String, usize) {
    let mut entries = Vec::with_capacity(chunks.len());
    let mut spent = 0;
    for (index, hit) in chunks.iter().enumerate() {
        let entry = context_entry(index + 1, hit);
        let cost = count_tokens(&entry);
        if index > 0 && spent + cost > budget {
            break;
        }
        spent += cost;
        entries.push(entry);
    }
    let used = entries.len();
    (entries.join("\n"), used)
}

fn preview(content: &str) -> String {
    match content.char_indices().nth(SOURCE_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

fn token_counter() -> TokenCounter {
    match tiktoken_rs::cl100k_base() {
        Ok(encoding) => {
            let encoding = Arc::new(encoding);
            Arc::new(move |segment: &str| encoding.encode_ordinary(segment).len())
        }
        Err(error) => {
            tracing::warn!(error = %error, "Tokenizer unavailable; falling back to whitespace counter");
            whitespace_counter()
        }
    }
}

fn whitespace_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Chunk, ChunkMetadata, DocumentMetadata};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Recorder {
        reply: &'static str,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for Recorder {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
            self.prompts
                .lock()
                .unwrap()
                .push(request.prompt.clone());
            Ok(self.reply.to_string())
        }

        fn model_id(&self) -> &str {
            "recorder"
        }
    }

    fn recorder(reply: &'static str) -> Arc<Recorder> {
        Arc::new(Recorder {
            reply,
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn synthesizer(model: Arc<Recorder>, budget: usize) -> AnswerSynthesizer {
        AnswerSynthesizer::new(
            model,
            RetryPolicy::no_retry(Duration::from_secs(5)),
            0.2,
            256,
            budget,
        )
    }

    fn hit(content: &str, source: &str, page: Option<u32>, section: Option<&str>) -> RetrievedChunk {
        let mut document = DocumentMetadata::for_source(source);
        document.department = "HR".into();
        document.page_number = page;
        document.section = section.map(str::to_string);
        RetrievedChunk {
            id: format!("{source}-{}", content.len()),
            chunk: Chunk {
                content: content.to_string(),
                metadata: ChunkMetadata::from_document(&document, 0, 1, content.chars().count()),
            },
            score: 0.8,
        }
    }

    #[tokio::test]
    async fn empty_context_returns_sentinel_without_model_call() {
        let model = recorder("unused");
        let answer = synthesizer(model.clone(), 1000)
            .synthesize("What is the leave policy?", &[])
            .await
            .unwrap();
        assert_eq!(answer.text, SENTINEL_ANSWER);
        assert!(answer.sentinel);
        assert!(answer.sources.is_empty());
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn prompt_numbers_and_tags_context_entries() {
        let model = recorder("  - 20 days per year (handbook.pdf, page 3)  ");
        let chunks = vec![
            hit("Employees get 20 days.", "handbook.pdf", Some(3), Some("Leave")),
            hit("Carry over is capped.", "faq.md", None, None),
        ];
        let answer = synthesizer(model.clone(), 1000)
            .synthesize("How much leave?", &chunks)
            .await
            .unwrap();

        assert_eq!(answer.text, "- 20 days per year (handbook.pdf, page 3)");
        assert!(!answer.sentinel);
        assert_eq!(answer.sources.len(), 2);
        assert_eq!(answer.sources[0].metadata.page, Some(3));
        assert_eq!(answer.sources[0].metadata.section.as_deref(), Some("Leave"));

        let prompts = model.prompts.lock().unwrap();
        let prompt = &prompts[0];
        assert!(prompt.contains("[Document 1: handbook.pdf - Leave (Page 3)]\nEmployees get 20 days.\n"));
        assert!(prompt.contains("[Document 2: faq.md]\nCarry over is capped.\n"));
        assert!(prompt.contains("I don't have this information in the knowledge base."));
        assert!(prompt.ends_with("Question: How much leave?\n\nAnswer:"));
    }

    #[tokio::test]
    async fn blank_model_output_is_an_error() {
        let model = recorder("   ");
        let result = synthesizer(model, 1000)
            .synthesize("q", &[hit("content", "a.txt", None, None)])
            .await;
        assert!(matches!(result, Err(SynthesisError::EmptyAnswer)));
    }

    #[test]
    fn context_budget_keeps_first_entry_and_drops_the_rest() {
        let counter = whitespace_counter();
        let chunks = vec![
            hit(&"word ".repeat(50), "a.txt", None, None),
            hit(&"word ".repeat(50), "b.txt", None, None),
        ];
        let (context, used) = build_context(&chunks, &counter, 10);
        assert_eq!(used, 1);
        assert!(context.starts_with("[Document 1: a.txt]"));

        let (_, used) = build_context(&chunks, &counter, 1000);
        assert_eq!(used, 2);
    }

    #[test]
    fn previews_are_bounded_by_characters() {
        assert_eq!(preview("short"), "short");
        let long = "é".repeat(250);
        let cut = preview(&long);
        assert_eq!(cut.chars().count(), SOURCE_PREVIEW_CHARS + 3);
        assert!(cut.ends_with("..."));
        assert_eq!(preview(&"x".repeat(200)), "x".repeat(200));
    }
}
