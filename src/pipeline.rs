//! Application context coordinating ingestion and question answering.
//!
//! Ingestion: validate → load → split → embed and store, stopping at the first failing stage.
//! Query: validate → filter and retrieve → synthesize.

use crate::{
    access::DEFAULT_ROLE,
    config::Config,
    embedding::build_embedding_client,
    error::RagError,
    generation::{LanguageModel, build_language_model},
    index::{IndexStats, VectorIndex},
    ingestion::{
        DocumentFormat, IngestMetadata, LoadFailure, TextSplitter,
        loader::{load_bytes, read_file, supported_files},
        sanitize::{document_identifier, normalize_metadata, validate_filename, validate_size},
    },
    metrics::{KnowledgeMetrics, MetricsSnapshot},
    retrieval::{QueryExpander, RetrievalMethod, Retriever},
    synthesis::{AnswerSynthesizer, Source},
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Shortest accepted query, in characters after trimming.
pub const MIN_QUERY_CHARS: usize = 2;
/// Longest accepted query, in characters.
pub const MAX_QUERY_CHARS: usize = 1000;

/// Result of ingesting one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    /// Always true for a returned outcome; failures are errors.
    pub success: bool,
    /// Chunks stored for the file.
    pub chunk_count: usize,
    /// `{department}_{file stem}`.
    pub document_id: String,
    /// Index entry ids, usable with [`KnowledgeBase::delete`].
    pub chunk_ids: Vec<String>,
}

/// Result of ingesting a directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryReport {
    /// Files stored successfully.
    pub files_processed: usize,
    /// Chunks stored across those files.
    pub chunks_created: usize,
    /// Files that were skipped, with the reason.
    pub failures: Vec<LoadFailure>,
}

/// A question from a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRequest {
    /// Question text.
    pub text: String,
    /// Caller role; unknown or missing roles resolve to `general`.
    pub role: Option<String>,
    /// Optional department to narrow the search to.
    pub department: Option<String>,
    /// Retrieval method name; unknown names select MMR.
    pub method: Option<String>,
    /// Number of chunks to retrieve, clamped to `[1, 20]`.
    pub top_k: Option<usize>,
}

impl QueryRequest {
    /// Request with defaults for everything but the text.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Set the caller role.
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Narrow to a department.
    pub fn department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    /// Choose the retrieval method by name.
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Set the number of chunks to retrieve.
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }
}

/// Answer plus provenance for a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    /// Query as received, trimmed.
    pub query: String,
    /// Answer text or the no-information sentinel.
    pub answer: String,
    /// Retrieved chunks with previews, metadata and scores.
    pub sources: Vec<Source>,
    /// Strategy that actually produced the sources.
    pub retrieval_method: RetrievalMethod,
    /// Number of chunks retrieved.
    pub documents_retrieved: usize,
    /// True when an index failure was absorbed by the degrade policy.
    pub degraded: bool,
}

/// Index statistics plus process counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnowledgeStats {
    /// Backend statistics.
    pub index: IndexStats,
    /// Activity since startup.
    pub metrics: MetricsSnapshot,
}

/// Long-lived handles for ingestion and querying.
///
/// Build once at startup and share by reference or `Arc`; every provider client and the index
/// handle are created exactly once here.
pub struct KnowledgeBase {
    splitter: TextSplitter,
    index: Arc<VectorIndex>,
    retriever: Retriever,
    synthesizer: AnswerSynthesizer,
    metrics: KnowledgeMetrics,
    max_file_size: usize,
    default_method: RetrievalMethod,
    default_top_k: usize,
}

impl KnowledgeBase {
    /// Build providers and open the index selected by `config`.
    pub async fn from_config(config: &Config) -> Result<Self, RagError> {
        tracing::info!(provider = ?config.embedding_provider, model = %config.embedding_model, "Initializing embedding client");
        let embedder = build_embedding_client(config)?;
        tracing::info!(provider = ?config.generation_provider, model = %config.generation_model, "Initializing language model");
        let model = build_language_model(config)?;
        let index = VectorIndex::open(config, embedder).await?;
        Self::new(config, Arc::new(index), model)
    }

    /// Assemble from an already opened index and model.
    pub fn new(
        config: &Config,
        index: Arc<VectorIndex>,
        model: Arc<dyn LanguageModel>,
    ) -> Result<Self, RagError> {
        let splitter = TextSplitter::new(config.chunk_size, config.chunk_overlap)?;
        let retry = config.retry_policy();
        let expander = QueryExpander::new(
            model.clone(),
            retry,
            config.multi_query_variants,
            config.generation_temperature,
        );
        let retriever = Retriever::new(
            index.clone(),
            config.access_policy.clone(),
            config.retrieval_failure_policy,
        )
        .with_expander(expander);
        let synthesizer = AnswerSynthesizer::new(
            model,
            retry,
            config.generation_temperature,
            config.generation_max_tokens,
            config.max_context_tokens,
        );

        Ok(Self {
            splitter,
            index,
            retriever,
            synthesizer,
            metrics: KnowledgeMetrics::new(),
            max_file_size: config.max_file_size_bytes(),
            default_method: RetrievalMethod::from_name(&config.default_retrieval_method),
            default_top_k: config.default_top_k,
        })
    }

    /// Validate, parse, split and store an uploaded file.
    pub async fn ingest_bytes(
        &self,
        filename: &str,
        bytes: &[u8],
        metadata: &IngestMetadata,
    ) -> Result<IngestOutcome, RagError> {
        let filename = validate_filename(filename)?;
        DocumentFormat::from_filename(&filename)?;
        validate_size(bytes.len(), self.max_file_size)?;
        let base = normalize_metadata(&filename, metadata)?;

        let documents = load_bytes(&filename, bytes, &base)?;
        let chunks = self.splitter.split_documents(&documents);
        let chunk_count = chunks.len();
        let chunk_ids = self.index.add(chunks).await?;
        self.metrics.record_document(chunk_count as u64);

        let document_id = document_identifier(&base.department, &filename);
        tracing::info!(
            source = %filename,
            department = %base.department,
            pages = documents.len(),
            chunks = chunk_count,
            "Ingested document"
        );
        Ok(IngestOutcome {
            success: true,
            chunk_count,
            document_id,
            chunk_ids,
        })
    }

    /// Ingest the file at `path`.
    pub async fn ingest_file(
        &self,
        path: &Path,
        metadata: &IngestMetadata,
    ) -> Result<IngestOutcome, RagError> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| RagError::Validation(format!("Invalid file name: {}", path.display())))?;
        validate_filename(filename)?;

        let bytes = read_file(path).await?;
        self.ingest_bytes(filename, &bytes, metadata).await
    }

    /// Ingest every supported file under `dir`. Each file is stored in its own index write; a
    /// failing file is recorded and skipped.
    pub async fn ingest_directory(
        &self,
        dir: &Path,
        metadata: &IngestMetadata,
    ) -> Result<DirectoryReport, RagError> {
        let files = supported_files(dir)?;
        tracing::info!(dir = %dir.display(), files = files.len(), "Ingesting directory");

        let mut report = DirectoryReport::default();
        for path in files {
            match self.ingest_file(&path, metadata).await {
                Ok(outcome) => {
                    report.files_processed += 1;
                    report.chunks_created += outcome.chunk_count;
                }
                Err(error) => {
                    tracing::warn!(path = %path.display(), error = %error, "Skipping file that failed to ingest");
                    report.failures.push(LoadFailure {
                        path,
                        error: error.public_message(),
                    });
                }
            }
        }
        tracing::info!(
            files = report.files_processed,
            chunks = report.chunks_created,
            failed = report.failures.len(),
            "Directory ingestion finished"
        );
        Ok(report)
    }

    /// Answer a question from the chunks the caller's role may see.
    pub async fn query(&self, request: QueryRequest) -> Result<QueryOutcome, RagError> {
        let text = validate_query(&request.text)?;
        let method = request
            .method
            .as_deref()
            .map_or(self.default_method, RetrievalMethod::from_name);
        let top_k = request.top_k.unwrap_or(self.default_top_k);
        let role = request.role.as_deref().unwrap_or(DEFAULT_ROLE);
        let department = request
            .department
            .as_deref()
            .map(str::trim)
            .filter(|department| !department.is_empty());

        let retrieval = self
            .retriever
            .retrieve(text, method, top_k, role, department)
            .await?;
        if method == RetrievalMethod::MultiQuery && retrieval.method_used != method {
            self.metrics.record_fallback();
        }
        tracing::info!(
            method = %retrieval.method_used,
            results = retrieval.results.len(),
            degraded = retrieval.degraded,
            "Retrieved context"
        );

        let answer = self.synthesizer.synthesize(text, &retrieval.results).await?;
        self.metrics.record_query(answer.sentinel);
        Ok(QueryOutcome {
            query: text.to_string(),
            answer: answer.text,
            sources: answer.sources,
            retrieval_method: retrieval.method_used,
            documents_retrieved: retrieval.results.len(),
            degraded: retrieval.degraded,
        })
    }

    /// Remove index entries by id. Best effort.
    pub async fn delete(&self, ids: &[String]) -> bool {
        self.index.delete(ids).await
    }

    /// Index statistics and counters.
    pub async fn stats(&self) -> Result<KnowledgeStats, RagError> {
        Ok(KnowledgeStats {
            index: self.index.stats().await?,
            metrics: self.metrics.snapshot(),
        })
    }

    /// Counters only.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

fn validate_query(text: &str) -> Result<&str, RagError> {
    if text.chars().count() > MAX_QUERY_CHARS {
        return Err(RagError::Validation(format!(
            "Query must be at most {MAX_QUERY_CHARS} characters"
        )));
    }
    let trimmed = text.trim();
    if trimmed.chars().count() < MIN_QUERY_CHARS {
        return Err(RagError::Validation(format!(
            "Query must be at least {MIN_QUERY_CHARS} characters"
        )));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_are_trimmed_and_bounded() {
        assert_eq!(validate_query("  hi  ").unwrap(), "hi");
        assert!(matches!(validate_query(" a "), Err(RagError::Validation(_))));
        assert!(matches!(validate_query(""), Err(RagError::Validation(_))));
        assert!(validate_query(&"q".repeat(MAX_QUERY_CHARS)).is_ok());
        assert!(matches!(
            validate_query(&"q".repeat(MAX_QUERY_CHARS + 1)),
            Err(RagError::Validation(_))
        ));
    }

    #[test]
    fn request_builder_sets_fields() {
        let request = QueryRequest::new("leave policy")
            .role("hr")
            .department("HR")
            .method("similarity")
            .top_k(3);
        assert_eq!(request.role.as_deref(), Some("hr"));
        assert_eq!(request.department.as_deref(), Some("HR"));
        assert_eq!(request.method.as_deref(), Some("similarity"));
        assert_eq!(request.top_k, Some(3));
    }
}
