use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use httpmock::{Method::POST, MockServer};
use knowflow::{
    access::AccessPolicy,
    config::{Config, EmbeddingProvider, GenerationProvider},
    embedding::{EmbeddingClient, HashEmbeddingClient},
    error::RagError,
    generation::{GenerationError, GenerationRequest, LanguageModel},
    index::{LocalStore, VectorIndex},
    ingestion::IngestMetadata,
    pipeline::{KnowledgeBase, QueryRequest},
    retrieval::RetrievalMethod,
    synthesis::SENTINEL_ANSWER,
};
use serde_json::json;

const DIMENSION: usize = 64;

/// Generative model that answers every synthesis prompt and optionally paraphrases queries.
struct ScriptedModel {
    paraphrases: Option<&'static str>,
    answers: AtomicUsize,
    expansions: AtomicUsize,
}

impl ScriptedModel {
    fn new(paraphrases: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            paraphrases,
            answers: AtomicUsize::new(0),
            expansions: AtomicUsize::new(0),
        })
    }

    fn answers(&self) -> usize {
        self.answers.load(Ordering::SeqCst)
    }

    fn expansions(&self) -> usize {
        self.expansions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        if request.prompt.contains("Original question:") {
            self.expansions.fetch_add(1, Ordering::SeqCst);
            return self
                .paraphrases
                .map(str::to_string)
                .ok_or_else(|| GenerationError::InvalidResponse("paraphrasing disabled".into()));
        }
        self.answers.fetch_add(1, Ordering::SeqCst);
        Ok("- Deployments go through the release pipeline (deployment-guide.txt)".into())
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}

fn config_in(dir: &Path) -> Config {
    Config {
        index_path: dir.to_path_buf(),
        embedding_provider: EmbeddingProvider::Hash,
        embedding_dimension: DIMENSION,
        provider_max_retries: 0,
        ..Config::default()
    }
}

async fn knowledge_base(config: &Config, model: Arc<ScriptedModel>) -> KnowledgeBase {
    let embedder: Arc<dyn EmbeddingClient> = Arc::new(HashEmbeddingClient::new(DIMENSION));
    let store = LocalStore::open(&config.index_path, DIMENSION)
        .await
        .expect("open local store");
    let index = VectorIndex::new(embedder, Arc::new(store), config.retry_policy());
    KnowledgeBase::new(config, Arc::new(index), model).expect("assemble knowledge base")
}

fn engineering() -> IngestMetadata {
    IngestMetadata {
        department: Some("Engineering".into()),
        doc_type: Some("Guide".into()),
        ..IngestMetadata::default()
    }
}

/// Roughly three pages of plain text, well over three chunks of 1000 characters.
fn deployment_guide() -> String {
    let topics = ["release pipeline", "rollback procedure", "on-call escalation"];
    let mut text = String::new();
    for (page, topic) in topics.iter().enumerate() {
        for paragraph in 0..4 {
            for sentence in 0..4 {
                text.push_str(&format!(
                    "Page {} paragraph {paragraph} sentence {sentence} covers the {topic} for production deployment services. ",
                    page + 1
                ));
            }
            text.push_str("\n\n");
        }
    }
    text
}

async fn ingest_guide(knowledge: &KnowledgeBase) -> usize {
    let outcome = knowledge
        .ingest_bytes("deployment-guide.txt", deployment_guide().as_bytes(), &engineering())
        .await
        .expect("ingest guide");
    assert!(outcome.success);
    outcome.chunk_count
}

#[tokio::test]
async fn ingesting_a_three_page_document_tags_every_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let model = ScriptedModel::new(None);
    let knowledge = knowledge_base(&config, model.clone()).await;

    let outcome = knowledge
        .ingest_bytes("deployment-guide.txt", deployment_guide().as_bytes(), &engineering())
        .await
        .unwrap();
    assert!(outcome.chunk_count >= 3);
    assert_eq!(outcome.chunk_ids.len(), outcome.chunk_count);
    assert_eq!(outcome.document_id, "Engineering_deployment-guide");

    let result = knowledge
        .query(
            QueryRequest::new("production deployment services")
                .role("admin")
                .method("similarity")
                .top_k(20),
        )
        .await
        .unwrap();
    assert_eq!(result.documents_retrieved, outcome.chunk_count);
    for source in &result.sources {
        assert_eq!(source.metadata.department, "Engineering");
        assert_eq!(source.metadata.doc_type, "Guide");
        assert_eq!(source.metadata.source, "deployment-guide.txt");
        assert!(source.content.chars().count() <= 203);
    }

    let stats = knowledge.stats().await.unwrap();
    assert_eq!(stats.index.count, outcome.chunk_count);
    assert_eq!(stats.index.backend, "local");
    assert_eq!(stats.metrics.documents_ingested, 1);
    assert_eq!(stats.metrics.chunks_indexed, outcome.chunk_count as u64);
}

#[tokio::test]
async fn role_granted_engineering_retrieves_engineering_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.access_policy =
        AccessPolicy::parse("admin=*;general=General,Public,Engineering;hr=HR,People").unwrap();
    let model = ScriptedModel::new(None);
    let knowledge = knowledge_base(&config, model.clone()).await;
    ingest_guide(&knowledge).await;

    for role in ["general", "engineer-in-training"] {
        let result = knowledge
            .query(
                QueryRequest::new("How do rollbacks work?")
                    .role(role)
                    .department("Engineering"),
            )
            .await
            .unwrap();
        assert!(result.documents_retrieved >= 1);
        assert!(
            result
                .sources
                .iter()
                .all(|source| source.metadata.department == "Engineering")
        );
        assert_eq!(result.retrieval_method, RetrievalMethod::Mmr);
        assert_ne!(result.answer, SENTINEL_ANSWER);
    }
    assert_eq!(model.answers(), 2);
}

#[tokio::test]
async fn role_without_access_gets_sentinel_and_no_model_call() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let model = ScriptedModel::new(None);
    let knowledge = knowledge_base(&config, model.clone()).await;
    ingest_guide(&knowledge).await;

    for department in [None, Some("Engineering")] {
        let mut request = QueryRequest::new("How do rollbacks work?").role("hr");
        request.department = department.map(str::to_string);
        let result = knowledge.query(request).await.unwrap();
        assert_eq!(result.documents_retrieved, 0);
        assert!(result.sources.is_empty());
        assert_eq!(result.answer, SENTINEL_ANSWER);
    }

    let allowed = knowledge
        .query(QueryRequest::new("How do rollbacks work?").role("engineer"))
        .await
        .unwrap();
    assert!(allowed.documents_retrieved >= 1);

    assert_eq!(model.answers(), 1);
    let metrics = knowledge.metrics();
    assert_eq!(metrics.queries_answered, 3);
    assert_eq!(metrics.sentinel_answers, 2);
}

#[tokio::test]
async fn empty_index_returns_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let model = ScriptedModel::new(Some("variant one\nvariant two"));
    let knowledge = knowledge_base(&config, model.clone()).await;

    for method in ["similarity", "mmr", "multi_query"] {
        let result = knowledge
            .query(QueryRequest::new("anything at all").role("admin").method(method))
            .await
            .unwrap();
        assert_eq!(result.answer, SENTINEL_ANSWER);
        assert_eq!(result.documents_retrieved, 0);
    }
    assert_eq!(model.answers(), 0);
}

#[tokio::test]
async fn failed_query_expansion_matches_plain_mmr() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let model = ScriptedModel::new(None);
    let knowledge = knowledge_base(&config, model.clone()).await;
    ingest_guide(&knowledge).await;

    let question = || QueryRequest::new("rollback procedure").role("engineer").top_k(4);
    let mmr = knowledge.query(question().method("mmr")).await.unwrap();
    let multi = knowledge.query(question().method("multi_query")).await.unwrap();

    assert_eq!(multi.retrieval_method, RetrievalMethod::Mmr);
    assert_eq!(multi.sources, mmr.sources);
    assert_eq!(model.expansions(), 1);
    assert_eq!(knowledge.metrics().multi_query_fallbacks, 1);
}

#[tokio::test]
async fn multi_query_merges_variant_results() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let model = ScriptedModel::new(Some(
        "1. How is a release rolled back?\n2. Rollback procedure for production\n3. Undo a deployment",
    ));
    let knowledge = knowledge_base(&config, model.clone()).await;
    ingest_guide(&knowledge).await;

    let result = knowledge
        .query(
            QueryRequest::new("rollback procedure")
                .role("engineer")
                .method("multi_query")
                .top_k(3),
        )
        .await
        .unwrap();
    assert_eq!(result.retrieval_method, RetrievalMethod::MultiQuery);
    assert!(result.documents_retrieved >= 1 && result.documents_retrieved <= 3);
    for pair in result.sources.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert_eq!(knowledge.metrics().multi_query_fallbacks, 0);
}

#[tokio::test]
async fn invalid_input_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.max_file_size_mb = 1;
    let knowledge = knowledge_base(&config, ScriptedModel::new(None)).await;

    let cases: [(&str, Vec<u8>); 5] = [
        ("setup.exe", b"MZ".to_vec()),
        ("notes.txt", Vec::new()),
        (".env.txt", b"SECRET=1".to_vec()),
        ("   ", b"text".to_vec()),
        ("huge.txt", vec![b'a'; 1024 * 1024 + 1]),
    ];
    for (filename, bytes) in cases {
        let error = knowledge
            .ingest_bytes(filename, &bytes, &IngestMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(error, RagError::Validation(_)), "{filename}: {error}");
    }

    let missing = knowledge
        .ingest_file(&dir.path().join("missing.txt"), &IngestMetadata::default())
        .await
        .unwrap_err();
    assert!(matches!(missing, RagError::NotFound(_)));

    let too_long = "q".repeat(1001);
    for text in ["", " x ", too_long.as_str()] {
        let error = knowledge.query(QueryRequest::new(text)).await.unwrap_err();
        assert!(matches!(error, RagError::Validation(_)));
    }
    assert_eq!(knowledge.stats().await.unwrap().index.count, 0);
}

#[tokio::test]
async fn whitespace_padded_file_ingests_and_answers() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let model = ScriptedModel::new(None);
    let knowledge = knowledge_base(&config, model.clone()).await;
    let text = format!(
        "Intro paragraph about deployments.\n\n{}Closing paragraph about rollbacks.",
        " \n".repeat(1500)
    );

    let outcome = knowledge
        .ingest_bytes("uploads/../notes.txt", text.as_bytes(), &engineering())
        .await
        .unwrap();
    assert!(outcome.chunk_count >= 2);
    assert_eq!(outcome.document_id, "Engineering_notes");

    let result = knowledge
        .query(
            QueryRequest::new("rollback paragraph")
                .role("engineer")
                .method("similarity"),
        )
        .await
        .unwrap();
    assert_eq!(result.documents_retrieved, outcome.chunk_count);
    assert!(result.sources.iter().all(|source| source.metadata.source == "notes.txt"));
    assert_eq!(model.answers(), 1);
}

#[tokio::test]
async fn directory_ingestion_records_failures_and_continues() {
    let index_dir = tempfile::tempdir().unwrap();
    let docs = tempfile::tempdir().unwrap();
    std::fs::write(docs.path().join("a.txt"), "Leave requests go through the HR portal.").unwrap();
    std::fs::create_dir(docs.path().join("policies")).unwrap();
    std::fs::write(
        docs.path().join("policies/b.md"),
        "# Expenses\n\nSubmit receipts within 30 days.",
    )
    .unwrap();
    std::fs::write(docs.path().join("broken.pdf"), "not really a pdf").unwrap();
    std::fs::write(docs.path().join("diagram.png"), [0_u8, 1, 2]).unwrap();

    let config = config_in(index_dir.path());
    let knowledge = knowledge_base(&config, ScriptedModel::new(None)).await;
    let report = knowledge
        .ingest_directory(docs.path(), &IngestMetadata::default())
        .await
        .unwrap();

    assert_eq!(report.files_processed, 2);
    assert_eq!(report.chunks_created, 2);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].path.ends_with("broken.pdf"));

    let result = knowledge
        .query(QueryRequest::new("expense receipts").role("general"))
        .await
        .unwrap();
    assert!(result.documents_retrieved >= 1);
    assert!(
        result
            .sources
            .iter()
            .all(|source| source.metadata.department == "General")
    );

    let error = knowledge
        .ingest_directory(&docs.path().join("nope"), &IngestMetadata::default())
        .await
        .unwrap_err();
    assert!(matches!(error, RagError::NotFound(_)));
}

#[tokio::test]
async fn index_survives_reopen_and_supports_delete() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());

    let ids = {
        let knowledge = knowledge_base(&config, ScriptedModel::new(None)).await;
        knowledge
            .ingest_bytes("deployment-guide.txt", deployment_guide().as_bytes(), &engineering())
            .await
            .unwrap()
            .chunk_ids
    };

    let knowledge = knowledge_base(&config, ScriptedModel::new(None)).await;
    assert_eq!(knowledge.stats().await.unwrap().index.count, ids.len());

    assert!(knowledge.delete(&ids[..1]).await);
    assert_eq!(knowledge.stats().await.unwrap().index.count, ids.len() - 1);
}

#[tokio::test]
async fn from_config_wires_providers() {
    let server = MockServer::start_async().await;
    let generate = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(200).json_body(json!({
                "response": "Rollbacks are manual.",
                "done": true
            }));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        generation_provider: GenerationProvider::Ollama,
        ollama_url: server.base_url(),
        ..config_in(dir.path())
    };
    let knowledge = KnowledgeBase::from_config(&config).await.unwrap();
    ingest_guide(&knowledge).await;

    let result = knowledge
        .query(QueryRequest::new("rollback procedure").role("engineer"))
        .await
        .unwrap();
    assert_eq!(result.answer, "Rollbacks are manual.");
    generate.assert_async().await;

    let stats = knowledge.stats().await.unwrap();
    assert_eq!(stats.index.embedding_model, "hash-v1");
    assert_eq!(stats.index.dimension, DIMENSION);
}
