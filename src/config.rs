use crate::access::{AccessPolicy, AccessPolicyError};
use crate::retry::RetryPolicy;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_INDEX_PATH: &str = "./data/knowflow_index";
const DEFAULT_QDRANT_URL: &str = "http://127.0.0.1:6333";
const DEFAULT_COLLECTION: &str = "knowflow_documents";
const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// Role table override could not be parsed.
    #[error("Invalid ROLE_DEPARTMENTS: {0}")]
    RoleTable(#[from] AccessPolicyError),
    /// Configuration was installed twice.
    #[error("Configuration already initialized")]
    AlreadyInitialized,
}

/// Runtime configuration for KnowFlow.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the local vector index.
    pub index_path: PathBuf,
    /// Storage backend used by the vector index.
    pub vector_store: VectorStoreKind,
    /// Base URL of the Qdrant instance when the Qdrant backend is selected.
    pub qdrant_url: String,
    /// Qdrant collection used for chunk storage.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Generative model provider used for paraphrasing and answers.
    pub generation_provider: GenerationProvider,
    /// Generative model identifier.
    pub generation_model: String,
    /// Sampling temperature for answer generation.
    pub generation_temperature: f32,
    /// Output token cap for answer generation.
    pub generation_max_tokens: u32,
    /// API key for Google Gemini endpoints.
    pub google_api_key: Option<String>,
    /// Base URL for Google Gemini endpoints.
    pub gemini_base_url: String,
    /// Base URL of the Ollama runtime.
    pub ollama_url: String,
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared between adjacent chunks.
    pub chunk_overlap: usize,
    /// Upload size limit in megabytes.
    pub max_file_size_mb: usize,
    /// Retrieval method used when the caller does not choose one.
    pub default_retrieval_method: String,
    /// Result count used when the caller does not choose one.
    pub default_top_k: usize,
    /// Number of paraphrases requested by the multi-query strategy.
    pub multi_query_variants: usize,
    /// Per-call timeout applied to provider requests.
    pub provider_timeout: Duration,
    /// Retries attempted after the first failed provider call.
    pub provider_max_retries: u32,
    /// Initial retry delay, doubled after each failure.
    pub provider_retry_backoff: Duration,
    /// Behavior when the index fails during retrieval.
    pub retrieval_failure_policy: RetrievalFailurePolicy,
    /// Token budget for the context block handed to the generative model.
    pub max_context_tokens: usize,
    /// Role to department mapping.
    pub access_policy: AccessPolicy,
}

/// Supported vector storage backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorStoreKind {
    /// redb file under `index_path`.
    Local,
    /// Remote Qdrant collection.
    Qdrant,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Google Gemini embeddings API.
    Gemini,
    /// Local Ollama runtime.
    Ollama,
    /// Deterministic feature-hashing embedder; needs no network.
    Hash,
}

/// Supported generative model backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationProvider {
    /// Google Gemini `generateContent`.
    Gemini,
    /// Local Ollama runtime.
    Ollama,
}

/// What the retrieval orchestrator does when the index itself fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetrievalFailurePolicy {
    /// Propagate the failure to the caller.
    Surface,
    /// Return an empty result flagged as degraded.
    Degrade,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from(DEFAULT_INDEX_PATH),
            vector_store: VectorStoreKind::Local,
            qdrant_url: DEFAULT_QDRANT_URL.to_string(),
            qdrant_collection_name: DEFAULT_COLLECTION.to_string(),
            qdrant_api_key: None,
            embedding_provider: EmbeddingProvider::Gemini,
            embedding_model: "text-embedding-004".to_string(),
            embedding_dimension: 768,
            generation_provider: GenerationProvider::Gemini,
            generation_model: "gemini-1.5-flash".to_string(),
            generation_temperature: 0.7,
            generation_max_tokens: 1024,
            google_api_key: None,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            chunk_size: 1000,
            chunk_overlap: 200,
            max_file_size_mb: 25,
            default_retrieval_method: "mmr".to_string(),
            default_top_k: 5,
            multi_query_variants: 3,
            provider_timeout: Duration::from_secs(30),
            provider_max_retries: 3,
            provider_retry_backoff: Duration::from_millis(500),
            retrieval_failure_policy: RetrievalFailurePolicy::Surface,
            max_context_tokens: 6000,
            access_policy: AccessPolicy::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let embedding_provider = match load_env_optional("EMBEDDING_PROVIDER") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".into()))?,
            None => defaults.embedding_provider,
        };
        let generation_provider = match load_env_optional("GENERATION_PROVIDER") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("GENERATION_PROVIDER".into()))?,
            None => defaults.generation_provider,
        };
        let google_api_key = load_env_optional("GOOGLE_API_KEY");
        let uses_gemini = embedding_provider == EmbeddingProvider::Gemini
            || generation_provider == GenerationProvider::Gemini;
        if uses_gemini && google_api_key.is_none() {
            return Err(ConfigError::MissingVariable("GOOGLE_API_KEY".into()));
        }

        let vector_store = match load_env_optional("VECTOR_STORE") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("VECTOR_STORE".into()))?,
            None => defaults.vector_store,
        };
        let retrieval_failure_policy = match load_env_optional("RETRIEVAL_FAILURE_POLICY") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("RETRIEVAL_FAILURE_POLICY".into()))?,
            None => defaults.retrieval_failure_policy,
        };
        let access_policy = match load_env_optional("ROLE_DEPARTMENTS") {
            Some(value) => AccessPolicy::parse(&value)?,
            None => defaults.access_policy,
        };

        Ok(Self {
            index_path: load_env_optional("KNOWFLOW_INDEX_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.index_path),
            vector_store,
            qdrant_url: load_env_optional("QDRANT_URL").unwrap_or(defaults.qdrant_url),
            qdrant_collection_name: load_env_optional("QDRANT_COLLECTION_NAME")
                .unwrap_or(defaults.qdrant_collection_name),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            embedding_provider,
            embedding_model: load_env_optional("EMBEDDING_MODEL")
                .unwrap_or(defaults.embedding_model),
            embedding_dimension: parse_env("EMBEDDING_DIMENSION", defaults.embedding_dimension)?,
            generation_provider,
            generation_model: load_env_optional("GENERATION_MODEL")
                .unwrap_or(defaults.generation_model),
            generation_temperature: parse_env(
                "GENERATION_TEMPERATURE",
                defaults.generation_temperature,
            )?,
            generation_max_tokens: parse_env(
                "GENERATION_MAX_TOKENS",
                defaults.generation_max_tokens,
            )?,
            google_api_key,
            gemini_base_url: load_env_optional("GEMINI_BASE_URL")
                .unwrap_or(defaults.gemini_base_url),
            ollama_url: load_env_optional("OLLAMA_URL").unwrap_or(defaults.ollama_url),
            chunk_size: parse_env("TEXT_SPLITTER_CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: parse_env("TEXT_SPLITTER_CHUNK_OVERLAP", defaults.chunk_overlap)?,
            max_file_size_mb: parse_env("MAX_FILE_SIZE_MB", defaults.max_file_size_mb)?,
            default_retrieval_method: load_env_optional("RETRIEVER_TYPE")
                .unwrap_or(defaults.default_retrieval_method),
            default_top_k: parse_env("RETRIEVER_K", defaults.default_top_k)?,
            multi_query_variants: parse_env("MULTI_QUERY_VARIANTS", defaults.multi_query_variants)?,
            provider_timeout: Duration::from_secs(parse_env("PROVIDER_TIMEOUT_SECS", 30_u64)?),
            provider_max_retries: parse_env(
                "PROVIDER_MAX_RETRIES",
                defaults.provider_max_retries,
            )?,
            provider_retry_backoff: Duration::from_millis(parse_env(
                "PROVIDER_RETRY_BACKOFF_MS",
                500_u64,
            )?),
            retrieval_failure_policy,
            max_context_tokens: parse_env("SYNTH_MAX_CONTEXT_TOKENS", defaults.max_context_tokens)?,
            access_policy,
        })
    }

    /// Timeout and retry policy shared by embedding and generation calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: self.provider_timeout,
            max_retries: self.provider_max_retries,
            initial_backoff: self.provider_retry_backoff,
        }
    }

    /// Upload limit in bytes.
    pub fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

impl std::str::FromStr for VectorStoreKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "redb" => Ok(Self::Local),
            "qdrant" => Ok(Self::Qdrant),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            "hash" => Ok(Self::Hash),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for GenerationProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for RetrievalFailurePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "surface" => Ok(Self::Surface),
            "degrade" => Ok(Self::Degrade),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        index_path = %config.index_path.display(),
        vector_store = ?config.vector_store,
        embedding_provider = ?config.embedding_provider,
        embedding_model = %config.embedding_model,
        generation_provider = ?config.generation_provider,
        chunk_size = config.chunk_size,
        chunk_overlap = config.chunk_overlap,
        "Loaded configuration"
    );
    CONFIG
        .set(config)
        .map_err(|_| ConfigError::AlreadyInitialized)?;
    CONFIG.get().ok_or(ConfigError::AlreadyInitialized)
}
