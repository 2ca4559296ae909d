//! Vector index: embeds chunks, persists them through a [`VectorStore`], and serves filtered
//! similarity and MMR searches.
//!
//! Scores are cosine similarities (higher is more relevant). Equal scores keep insertion order.

pub mod filter;
mod local;
pub mod mmr;
mod payload;
mod qdrant;

pub use filter::{Filter, MetadataField};
pub use local::LocalStore;
pub use qdrant::{QdrantError, QdrantStore};

use crate::config::{Config, VectorStoreKind};
use crate::document::Chunk;
use crate::embedding::{EmbeddingClient, EmbeddingError};
use crate::retry::{RetryPolicy, with_retry};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Failures raised by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Local database operation failed.
    #[error("Index database error: {0}")]
    Database(#[from] redb::Error),
    /// Stored entry could not be encoded or decoded.
    #[error("Index entry serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Remote Qdrant backend failed.
    #[error("Qdrant backend error: {0}")]
    Qdrant(#[from] QdrantError),
    /// Blocking storage task panicked or was cancelled.
    #[error("Index storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    /// Vector length differs from the dimension the index was created with.
    #[error("Index dimension mismatch: index uses {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension recorded by the index.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },
    /// Index directory could not be prepared.
    #[error("Index path unavailable: {0}")]
    Io(#[from] std::io::Error),
}

macro_rules! from_redb {
    ($($source:ty),* $(,)?) => {$(
        impl From<$source> for StorageError {
            fn from(error: $source) -> Self {
                Self::Database(error.into())
            }
        }
    )*};
}

from_redb!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

/// Failures raised by [`VectorIndex`] operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Embedding the chunks or the query failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    /// Persisting or reading entries failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Entry handed to a backend for persistence.
#[derive(Debug, Clone)]
pub struct NewEntry {
    /// Identifier assigned by the index.
    pub id: String,
    /// Chunk embedding.
    pub vector: Vec<f32>,
    /// Chunk content and metadata.
    pub chunk: Chunk,
}

/// Entry returned by a backend nearest-neighbour query.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    /// Entry identifier.
    pub id: String,
    /// Cosine similarity to the query vector.
    pub score: f32,
    /// Stored chunk.
    pub chunk: Chunk,
    /// Stored vector, needed for MMR.
    pub vector: Vec<f32>,
}

impl mmr::MmrCandidate for ScoredEntry {
    fn relevance(&self) -> f32 {
        self.score
    }

    fn vector(&self) -> &[f32] {
        &self.vector
    }
}

/// Backend identity reported by index statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreIdentity {
    /// Backend name (`local` or `qdrant`).
    pub backend: &'static str,
    /// Index path or collection URL.
    pub location: String,
}

/// Storage backend behind the vector index.
///
/// `insert` must be durable and visible to subsequent reads when it returns. `nearest` returns
/// entries matching the filter ordered by descending score, ties in insertion order.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Persist entries as a single write.
    async fn insert(&self, entries: Vec<NewEntry>) -> Result<(), StorageError>;

    /// Up to `limit` entries nearest to `vector` among those matching `filter`.
    async fn nearest(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<ScoredEntry>, StorageError>;

    /// Remove entries; returns how many existed.
    async fn delete(&self, ids: &[String]) -> Result<usize, StorageError>;

    /// Number of stored entries.
    async fn count(&self) -> Result<usize, StorageError>;

    /// Backend name and location.
    fn identity(&self) -> StoreIdentity;
}

/// Chunk returned by a search, with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    /// Entry identifier.
    pub id: String,
    /// Stored chunk.
    pub chunk: Chunk,
    /// Cosine similarity to the query.
    pub score: f32,
}

impl From<ScoredEntry> for RetrievedChunk {
    fn from(entry: ScoredEntry) -> Self {
        Self {
            id: entry.id,
            chunk: entry.chunk,
            score: entry.score,
        }
    }
}

/// Index statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Number of stored entries.
    pub count: usize,
    /// Backend name.
    pub backend: &'static str,
    /// Index path or collection URL.
    pub location: String,
    /// Embedding model identifier.
    pub embedding_model: String,
    /// Embedding dimension.
    pub dimension: usize,
}

/// Embedding-aware index over a storage backend.
pub struct VectorIndex {
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    retry: RetryPolicy,
}

impl VectorIndex {
    /// Combine an embedder and a backend. `retry` bounds every embedding call.
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        store: Arc<dyn VectorStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            embedder,
            store,
            retry,
        }
    }

    /// Open the backend selected by configuration.
    pub async fn open(
        config: &Config,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Result<Self, IndexError> {
        let store: Arc<dyn VectorStore> = match config.vector_store {
            VectorStoreKind::Local => Arc::new(
                LocalStore::open(&config.index_path, embedder.dimension()).await?,
            ),
            VectorStoreKind::Qdrant => {
                let store = QdrantStore::new(
                    &config.qdrant_url,
                    config.qdrant_api_key.clone(),
                    &config.qdrant_collection_name,
                    embedder.dimension(),
                    config.provider_timeout,
                )
                .map_err(StorageError::from)?;
                store
                    .ensure_collection()
                    .await
                    .map_err(StorageError::from)?;
                Arc::new(store)
            }
        };
        let identity = store.identity();
        tracing::info!(
            backend = identity.backend,
            location = %identity.location,
            "Vector index ready"
        );
        Ok(Self::new(embedder, store, config.retry_policy()))
    }

    /// Embed and persist `chunks`; returns one new id per chunk, in order.
    ///
    /// Embedding is retried; the store write is not, so a failure never duplicates entries.
    pub async fn add(&self, chunks: Vec<Chunk>) -> Result<Vec<String>, IndexError> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        let vectors = with_retry("embed_chunks", &self.retry, || {
            self.embedder.embed_many(&texts)
        })
        .await?;

        let entries: Vec<NewEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| NewEntry {
                id: payload::generate_entry_id(),
                vector,
                chunk,
            })
            .collect();
        let ids: Vec<String> = entries.iter().map(|entry| entry.id.clone()).collect();

        self.store.insert(entries).await?;
        tracing::debug!(entries = ids.len(), "Stored chunks in index");
        Ok(ids)
    }

    /// Top-`k` entries by similarity to `query` among those matching `filter`.
    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: &Filter,
    ) -> Result<Vec<RetrievedChunk>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embed_query(query).await?;
        let hits = self.store.nearest(&vector, k, filter).await?;
        Ok(hits.into_iter().map(RetrievedChunk::from).collect())
    }

    /// Fetch `fetch_k` nearest candidates, then pick `k` of them by maximal marginal relevance.
    pub async fn mmr_search(
        &self,
        query: &str,
        k: usize,
        fetch_k: usize,
        lambda: f32,
        filter: &Filter,
    ) -> Result<Vec<RetrievedChunk>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embed_query(query).await?;
        let candidates = self.store.nearest(&vector, fetch_k.max(k), filter).await?;
        let selected = mmr::select(candidates, k, lambda);
        Ok(selected.into_iter().map(RetrievedChunk::from).collect())
    }

    /// Remove entries by id. Failures are logged and reported as `false`.
    pub async fn delete(&self, ids: &[String]) -> bool {
        match self.store.delete(ids).await {
            Ok(removed) => {
                tracing::info!(requested = ids.len(), removed, "Deleted index entries");
                true
            }
            Err(error) => {
                tracing::error!(error = %error, requested = ids.len(), "Index delete failed");
                false
            }
        }
    }

    /// Entry count and backend identity.
    pub async fn stats(&self) -> Result<IndexStats, IndexError> {
        let count = self.store.count().await?;
        let identity = self.store.identity();
        Ok(IndexStats {
            count,
            backend: identity.backend,
            location: identity.location,
            embedding_model: self.embedder.model_id().to_string(),
            dimension: self.embedder.dimension(),
        })
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        with_retry("embed_query", &self.retry, || self.embedder.embed_one(query)).await
    }
}
