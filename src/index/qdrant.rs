//! Remote backend speaking the Qdrant HTTP API.
//!
//! Points carry the flattened [`EntryRecord`] as payload. Searches request stored vectors back so
//! MMR runs client side exactly as it does for the local backend.

use super::payload::{EntryRecord, current_timestamp_rfc3339};
use super::{Filter, NewEntry, ScoredEntry, StorageError, StoreIdentity, VectorStore};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

/// Errors returned while interacting with Qdrant.
#[derive(Debug, Error)]
pub enum QdrantError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid Qdrant URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Qdrant responded with an unexpected status code.
    #[error("Unexpected Qdrant response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from Qdrant.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Response body did not have the expected shape.
    #[error("Malformed Qdrant response: {0}")]
    InvalidResponse(String),
    /// Existing collection was created for another vector size.
    #[error("Collection vector size is {actual}, expected {expected}")]
    CollectionDimension {
        /// Dimension of the configured embedder.
        expected: usize,
        /// Dimension of the existing collection.
        actual: usize,
    },
}

#[derive(Deserialize)]
struct QueryResponse {
    result: QueryResult,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QueryResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

#[derive(Deserialize)]
struct QueryPoint {
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
    #[serde(default)]
    vector: Option<Vec<f32>>,
}

#[derive(Deserialize)]
struct CountResponse {
    result: CountResult,
}

#[derive(Deserialize)]
struct CountResult {
    count: usize,
}

/// Qdrant-backed [`VectorStore`].
pub struct QdrantStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
    dimension: usize,
    next_seq: AtomicU64,
}

impl QdrantStore {
    /// Construct a client for `collection` at `url`.
    pub fn new(
        url: &str,
        api_key: Option<String>,
        collection: &str,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, QdrantError> {
        let client = Client::builder()
            .user_agent("knowflow/0.1")
            .timeout(timeout)
            .build()?;
        let base_url = normalize_base_url(url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            collection,
            has_api_key = api_key.as_deref().is_some_and(|value| !value.is_empty()),
            "Initialized Qdrant HTTP client"
        );
        let seed = u64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos()).unwrap_or(0);
        Ok(Self {
            client,
            base_url,
            api_key,
            collection: collection.to_string(),
            dimension,
            next_seq: AtomicU64::new(seed),
        })
    }

    /// Create the collection and its department index when missing; verify its vector size
    /// otherwise.
    pub async fn ensure_collection(&self) -> Result<(), QdrantError> {
        let path = format!("collections/{}", self.collection);
        let response = self.request(Method::GET, &path).send().await?;
        match response.status() {
            StatusCode::OK => {
                let body: Value = response.json().await?;
                if let Some(size) = body
                    .pointer("/result/config/params/vectors/size")
                    .and_then(Value::as_u64)
                    && size as usize != self.dimension
                {
                    return Err(QdrantError::CollectionDimension {
                        expected: self.dimension,
                        actual: size as usize,
                    });
                }
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                tracing::info!(collection = %self.collection, dimension = self.dimension, "Creating collection");
                let response = self
                    .request(Method::PUT, &path)
                    .json(&json!({
                        "vectors": { "size": self.dimension, "distance": "Cosine" }
                    }))
                    .send()
                    .await?;
                ensure_success(response).await?;
                self.ensure_department_index().await;
                Ok(())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(QdrantError::UnexpectedStatus { status, body })
            }
        }
    }

    async fn ensure_department_index(&self) {
        let result = self
            .request(Method::PUT, &format!("collections/{}/index", self.collection))
            .json(&json!({ "field_name": "department", "field_schema": "keyword" }))
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(collection = %self.collection, "Department payload index ensured");
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "Failed to create department payload index");
            }
            Err(error) => {
                tracing::warn!(error = %error, "Failed to create department payload index");
            }
        }
    }

    async fn upsert(&self, entries: Vec<NewEntry>) -> Result<(), StorageError> {
        let now = current_timestamp_rfc3339();
        let mut points = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.vector.len() != self.dimension {
                return Err(StorageError::DimensionMismatch {
                    expected: self.dimension,
                    actual: entry.vector.len(),
                });
            }
            let seq = self.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
            let record = EntryRecord::new(entry.id.clone(), seq, entry.chunk, &now);
            points.push(json!({
                "id": entry.id,
                "vector": entry.vector,
                "payload": serde_json::to_value(&record)?,
            }));
        }

        let count = points.len();
        let response = self
            .request(
                Method::PUT,
                &format!("collections/{}/points", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(QdrantError::from)?;
        ensure_success(response).await?;
        tracing::debug!(collection = %self.collection, points = count, "Points indexed");
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<Value>,
    ) -> Result<Vec<ScoredEntry>, QdrantError> {
        let mut body = json!({
            "query": vector,
            "limit": limit,
            "with_payload": true,
            "with_vector": true,
        });
        if let (Some(filter), Some(object)) = (filter, body.as_object_mut()) {
            object.insert("filter".into(), filter);
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/query", self.collection),
            )
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResult::Points(points) | QueryResult::Object { points } => points,
        };

        let mut scored = Vec::with_capacity(points.len());
        for point in points {
            let payload = point
                .payload
                .ok_or_else(|| QdrantError::InvalidResponse("point without payload".into()))?;
            let record: EntryRecord = serde_json::from_value(Value::Object(payload))
                .map_err(|error| QdrantError::InvalidResponse(error.to_string()))?;
            let vector = point
                .vector
                .ok_or_else(|| QdrantError::InvalidResponse("point without vector".into()))?;
            scored.push((
                record.seq,
                ScoredEntry {
                    id: record.id.clone(),
                    score: point.score,
                    chunk: record.to_chunk(),
                    vector,
                },
            ));
        }
        scored.sort_by(|(seq_a, a), (seq_b, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(seq_a.cmp(seq_b))
        });
        Ok(scored.into_iter().map(|(_, entry)| entry).collect())
    }

    async fn exact_count(&self) -> Result<usize, QdrantError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/count", self.collection),
            )
            .json(&json!({ "exact": true }))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(QdrantError::UnexpectedStatus { status, body });
        }
        let CountResponse { result } = response.json().await?;
        Ok(result.count)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut request = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            request = request.header("api-key", api_key);
        }
        request
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn insert(&self, entries: Vec<NewEntry>) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.upsert(entries).await
    }

    async fn nearest(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<ScoredEntry>, StorageError> {
        if vector.len() != self.dimension {
            return Err(StorageError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if limit == 0 {
            return Ok(Vec::new());
        }
        let filter = match filter_to_qdrant(filter) {
            QdrantFilter::MatchNothing => return Ok(Vec::new()),
            QdrantFilter::All => None,
            QdrantFilter::Expression(value) => Some(value),
        };
        Ok(self.query(vector, limit, filter).await?)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let before = self.exact_count().await?;
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/delete", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": ids }))
            .send()
            .await
            .map_err(QdrantError::from)?;
        ensure_success(response).await?;
        let after = self.exact_count().await?;
        Ok(before.saturating_sub(after))
    }

    async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.exact_count().await?)
    }

    fn identity(&self) -> StoreIdentity {
        StoreIdentity {
            backend: "qdrant",
            location: format!("{}/collections/{}", self.base_url, self.collection),
        }
    }
}

enum QdrantFilter {
    All,
    MatchNothing,
    Expression(Value),
}

/// Translate a filter into Qdrant's `must` syntax.
fn filter_to_qdrant(filter: &Filter) -> QdrantFilter {
    match filter {
        Filter::Unrestricted => QdrantFilter::All,
        Filter::Equals { field, value } => QdrantFilter::Expression(json!({
            "must": [{ "key": field.as_str(), "match": { "value": value } }]
        })),
        Filter::OneOf { values, .. } if values.is_empty() => QdrantFilter::MatchNothing,
        Filter::OneOf { field, values } => QdrantFilter::Expression(json!({
            "must": [{ "key": field.as_str(), "match": { "any": values } }]
        })),
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<(), QdrantError> {
    if response.status().is_success() {
        Ok(())
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let error = QdrantError::UnexpectedStatus { status, body };
        tracing::error!(error = %error, "Qdrant request failed");
        Err(error)
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string().trim_end_matches('/').to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}
