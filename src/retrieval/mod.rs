//! Access-filtered retrieval: similarity, MMR, and multi-query.
//!
//! The access filter is built from the caller's role before any search runs, so every strategy sees
//! the same permitted subset. Multi-query never fails on its own account: when variant generation
//! or any variant search goes wrong it falls back to a plain MMR search.

pub mod expander;

pub use expander::{ExpansionError, QueryExpander};

use crate::access::AccessPolicy;
use crate::config::RetrievalFailurePolicy;
use crate::index::{Filter, IndexError, RetrievedChunk, VectorIndex};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Smallest number of results a query may ask for.
pub const MIN_TOP_K: usize = 1;
/// Largest number of results a query may ask for.
pub const MAX_TOP_K: usize = 20;
/// MMR candidate pool size as a multiple of `k`.
pub const FETCH_K_MULTIPLIER: usize = 4;
/// Balance between relevance and diversity for MMR.
pub const MMR_LAMBDA: f32 = 0.5;

/// Retrieval strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    /// Plain nearest neighbours.
    Similarity,
    /// Maximal marginal relevance over a larger candidate pool.
    Mmr,
    /// Paraphrase the query, search each variant, merge.
    MultiQuery,
}

impl RetrievalMethod {
    /// Parse a method name. Unknown names select [`RetrievalMethod::Mmr`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "similarity" => Self::Similarity,
            "mmr" => Self::Mmr,
            "multi_query" | "multi-query" | "multiquery" => Self::MultiQuery,
            other => {
                tracing::debug!(method = other, "Unknown retrieval method, using mmr");
                Self::Mmr
            }
        }
    }

    /// Canonical name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Similarity => "similarity",
            Self::Mmr => "mmr",
            Self::MultiQuery => "multi_query",
        }
    }
}

impl std::fmt::Display for RetrievalMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retrieval failures that reach the caller.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Index search failed.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Chunks returned for a query plus how they were found.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalOutcome {
    /// Permitted chunks, best first, at most `k` of them.
    pub results: Vec<RetrievedChunk>,
    /// Strategy that produced `results`; differs from the request after a multi-query fallback.
    pub method_used: RetrievalMethod,
    /// True when the index failed and the degrade policy returned nothing instead.
    pub degraded: bool,
}

#[derive(Debug, Error)]
enum MultiQueryError {
    #[error("no query expander configured")]
    NoExpander,
    #[error(transparent)]
    Expansion(#[from] ExpansionError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Runs access-filtered searches against a [`VectorIndex`].
pub struct Retriever {
    index: Arc<VectorIndex>,
    access: AccessPolicy,
    expander: Option<QueryExpander>,
    failure_policy: RetrievalFailurePolicy,
}

impl Retriever {
    /// Retriever without query expansion; multi-query requests fall back to MMR.
    pub fn new(
        index: Arc<VectorIndex>,
        access: AccessPolicy,
        failure_policy: RetrievalFailurePolicy,
    ) -> Self {
        Self {
            index,
            access,
            expander: None,
            failure_policy,
        }
    }

    /// Enable multi-query retrieval.
    pub fn with_expander(mut self, expander: QueryExpander) -> Self {
        self.expander = Some(expander);
        self
    }

    /// Up to `k` chunks visible to `role` (optionally narrowed to `department`) for `query`.
    ///
    /// `k` is clamped to `[MIN_TOP_K, MAX_TOP_K]`.
    pub async fn retrieve(
        &self,
        query: &str,
        method: RetrievalMethod,
        k: usize,
        role: &str,
        department: Option<&str>,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        let k = k.clamp(MIN_TOP_K, MAX_TOP_K);
        let filter = self.access.build_filter(role, department);
        tracing::debug!(
            method = %method,
            k,
            role = self.access.resolve_role(role),
            filter = ?filter,
            "Retrieving"
        );

        let (found, method_used) = match method {
            RetrievalMethod::Similarity => (
                self.index.similarity_search(query, k, &filter).await,
                RetrievalMethod::Similarity,
            ),
            RetrievalMethod::Mmr => (self.mmr(query, k, &filter).await, RetrievalMethod::Mmr),
            RetrievalMethod::MultiQuery => match self.multi_query(query, k, &filter).await {
                Ok(results) => (Ok(results), RetrievalMethod::MultiQuery),
                Err(error) => {
                    tracing::warn!(error = %error, "Multi-query retrieval failed, falling back to mmr");
                    (self.mmr(query, k, &filter).await, RetrievalMethod::Mmr)
                }
            },
        };

        match found {
            Ok(results) => Ok(RetrievalOutcome {
                results,
                method_used,
                degraded: false,
            }),
            Err(error) => match self.failure_policy {
                RetrievalFailurePolicy::Surface => Err(error.into()),
                RetrievalFailurePolicy::Degrade => {
                    tracing::error!(error = %error, "Index search failed, returning no results");
                    Ok(RetrievalOutcome {
                        results: Vec::new(),
                        method_used,
                        degraded: true,
                    })
                }
            },
        }
    }

    async fn mmr(
        &self,
        query: &str,
        k: usize,
        filter: &Filter,
    ) -> Result<Vec<RetrievedChunk>, IndexError> {
        self.index
            .mmr_search(query, k, k * FETCH_K_MULTIPLIER, MMR_LAMBDA, filter)
            .await
    }

    async fn multi_query(
        &self,
        query: &str,
        k: usize,
        filter: &Filter,
    ) -> Result<Vec<RetrievedChunk>, MultiQueryError> {
        let expander = self.expander.as_ref().ok_or(MultiQueryError::NoExpander)?;
        let variants = expander.expand(query).await?;

        let searches = variants
            .iter()
            .map(|variant| self.index.similarity_search(variant, k, filter));
        let mut batches = Vec::with_capacity(variants.len());
        for batch in join_all(searches).await {
            batches.push(batch?);
        }
        Ok(merge_by_best_score(batches, k))
    }
}

/// Union of result lists keeping each id once at its best score, best first, truncated to `k`.
fn merge_by_best_score(batches: Vec<Vec<RetrievedChunk>>, k: usize) -> Vec<RetrievedChunk> {
    let mut best: HashMap<String, (usize, RetrievedChunk)> = HashMap::new();
    let mut order = 0;
    for hit in batches.into_iter().flatten() {
        match best.get_mut(&hit.id) {
            Some((_, kept)) if kept.score >= hit.score => {}
            Some((_, kept)) => *kept = hit,
            None => {
                best.insert(hit.id.clone(), (order, hit));
                order += 1;
            }
        }
    }
    let mut merged: Vec<(usize, RetrievedChunk)> = best.into_values().collect();
    merged.sort_by(|(a_order, a), (b_order, b)| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a_order.cmp(b_order))
    });
    merged.truncate(k);
    merged.into_iter().map(|(_, hit)| hit).collect()
}
