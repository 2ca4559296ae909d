use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and query activity.
#[derive(Default)]
pub struct KnowledgeMetrics {
    documents_ingested: AtomicU64,
    chunks_indexed: AtomicU64,
    queries_answered: AtomicU64,
    sentinel_answers: AtomicU64,
    multi_query_fallbacks: AtomicU64,
}

impl KnowledgeMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an ingested file and the number of chunks stored for it.
    pub fn record_document(&self, chunk_count: u64) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed.fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record an answered query; `sentinel` marks answers produced without the model.
    pub fn record_query(&self, sentinel: bool) {
        self.queries_answered.fetch_add(1, Ordering::Relaxed);
        if sentinel {
            self.sentinel_answers.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a multi-query retrieval that fell back to MMR.
    pub fn record_fallback(&self) {
        self.multi_query_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            queries_answered: self.queries_answered.load(Ordering::Relaxed),
            sentinel_answers: self.sentinel_answers.load(Ordering::Relaxed),
            multi_query_fallbacks: self.multi_query_fallbacks.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of the counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Files ingested since startup.
    pub documents_ingested: u64,
    /// Chunks stored across all ingested files.
    pub chunks_indexed: u64,
    /// Queries that produced an answer.
    pub queries_answered: u64,
    /// Answers that were the no-information sentinel.
    pub sentinel_answers: u64,
    /// Multi-query retrievals served by the MMR fallback.
    pub multi_query_fallbacks: u64,
}
