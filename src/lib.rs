#![deny(missing_docs)]

//! Core library for KnowFlow, a role-scoped retrieval-augmented question answering service.

/// Role/department access rules and filter construction.
pub mod access;
/// Environment-driven configuration management.
pub mod config;
/// Document and chunk data model.
pub mod document;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Outer-boundary error taxonomy.
pub mod error;
/// Generative model client abstraction and adapters.
pub mod generation;
/// Vector index, storage backends, and search helpers.
pub mod index;
/// Document loading, splitting, and metadata normalization.
pub mod ingestion;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion and query counters.
pub mod metrics;
/// Application context wiring ingestion and query flows.
pub mod pipeline;
/// Timeout and retry policy for provider calls.
pub mod retry;
/// Multi-strategy retrieval orchestration.
pub mod retrieval;
/// Grounded answer synthesis.
pub mod synthesis;
