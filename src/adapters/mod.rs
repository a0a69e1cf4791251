//! Adapter implementations behind the domain ports.

/// Embedding pipeline, cache, worker pool, backends
pub mod embedding;
/// Code extraction
pub mod extractor;
/// Hybrid retrieval (BM25 + vector + fusion)
pub mod hybrid_search;
/// Record stores (file records, embedding cache, relations)
pub mod records;
/// Vector store providers
pub mod vector_store;
