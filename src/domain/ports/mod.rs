//! Domain port interfaces
//!
//! Boundary contracts between the engine core and its adapters. Ports are
//! trait-based so implementations can be swapped without touching callers.

/// Text embedding providers and per-worker backends
pub mod embedding;
/// Code extraction
pub mod extractor;
/// File records, embedding cache, relation edges
pub mod records;
/// Vector storage backends
pub mod vector_store;

pub use embedding::{normalize, BackendFactory, EmbeddingBackend, EmbeddingProvider};
pub use extractor::UnitExtractor;
pub use records::{EmbeddingCacheStore, FileRecordStore, RelationStore};
pub use vector_store::{ScrollPage, VectorStoreProvider};
