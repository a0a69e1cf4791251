//! Embedding pipeline adapters
//!
//! The pipeline facade plus the backends it drives. Every backend instance
//! is owned by exactly one worker thread; see
//! [`crate::domain::ports::embedding`] for the seam contracts.

/// FastEmbed local ONNX backend
#[cfg(feature = "embeddings")]
pub mod fastembed;
/// Deterministic feature-hashing backend
pub mod hashing;
/// Cached, parallel pipeline facade
pub mod pipeline;
/// Worker pool
pub mod pool;

#[cfg(feature = "embeddings")]
pub use fastembed::FastEmbedBackend;
pub use hashing::HashingBackend;
pub use pipeline::{content_hash, EmbeddingPipeline, PipelineCounters};
pub use pool::EmbeddingWorkerPool;
