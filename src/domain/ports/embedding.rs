//! Embedding provider contracts
//!
//! Two seams with different jobs:
//!
//! - [`EmbeddingProvider`] is the async contract the rest of the engine
//!   consumes (pipeline facade, retrieval, indexing).
//! - [`EmbeddingBackend`] is the synchronous per-worker seam. Each worker
//!   thread owns exactly one backend instance; texts and vectors cross the
//!   worker boundary by value, never by shared reference.

use crate::domain::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Async contract for turning text into unit-normalized vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch, order-preserving. An empty batch returns an empty
    /// result without touching the model.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Output dimensionality.
    fn dimension(&self) -> usize;

    /// Identifier of the model + version; part of every cache key.
    fn model_id(&self) -> &str;
}

/// Synchronous, single-owner embedding seam used inside worker threads.
///
/// `&mut self` is deliberate: a backend is never shared, which is what lets
/// model runtimes that are not `Sync` live behind this trait.
pub trait EmbeddingBackend: Send {
    /// Embed a batch, order-preserving.
    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Output dimensionality.
    fn dimension(&self) -> usize;

    /// Identifier of the model + version.
    fn model_id(&self) -> &str;
}

/// Constructor for per-worker backend instances.
///
/// Called once per worker at pool startup so every worker holds its own
/// model instance.
pub type BackendFactory = Arc<dyn Fn() -> Result<Box<dyn EmbeddingBackend>> + Send + Sync>;

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_vectors() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn normalize_leaves_zero_vectors_alone() {
        let mut v = vec![0.0, 0.0, 0.0];
        normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }
}
