//! Vector storage backend contract
//!
//! Wraps an external ANN service (or its in-process stand-in) behind a
//! filter-aware, batch-oriented interface. Implementations never retry:
//! they classify failures as `Transient`/`DependencyMissing` and leave
//! retry policy to the indexer and retrieval layers.

use crate::domain::error::Result;
use crate::domain::filter::Filter;
use crate::domain::types::{MemoryUnit, ScoredPoint, UnitId, VectorPoint};
use async_trait::async_trait;

/// One page of a [`VectorStoreProvider::scroll`] scan.
#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    /// Points in this page, id-ordered
    pub points: Vec<VectorPoint>,
    /// Cursor for the next page; `None` when the scan is exhausted
    pub next: Option<UnitId>,
}

/// Storage backend for vectors with typed payloads.
#[async_trait]
pub trait VectorStoreProvider: Send + Sync {
    /// Idempotently create a collection with the engine's payload schema.
    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<()>;

    /// Upsert a batch of points. Atomic per point, not across points;
    /// the result is order-independent (last writer wins per id).
    async fn upsert_batch(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()>;

    /// Cosine-similarity search with the filter pushed down.
    /// Returns up to `limit` hits, scores non-ascending.
    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        filter: Option<&Filter>,
        limit: usize,
        with_vectors: bool,
    ) -> Result<Vec<ScoredPoint>>;

    /// Fetch one point by id.
    async fn get_by_id(&self, collection: &str, id: UnitId) -> Result<Option<VectorPoint>>;

    /// Delete points by id; returns how many existed.
    async fn delete_by_ids(&self, collection: &str, ids: &[UnitId]) -> Result<usize>;

    /// Delete every point matching the filter; returns how many were removed.
    async fn delete_by_filter(&self, collection: &str, filter: &Filter) -> Result<usize>;

    /// Replace payloads in place, leaving vectors untouched.
    /// Ids without a stored point are skipped; returns how many applied.
    async fn update_payloads(
        &self,
        collection: &str,
        updates: Vec<(UnitId, MemoryUnit)>,
    ) -> Result<usize>;

    /// Paginated full scan in id order, used by lifecycle sweeps and BM25
    /// rebuild. Pass the previous page's `next` as `cursor` to continue.
    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        cursor: Option<UnitId>,
        limit: usize,
    ) -> Result<ScrollPage>;

    /// Count points matching the filter.
    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<usize>;

    /// Release connections and flush any local state.
    async fn close(&self) -> Result<()>;
}
