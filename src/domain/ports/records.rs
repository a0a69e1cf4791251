//! Local persistence contracts
//!
//! File records, the content-addressed embedding cache, and relation edges
//! share one embedded database but have independent schemas; each gets its
//! own port so tests can swap any of them out.

use crate::domain::error::Result;
use crate::domain::types::{
    EmbeddingCacheEntry, FileRecord, RelationEdge, TimestampMs, UnitId,
};
use async_trait::async_trait;

/// Keyed storage of per-(project, file) indexing bookkeeping.
#[async_trait]
pub trait FileRecordStore: Send + Sync {
    /// Fetch the record for `(project, file_path)`.
    async fn get(&self, project: &str, file_path: &str) -> Result<Option<FileRecord>>;

    /// Insert or replace a record.
    async fn put(&self, record: FileRecord) -> Result<()>;

    /// Remove a record; returns whether it existed.
    async fn delete(&self, project: &str, file_path: &str) -> Result<bool>;

    /// All records of one project.
    async fn list_project(&self, project: &str) -> Result<Vec<FileRecord>>;
}

/// Content-addressed embedding cache keyed by `(content_hash, model_id)`.
#[async_trait]
pub trait EmbeddingCacheStore: Send + Sync {
    /// Batched lookup; the result is positionally aligned with `hashes`.
    /// Hits update `last_hit_at` opportunistically.
    async fn get_batch(
        &self,
        model_id: &str,
        hashes: &[String],
    ) -> Result<Vec<Option<Vec<f32>>>>;

    /// Write-through a batch of freshly computed entries.
    async fn put_batch(&self, entries: Vec<EmbeddingCacheEntry>) -> Result<()>;

    /// Drop entries older than `ttl_ms`; returns how many were evicted.
    async fn sweep_expired(&self, now: TimestampMs, ttl_ms: i64) -> Result<usize>;
}

/// Persisted relationship edges, keyed by `(from, to, relation)`.
#[async_trait]
pub trait RelationStore: Send + Sync {
    /// Record an edge; inserting the same key twice is a no-op.
    async fn add(&self, edge: RelationEdge) -> Result<()>;

    /// Every edge touching `id`, in either direction.
    async fn relations_of(&self, id: UnitId) -> Result<Vec<RelationEdge>>;

    /// Remove all edges touching `id`; returns how many were removed.
    async fn remove_for(&self, id: UnitId) -> Result<usize>;
}
