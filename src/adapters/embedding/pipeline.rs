//! Cached, parallel embedding pipeline
//!
//! The [`EmbeddingPipeline`] is the engine's only implementation of the
//! async [`EmbeddingProvider`] port. Per batch it:
//!
//! 1. hashes every text and resolves hits from the content-addressed cache
//!    in one batched lookup,
//! 2. partitions the misses into adaptively sized sub-batches (constant
//!    byte budget per sub-batch, so short texts ride in large groups and
//!    long texts in small ones),
//! 3. dispatches sub-batches across the worker pool — or as one batch when
//!    under the parallel threshold,
//! 4. write-throughs freshly computed vectors, only after the whole batch
//!    succeeded.
//!
//! A failed text fails the entire batch with `EmbeddingFailure { index }`;
//! no partial cache writes happen.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::error::{Error, Result};
use crate::domain::ports::embedding::{BackendFactory, EmbeddingProvider};
use crate::domain::ports::records::EmbeddingCacheStore;
use crate::domain::types::{now_ms, EmbeddingCacheEntry};

use super::pool::EmbeddingWorkerPool;

/// Batch sizes at or below this use a single dispatch instead of
/// partitioning across workers.
pub const PARALLEL_THRESHOLD: usize = 10;

/// Byte budget per adaptive sub-batch.
const SUB_BATCH_BYTE_BUDGET: usize = 32 * 1024;

/// Hex SHA-256 of a text, the cache key component.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Cache hit/miss counters, shared with engine stats.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PipelineCounters {
    /// Cache hits since startup.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Cache misses (vectors actually computed) since startup.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hit rate in `[0, 1]`; zero traffic reports 0.0.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }
}

/// Content-addressed, worker-pooled embedding pipeline.
pub struct EmbeddingPipeline {
    pool: EmbeddingWorkerPool,
    cache: Arc<dyn EmbeddingCacheStore>,
    model_id: String,
    dimension: usize,
    parallel_threshold: usize,
    counters: Arc<PipelineCounters>,
    cancel: CancellationToken,
}

impl EmbeddingPipeline {
    /// Build the pipeline: spawns the worker pool eagerly.
    ///
    /// `model_id` and `dimension` must describe what `factory` builds; the
    /// pipeline verifies the dimension of every vector it returns.
    pub fn new(
        factory: BackendFactory,
        workers: usize,
        model_id: impl Into<String>,
        dimension: usize,
        cache: Arc<dyn EmbeddingCacheStore>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        Ok(Self {
            pool: EmbeddingWorkerPool::new(workers, factory)?,
            cache,
            model_id: model_id.into(),
            dimension,
            parallel_threshold: PARALLEL_THRESHOLD,
            counters: Arc::new(PipelineCounters::default()),
            cancel,
        })
    }

    /// Shared counters for stats reporting.
    pub fn counters(&self) -> Arc<PipelineCounters> {
        Arc::clone(&self.counters)
    }

    /// Greedy partition of `texts` indices into sub-batches of roughly
    /// constant byte volume. Every sub-batch holds at least one text.
    fn partition_adaptive(texts: &[(usize, &str)]) -> Vec<Vec<usize>> {
        let mut batches = Vec::new();
        let mut current = Vec::new();
        let mut current_bytes = 0usize;
        for (index, text) in texts {
            if !current.is_empty() && current_bytes + text.len() > SUB_BATCH_BYTE_BUDGET {
                batches.push(std::mem::take(&mut current));
                current_bytes = 0;
            }
            current.push(*index);
            current_bytes += text.len();
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }

    async fn compute(
        &self,
        misses: &[(usize, &str)],
    ) -> Result<Vec<(usize, Vec<f32>)>> {
        let single_dispatch =
            misses.len() <= self.parallel_threshold || self.pool.worker_count() == 1;

        let groups: Vec<Vec<usize>> = if single_dispatch {
            vec![misses.iter().map(|(i, _)| *i).collect()]
        } else {
            Self::partition_adaptive(misses)
        };

        let by_index: std::collections::HashMap<usize, &str> =
            misses.iter().copied().collect();

        let mut futures = Vec::with_capacity(groups.len());
        for group in &groups {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let texts: Vec<String> = group
                .iter()
                .map(|i| by_index[i].to_string())
                .collect();
            let group = group.clone();
            futures.push(async move {
                self.pool.dispatch(texts).await.map_err(|err| match err {
                    // Remap a worker-local failure index onto the caller's batch.
                    Error::EmbeddingFailure { index, cause } => Error::EmbeddingFailure {
                        index: group.get(index).copied().unwrap_or(group[0]),
                        cause,
                    },
                    other => other,
                })
            });
        }

        let results = try_join_all(futures).await?;

        let mut out = Vec::with_capacity(misses.len());
        for (group, vectors) in groups.iter().zip(results) {
            if vectors.len() != group.len() {
                return Err(Error::internal(format!(
                    "worker returned {} vectors for {} texts",
                    vectors.len(),
                    group.len()
                )));
            }
            for (index, vector) in group.iter().zip(vectors) {
                if vector.len() != self.dimension {
                    return Err(Error::EmbeddingFailure {
                        index: *index,
                        cause: format!(
                            "dimension {} != configured {}",
                            vector.len(),
                            self.dimension
                        ),
                    });
                }
                out.push((*index, vector));
            }
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for EmbeddingPipeline {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.embed_batch(&texts).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::internal("embed_batch returned empty result for one text"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let hashes: Vec<String> = texts.iter().map(|t| content_hash(t)).collect();
        let cached = self.cache.get_batch(&self.model_id, &hashes).await?;

        let mut vectors: Vec<Option<Vec<f32>>> = cached;
        let misses: Vec<(usize, &str)> = vectors
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_none())
            .map(|(i, _)| (i, texts[i].as_str()))
            .collect();

        let hit_count = texts.len() - misses.len();
        self.counters.hits.fetch_add(hit_count as u64, Ordering::Relaxed);

        if !misses.is_empty() {
            self.counters
                .misses
                .fetch_add(misses.len() as u64, Ordering::Relaxed);
            debug!(
                total = texts.len(),
                misses = misses.len(),
                "embedding batch with cache misses"
            );

            let computed = self.compute(&misses).await?;

            // Write-through only after the whole batch succeeded.
            let now = now_ms();
            let entries: Vec<EmbeddingCacheEntry> = computed
                .iter()
                .map(|(index, vector)| EmbeddingCacheEntry {
                    content_hash: hashes[*index].clone(),
                    model_id: self.model_id.clone(),
                    vector: vector.clone(),
                    created_at: now,
                    last_hit_at: now,
                })
                .collect();
            self.cache.put_batch(entries).await?;

            for (index, vector) in computed {
                vectors[index] = Some(vector);
            }
        }

        vectors
            .into_iter()
            .enumerate()
            .map(|(index, v)| {
                v.ok_or_else(|| Error::internal(format!("missing vector at index {index}")))
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
