//! Score fusion
//!
//! Combines the vector and keyword result lists into one candidate set.
//! Three rules, selected by configuration:
//!
//! - **Weighted** (default): max-normalize each list to `[0, 1]`, then
//!   `α·vec + (1-α)·bm25`. With `α = 1.0` this degenerates to vector-only
//!   ordering, with `α = 0.0` to BM25-only.
//! - **RRF**: `Σ 1/(ρ + rank)` across the lists a document appears in.
//! - **Cascade**: keep the BM25 candidate set, order purely by vector
//!   similarity, discard the keyword score.
//!
//! Deduplication by id is inherent: each document fuses into one entry.

use std::collections::HashMap;

use crate::domain::types::{FusionMode, MemoryUnit, ScoredPoint, UnitId};

/// A deduplicated candidate with per-signal scores.
#[derive(Debug, Clone)]
pub struct FusedHit {
    /// Unit id
    pub id: UnitId,
    /// Stored payload
    pub payload: MemoryUnit,
    /// Raw cosine similarity (0.0 when only the keyword leg saw it)
    pub similarity: f32,
    /// Raw BM25 score (0.0 when only the vector leg saw it)
    pub bm25: f32,
    /// Fused retrieval score
    pub fused: f32,
    /// Stored vector, when the vector leg carried it
    pub vector: Option<Vec<f32>>,
}

/// Fusion configuration.
#[derive(Debug, Clone, Copy)]
pub struct FusionParams {
    /// Fusion rule
    pub mode: FusionMode,
    /// Vector weight for the weighted rule
    pub alpha: f32,
    /// Rank offset for RRF
    pub rrf_rho: f32,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            mode: FusionMode::Weighted,
            alpha: 0.5,
            rrf_rho: 60.0,
        }
    }
}

fn max_score(hits: &[ScoredPoint]) -> f32 {
    hits.iter()
        .map(|h| h.score)
        .fold(0.0f32, f32::max)
        .max(f32::EPSILON)
}

/// Fuse the two result lists. Output is sorted by fused score, descending.
pub fn fuse(
    params: FusionParams,
    vector_hits: Vec<ScoredPoint>,
    bm25_hits: Vec<ScoredPoint>,
) -> Vec<FusedHit> {
    let mut merged: HashMap<UnitId, FusedHit> = HashMap::new();

    for hit in &vector_hits {
        merged.insert(
            hit.id,
            FusedHit {
                id: hit.id,
                payload: hit.payload.clone(),
                similarity: hit.score,
                bm25: 0.0,
                fused: 0.0,
                vector: hit.vector.clone(),
            },
        );
    }
    for hit in &bm25_hits {
        merged
            .entry(hit.id)
            .and_modify(|existing| existing.bm25 = hit.score)
            .or_insert_with(|| FusedHit {
                id: hit.id,
                payload: hit.payload.clone(),
                similarity: 0.0,
                bm25: hit.score,
                fused: 0.0,
                vector: None,
            });
    }

    match params.mode {
        FusionMode::Weighted => {
            let vec_max = max_score(&vector_hits);
            let bm25_max = max_score(&bm25_hits);
            for hit in merged.values_mut() {
                let vec_norm = (hit.similarity / vec_max).clamp(0.0, 1.0);
                let bm25_norm = (hit.bm25 / bm25_max).clamp(0.0, 1.0);
                hit.fused = params.alpha * vec_norm + (1.0 - params.alpha) * bm25_norm;
            }
        }
        FusionMode::Rrf => {
            let mut rrf: HashMap<UnitId, f32> = HashMap::new();
            for (rank, hit) in vector_hits.iter().enumerate() {
                *rrf.entry(hit.id).or_insert(0.0) +=
                    1.0 / (params.rrf_rho + (rank + 1) as f32);
            }
            for (rank, hit) in bm25_hits.iter().enumerate() {
                *rrf.entry(hit.id).or_insert(0.0) +=
                    1.0 / (params.rrf_rho + (rank + 1) as f32);
            }
            for hit in merged.values_mut() {
                hit.fused = rrf.get(&hit.id).copied().unwrap_or(0.0);
            }
        }
        FusionMode::Cascade => {
            // Keep only the keyword candidate set, ordered by similarity.
            let keyword_ids: std::collections::HashSet<UnitId> =
                bm25_hits.iter().map(|h| h.id).collect();
            merged.retain(|id, _| keyword_ids.contains(id));
            for hit in merged.values_mut() {
                hit.fused = hit.similarity;
            }
        }
    }

    let mut fused: Vec<FusedHit> = merged.into_values().collect();
    fused.sort_by(|a, b| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused
}
