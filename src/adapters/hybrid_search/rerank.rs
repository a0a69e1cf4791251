//! Multi-signal reranking
//!
//! Final ordering combines the fused retrieval score with recency and usage
//! signals, multiplied by the lifecycle weight. Optionally a Maximal
//! Marginal Relevance pass diversifies the head of the list.
//!
//! The weight triple must sum to 1.0 ± 0.01; configuration loading rejects
//! anything else before an engine exists.

use crate::domain::error::{Error, Result};
use crate::domain::lifecycle::recency_decay;
use crate::domain::types::{LifecycleState, TimestampMs};

use super::fusion::FusedHit;

/// Signal weights for reranking.
#[derive(Debug, Clone, Copy)]
pub struct RankWeights {
    /// Weight of the fused retrieval score
    pub similarity: f32,
    /// Weight of the recency decay signal
    pub recency: f32,
    /// Weight of the usage (access count) signal
    pub usage: f32,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self {
            similarity: 0.6,
            recency: 0.2,
            usage: 0.2,
        }
    }
}

impl RankWeights {
    /// Enforce the sum-to-one constraint.
    pub fn validate(&self) -> Result<()> {
        let sum = self.similarity + self.recency + self.usage;
        if (sum - 1.0).abs() > 0.01 {
            return Err(Error::config(
                "ranking",
                format!("weight_similarity + weight_recency + weight_usage = {sum}, must be 1.0 ± 0.01"),
            ));
        }
        Ok(())
    }
}

/// A hit with its final score and derived lifecycle state.
#[derive(Debug, Clone)]
pub struct RankedHit {
    /// The fused candidate
    pub hit: FusedHit,
    /// Final score after reranking and lifecycle weighting
    pub score: f32,
    /// Lifecycle state derived at query time
    pub lifecycle_state: LifecycleState,
}

/// Reranker configuration.
#[derive(Debug, Clone)]
pub struct Reranker {
    /// Signal weights (validated at load)
    pub weights: RankWeights,
    /// Recency half-life in days
    pub half_life_days: f64,
    /// Run the MMR diversity pass
    pub mmr_enabled: bool,
    /// MMR relevance/novelty balance
    pub mmr_lambda: f32,
    /// Session-state TTL used for lifecycle derivation
    pub session_ttl_ms: i64,
}

impl Default for Reranker {
    fn default() -> Self {
        Self {
            weights: RankWeights::default(),
            half_life_days: 7.0,
            mmr_enabled: false,
            mmr_lambda: 0.7,
            session_ttl_ms: 48 * 60 * 60 * 1000,
        }
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na <= f32::EPSILON || nb <= f32::EPSILON {
        0.0
    } else {
        dot / (na * nb)
    }
}

impl Reranker {
    /// Rerank fused candidates. Output is ordered by final score (or MMR
    /// pick order when diversity is enabled).
    pub fn rerank(&self, now: TimestampMs, hits: Vec<FusedHit>) -> Vec<RankedHit> {
        if hits.is_empty() {
            return Vec::new();
        }
        let fused_max = hits
            .iter()
            .map(|h| h.fused)
            .fold(0.0f32, f32::max)
            .max(f32::EPSILON);
        let max_access = hits
            .iter()
            .map(|h| h.payload.access_count)
            .max()
            .unwrap_or(0);

        let mut ranked: Vec<RankedHit> = hits
            .into_iter()
            .map(|hit| {
                let similarity_signal = hit.fused / fused_max;
                let recency_signal = recency_decay(
                    now,
                    hit.payload.last_accessed,
                    self.half_life_days,
                ) as f32;
                let usage_signal = if max_access == 0 {
                    0.0
                } else {
                    ((1.0 + hit.payload.access_count as f64).ln()
                        / (1.0 + max_access as f64).ln()) as f32
                };
                let lifecycle_state = hit.payload.lifecycle_state(now, self.session_ttl_ms);

                let base = self.weights.similarity * similarity_signal
                    + self.weights.recency * recency_signal
                    + self.weights.usage * usage_signal;
                let score = base * lifecycle_state.search_weight();
                RankedHit {
                    hit,
                    score,
                    lifecycle_state,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if self.mmr_enabled {
            self.mmr_pass(ranked)
        } else {
            ranked
        }
    }

    /// Greedy MMR selection: at each position pick the candidate maximizing
    /// `λ·score - (1-λ)·max_sim(candidate, picked)`.
    fn mmr_pass(&self, mut candidates: Vec<RankedHit>) -> Vec<RankedHit> {
        let mut picked: Vec<RankedHit> = Vec::with_capacity(candidates.len());
        while !candidates.is_empty() {
            let mut best_index = 0;
            let mut best_objective = f32::NEG_INFINITY;
            for (index, candidate) in candidates.iter().enumerate() {
                let max_sim = picked
                    .iter()
                    .map(|p| {
                        cosine(
                            candidate.hit.vector.as_deref().unwrap_or(&[]),
                            p.hit.vector.as_deref().unwrap_or(&[]),
                        )
                    })
                    .fold(0.0f32, f32::max);
                let objective =
                    self.mmr_lambda * candidate.score - (1.0 - self.mmr_lambda) * max_sim;
                if objective > best_objective {
                    best_objective = objective;
                    best_index = index;
                }
            }
            picked.push(candidates.swap_remove(best_index));
        }
        picked
    }
}
