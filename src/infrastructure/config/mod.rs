//! Configuration surface
//!
//! Feature-group configuration with explicit defaults, deserialized from a
//! file plus `CODEMEM__`-prefixed environment overrides and validated at
//! load. Any constraint violation is a fatal startup error naming the
//! violating key.

/// File/environment loading
pub mod loader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

use crate::adapters::hybrid_search::RankWeights;
use crate::domain::error::{Error, Result};
use crate::domain::types::FusionMode;

pub use loader::load;

/// Parallelism and compute placement.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Run embedding batches across the worker pool
    pub parallel_embeddings: bool,
    /// Worker count; `None` means CPU count (capped at 8)
    pub parallel_workers: Option<usize>,
    /// Allow GPU execution providers
    pub gpu_enabled: bool,
    /// Force CPU even when a GPU is present; exclusive with `gpu_enabled`
    pub force_cpu: bool,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            parallel_embeddings: true,
            parallel_workers: None,
            gpu_enabled: false,
            force_cpu: false,
        }
    }
}

/// Retrieval behavior.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SearchConfig {
    /// Fuse BM25 with vector similarity; off degrades hybrid to semantic
    pub hybrid_search: bool,
    /// Run the retrieval gate before spending embedding work
    pub retrieval_gate_enabled: bool,
    /// Gate threshold (domain-tuned placeholder)
    #[validate(range(min = 0.0, max = 1.0))]
    pub retrieval_gate_threshold: f32,
    /// Expand queries with synonyms and context terms (BM25 side only)
    pub query_expansion_enabled: bool,
    /// Synonym cap per query term
    pub expansion_max_synonyms: usize,
    /// Context-term group cap per query
    pub expansion_max_context_terms: usize,
    /// Vector weight in weighted fusion
    #[validate(range(min = 0.0, max = 1.0))]
    pub hybrid_search_alpha: f32,
    /// Fusion rule
    pub hybrid_fusion_method: FusionMode,
    /// BM25 term-frequency saturation
    #[validate(range(min = 0.0))]
    pub bm25_k1: f32,
    /// BM25 length normalization
    #[validate(range(min = 0.0, max = 1.0))]
    pub bm25_b: f32,
    /// BM25+ additive term
    #[validate(range(min = 0.0))]
    pub bm25_delta: f32,
    /// Hard per-query deadline in milliseconds
    #[validate(range(min = 1))]
    pub query_deadline_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            hybrid_search: true,
            retrieval_gate_enabled: true,
            retrieval_gate_threshold: 0.8,
            query_expansion_enabled: true,
            expansion_max_synonyms: 2,
            expansion_max_context_terms: 3,
            hybrid_search_alpha: 0.5,
            hybrid_fusion_method: FusionMode::Weighted,
            bm25_k1: 1.5,
            bm25_b: 0.75,
            bm25_delta: 1.0,
            query_deadline_ms: 500,
        }
    }
}

/// Memory lifecycle behavior.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MemoryConfig {
    /// Run scheduled lifecycle sweeps
    pub auto_pruning: bool,
    /// Cron expression consumed by the protocol shell's scheduler
    pub pruning_schedule: String,
    /// Session-state TTL in hours
    #[validate(range(min = 1))]
    pub session_state_ttl_hours: u64,
    /// Conversation idle timeout in minutes
    #[validate(range(min = 1))]
    pub conversation_idle_timeout_minutes: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            auto_pruning: true,
            pruning_schedule: "0 3 * * *".to_string(),
            session_state_ttl_hours: 48,
            conversation_idle_timeout_minutes: 30,
        }
    }
}

/// Code indexing behavior.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct IndexingConfig {
    /// File count above which `index_directory` goes to the background pool
    pub auto_index_size_threshold: usize,
    /// Debounce for file-watcher driven re-indexing (consumed by the shell)
    pub watch_debounce_ms: u64,
    /// Extra exclude patterns, gitignore syntax
    pub exclude_patterns: Vec<String>,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            auto_index_size_threshold: 500,
            watch_debounce_ms: 1000,
            exclude_patterns: Vec::new(),
        }
    }
}

/// Reranking weights.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RankingConfig {
    /// Weight of the fused retrieval score
    #[validate(range(min = 0.0, max = 1.0))]
    pub weight_similarity: f32,
    /// Weight of the recency signal
    #[validate(range(min = 0.0, max = 1.0))]
    pub weight_recency: f32,
    /// Weight of the usage signal
    #[validate(range(min = 0.0, max = 1.0))]
    pub weight_usage: f32,
    /// Recency half-life in days
    #[validate(range(min = 0.01))]
    pub recency_halflife_days: f64,
    /// Run the MMR diversity pass
    pub mmr_enabled: bool,
    /// MMR relevance/novelty balance
    #[validate(range(min = 0.0, max = 1.0))]
    pub mmr_lambda: f32,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            weight_similarity: 0.6,
            weight_recency: 0.2,
            weight_usage: 0.2,
            recency_halflife_days: 7.0,
            mmr_enabled: false,
            mmr_lambda: 0.7,
        }
    }
}

impl RankingConfig {
    /// The validated weight triple.
    pub fn weights(&self) -> RankWeights {
        RankWeights {
            similarity: self.weight_similarity,
            recency: self.weight_recency,
            usage: self.weight_usage,
        }
    }
}

/// Storage backends.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StorageConfig {
    /// Remote ANN service URL; `None` runs the in-process store
    pub vector_store_url: Option<String>,
    /// Connection pool upper bound
    #[validate(range(min = 1))]
    pub vector_pool_size: usize,
    /// Pool checkout timeout in seconds
    #[validate(range(min = 0.1))]
    pub pool_timeout_seconds: f64,
    /// Connection age before recycle, in seconds
    #[validate(range(min = 1))]
    pub pool_recycle_seconds: u64,
    /// Directory for the local record database; `None` keeps records in
    /// memory (non-durable)
    pub data_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            vector_store_url: None,
            vector_pool_size: 5,
            pool_timeout_seconds: 10.0,
            pool_recycle_seconds: 3600,
            data_dir: None,
        }
    }
}

/// Embedding model and cache.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model identifier + version
    #[validate(length(min = 1))]
    pub model_id: String,
    /// Output dimensionality
    #[validate(range(min = 1))]
    pub dimension: usize,
    /// Embedding cache TTL in days
    #[validate(range(min = 1))]
    pub cache_ttl_days: u64,
    /// Batched cache lookup size
    #[validate(range(min = 1))]
    pub cache_batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: "BAAI/bge-small-en-v1.5".to_string(),
            dimension: 384,
            cache_ttl_days: 30,
            cache_batch_size: 32,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    /// Parallelism and compute placement
    #[validate(nested)]
    pub performance: PerformanceConfig,
    /// Retrieval behavior
    #[validate(nested)]
    pub search: SearchConfig,
    /// Memory lifecycle behavior
    #[validate(nested)]
    pub memory: MemoryConfig,
    /// Code indexing behavior
    #[validate(nested)]
    pub indexing: IndexingConfig,
    /// Reranking weights
    #[validate(nested)]
    pub ranking: RankingConfig,
    /// Storage backends
    #[validate(nested)]
    pub storage: StorageConfig,
    /// Embedding model and cache
    #[validate(nested)]
    pub embedding: EmbeddingConfig,
}

impl Config {
    /// Run field-level and cross-field validation. Violations surface as
    /// `Error::Config` naming the offending key.
    pub fn validate_all(&self) -> Result<()> {
        if let Err(errors) = self.validate() {
            let key = errors
                .errors()
                .keys()
                .next()
                .map(|k| k.to_string())
                .unwrap_or_else(|| "config".to_string());
            return Err(Error::config(key, errors.to_string()));
        }

        // Cross-field constraints.
        self.ranking.weights().validate()?;
        if self.performance.gpu_enabled && self.performance.force_cpu {
            return Err(Error::config(
                "performance.force_cpu",
                "gpu_enabled and force_cpu are mutually exclusive",
            ));
        }
        Ok(())
    }

    /// Session-state TTL in milliseconds.
    pub fn session_ttl_ms(&self) -> i64 {
        self.memory.session_state_ttl_hours as i64 * 60 * 60 * 1000
    }

    /// Conversation idle timeout in milliseconds.
    pub fn idle_timeout_ms(&self) -> i64 {
        self.memory.conversation_idle_timeout_minutes as i64 * 60 * 1000
    }

    /// Embedding cache TTL in milliseconds.
    pub fn cache_ttl_ms(&self) -> i64 {
        self.embedding.cache_ttl_days as i64 * 24 * 60 * 60 * 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate_all().unwrap();
    }

    #[test]
    fn ranking_weights_must_sum_to_one() {
        let mut config = Config::default();
        config.ranking.weight_similarity = 0.9;
        let err = config.validate_all().unwrap_err();
        match err {
            Error::Config { key, .. } => assert_eq!(key, "ranking"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn gpu_and_force_cpu_are_exclusive() {
        let mut config = Config::default();
        config.performance.gpu_enabled = true;
        config.performance.force_cpu = true;
        let err = config.validate_all().unwrap_err();
        match err {
            Error::Config { key, .. } => assert_eq!(key, "performance.force_cpu"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn out_of_range_alpha_names_its_key() {
        let mut config = Config::default();
        config.search.hybrid_search_alpha = 1.5;
        let err = config.validate_all().unwrap_err();
        match err {
            Error::Config { key, .. } => assert!(key.contains("search")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let config = Config::default();
        assert_eq!(config.search.hybrid_search_alpha, 0.5);
        assert_eq!(config.search.bm25_k1, 1.5);
        assert_eq!(config.ranking.weight_similarity, 0.6);
        assert_eq!(config.ranking.recency_halflife_days, 7.0);
        assert_eq!(config.memory.session_state_ttl_hours, 48);
        assert_eq!(config.storage.vector_pool_size, 5);
        assert_eq!(config.embedding.dimension, 384);
    }
}
