//! Engine facade
//!
//! [`MemoryEngine`] wires the adapters and services together and exposes
//! the operation surface the protocol shell consumes: memory operations,
//! code operations, sessions, and system operations. All operations are
//! async and return discriminated results via [`crate::domain::error`].

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::adapters::embedding::hashing::{HashingBackend, HASHING_MODEL_ID};
use crate::adapters::embedding::{EmbeddingPipeline, PipelineCounters};
use crate::adapters::extractor::PatternExtractor;
use crate::adapters::hybrid_search::{
    Bm25Catalog, Bm25Params, EngineParams, FusionParams, QueryExpander, RankWeights,
    Reranker, RetrievalEngine, RetrievalGate,
};
use crate::adapters::records::{InMemoryRecordStore, RedbRecordStore};
use crate::adapters::vector_store::{HttpVectorStore, InMemoryVectorStore, PoolConfig};
use crate::domain::error::{Error, Result};
use crate::domain::filter::Filter;
use crate::domain::ports::embedding::{BackendFactory, EmbeddingBackend, EmbeddingProvider};
use crate::domain::ports::records::{EmbeddingCacheStore, FileRecordStore, RelationStore};
use crate::domain::ports::vector_store::VectorStoreProvider;
use crate::domain::types::{
    EngineStats, IndexProgress, JobStatus, MemoryUnit, RelationEdge, RelationKind,
    RetrievalOutcome, UnitId,
};
use crate::infrastructure::config::Config;
use crate::services::lifecycle::LifecycleOptions;
use crate::services::memory::{CodeSearchRequest, ListPage, ListSort, MemoryCounters};
use crate::services::{
    IndexOutcome, IndexingOptions, IndexingService, LifecycleEngine, MemoryService,
    SessionManager, SessionStats, StoreMemoryInput, SweepReport, UpdateDiff,
    UpdateMemoryInput,
};

/// Collection holding every unit (memories and code share one namespace,
/// separated by payload filters).
pub const COLLECTION: &str = "codemem_units";

/// The assembled engine.
pub struct MemoryEngine {
    config: Config,
    store: Arc<dyn VectorStoreProvider>,
    memory: MemoryService,
    indexing: Arc<IndexingService>,
    lifecycle: Arc<LifecycleEngine>,
    sessions: Arc<SessionManager>,
    embed_counters: Arc<PipelineCounters>,
    memory_counters: Arc<MemoryCounters>,
    read_only: Arc<AtomicBool>,
    cancel: CancellationToken,
}

fn hashing_factory(dimension: usize) -> (BackendFactory, String) {
    let factory: BackendFactory = Arc::new(move || {
        Ok(Box::new(HashingBackend::new(dimension)) as Box<dyn EmbeddingBackend>)
    });
    (factory, HASHING_MODEL_ID.to_string())
}

/// Pick the embedding backend for the configured model.
#[cfg(feature = "embeddings")]
fn resolve_backend(config: &Config) -> (BackendFactory, String) {
    let dimension = config.embedding.dimension;
    if config.embedding.model_id == HASHING_MODEL_ID {
        return hashing_factory(dimension);
    }
    let model_id = config.embedding.model_id.clone();
    let factory: BackendFactory = Arc::new(move || {
        Ok(Box::new(crate::adapters::embedding::FastEmbedBackend::new(
            &model_id, dimension,
        )?) as Box<dyn EmbeddingBackend>)
    });
    (factory, config.embedding.model_id.clone())
}

/// Without the `embeddings` feature every model id maps to the hashing
/// backend.
#[cfg(not(feature = "embeddings"))]
fn resolve_backend(config: &Config) -> (BackendFactory, String) {
    if config.embedding.model_id != HASHING_MODEL_ID {
        tracing::warn!(
            model = %config.embedding.model_id,
            "built without the `embeddings` feature; using the hashing backend"
        );
    }
    hashing_factory(config.embedding.dimension)
}

impl MemoryEngine {
    /// Assemble an engine from configuration: storage backends, embedding
    /// pipeline, retrieval engine, services, and (when enabled) the
    /// scheduled lifecycle sweep.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate_all()?;
        let cancel = CancellationToken::new();

        // Vector store: remote ANN service or the in-process stand-in.
        let store: Arc<dyn VectorStoreProvider> = match &config.storage.vector_store_url {
            Some(url) => Arc::new(HttpVectorStore::new(PoolConfig {
                base_url: url.clone(),
                min_connections: 1,
                max_connections: config.storage.vector_pool_size,
                checkout_timeout: Duration::from_secs_f64(config.storage.pool_timeout_seconds),
                recycle_after: Duration::from_secs(config.storage.pool_recycle_seconds),
                request_timeout: Duration::from_secs(30),
            })?),
            None => Arc::new(InMemoryVectorStore::new()),
        };

        // Record stores: durable when a data dir is configured.
        let (files, cache, relations): (
            Arc<dyn FileRecordStore>,
            Arc<dyn EmbeddingCacheStore>,
            Arc<dyn RelationStore>,
        ) = match &config.storage.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let records = Arc::new(RedbRecordStore::open(
                    &dir.join("records.redb"),
                    config.cache_ttl_ms(),
                )?);
                (records.clone(), records.clone(), records)
            }
            None => {
                let records = Arc::new(InMemoryRecordStore::new());
                (records.clone(), records.clone(), records)
            }
        };

        // Embedding pipeline.
        let (factory, model_id) = resolve_backend(&config);
        let workers = if config.performance.parallel_embeddings {
            config.performance.parallel_workers.unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(std::num::NonZeroUsize::get)
                    .unwrap_or(4)
            })
        } else {
            1
        };
        let pipeline = Arc::new(EmbeddingPipeline::new(
            factory,
            workers,
            model_id,
            config.embedding.dimension,
            Arc::clone(&cache),
            cancel.child_token(),
        )?);
        let embed_counters = pipeline.counters();
        let embedder: Arc<dyn EmbeddingProvider> = pipeline;

        store
            .ensure_collection(COLLECTION, config.embedding.dimension)
            .await?;

        // Keyword index, rebuilt from the store at startup.
        let bm25 = Arc::new(Bm25Catalog::new(Bm25Params {
            k1: config.search.bm25_k1,
            b: config.search.bm25_b,
            delta: config.search.bm25_delta,
        }));
        let rebuilt = bm25.rebuild(COLLECTION, store.as_ref()).await?;
        if rebuilt > 0 {
            info!(rebuilt, "BM25 index rebuilt from vector store");
        }

        let reranker = Reranker {
            weights: RankWeights {
                similarity: config.ranking.weight_similarity,
                recency: config.ranking.weight_recency,
                usage: config.ranking.weight_usage,
            },
            half_life_days: config.ranking.recency_halflife_days,
            mmr_enabled: config.ranking.mmr_enabled,
            mmr_lambda: config.ranking.mmr_lambda,
            session_ttl_ms: config.session_ttl_ms(),
        };
        let retrieval = Arc::new(RetrievalEngine::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            Arc::clone(&bm25),
            QueryExpander {
                enabled: config.search.query_expansion_enabled,
                max_synonyms: config.search.expansion_max_synonyms,
                max_context_terms: config.search.expansion_max_context_terms,
            },
            RetrievalGate {
                enabled: config.search.retrieval_gate_enabled,
                threshold: config.search.retrieval_gate_threshold,
            },
            reranker,
            EngineParams {
                hybrid_enabled: config.search.hybrid_search,
                fusion: FusionParams {
                    mode: config.search.hybrid_fusion_method,
                    alpha: config.search.hybrid_search_alpha,
                    rrf_rho: 60.0,
                },
                fetch_multiplier: 3,
                deadline: Duration::from_millis(config.search.query_deadline_ms),
            },
        ));

        let read_only = Arc::new(AtomicBool::new(false));
        let sessions = Arc::new(SessionManager::default());

        let memory = MemoryService::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            Arc::clone(&bm25),
            Arc::clone(&retrieval),
            Arc::clone(&sessions),
            Arc::clone(&relations),
            COLLECTION,
            Arc::clone(&read_only),
            config.session_ttl_ms(),
        );
        let memory_counters = memory.counters();

        let indexing = Arc::new(IndexingService::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            Arc::clone(&bm25),
            Arc::new(PatternExtractor::new()),
            Arc::clone(&files),
            Arc::clone(&relations),
            COLLECTION,
            Arc::clone(&read_only),
            IndexingOptions {
                background_threshold: config.indexing.auto_index_size_threshold,
                exclude_patterns: config.indexing.exclude_patterns.clone(),
                background_workers: 2,
            },
            Some(Arc::clone(&embed_counters)),
            cancel.child_token(),
        ));

        let lifecycle = Arc::new(LifecycleEngine::new(
            Arc::clone(&store),
            Arc::clone(&bm25),
            Arc::clone(&sessions),
            Arc::clone(&relations),
            Arc::clone(&cache),
            COLLECTION,
            LifecycleOptions {
                session_ttl_ms: config.session_ttl_ms(),
                idle_timeout_ms: config.idle_timeout_ms(),
                sweep_interval: Duration::from_secs(24 * 60 * 60),
                cache_ttl_ms: config.cache_ttl_ms(),
            },
        ));

        if config.memory.auto_pruning {
            tokio::spawn(Arc::clone(&lifecycle).run_scheduled(cancel.child_token()));
        }

        Ok(Self {
            config,
            store,
            memory,
            indexing,
            lifecycle,
            sessions,
            embed_counters,
            memory_counters,
            read_only,
            cancel,
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Flip the global read-only flag.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }

    // === Memory operations ===

    /// Store one memory; returns its id.
    pub async fn store_memory(&self, input: StoreMemoryInput) -> Result<UnitId> {
        self.memory.store_memory(input).await
    }

    /// Retrieve memories for a query.
    pub async fn retrieve_memories(
        &self,
        query: &str,
        limit: usize,
        filter: Option<Filter>,
        session_id: Option<Uuid>,
    ) -> Result<RetrievalOutcome> {
        self.memory
            .retrieve_memories(query, limit, filter, session_id)
            .await
    }

    /// List memories matching a filter.
    pub async fn list_memories(
        &self,
        filter: Option<Filter>,
        sort: ListSort,
        offset: usize,
        limit: usize,
    ) -> Result<ListPage> {
        self.memory.list_memories(filter, sort, offset, limit).await
    }

    /// Apply a partial update.
    pub async fn update_memory(
        &self,
        id: UnitId,
        input: UpdateMemoryInput,
        regenerate_embedding: bool,
    ) -> Result<UpdateDiff> {
        self.memory
            .update_memory(id, input, regenerate_embedding)
            .await
    }

    /// Fetch one memory.
    pub async fn get_memory(&self, id: UnitId) -> Result<MemoryUnit> {
        self.memory.get_memory(id).await
    }

    /// Delete one memory.
    pub async fn delete_memory(&self, id: UnitId) -> Result<()> {
        self.memory.delete_memory(id).await
    }

    /// Record a typed relation between two units.
    pub async fn add_relation(
        &self,
        from: UnitId,
        to: UnitId,
        relation: RelationKind,
    ) -> Result<()> {
        self.memory.add_relation(from, to, relation).await
    }

    /// Edges touching a unit.
    pub async fn relations_of(&self, id: UnitId) -> Result<Vec<RelationEdge>> {
        self.memory.relations_of(id).await
    }

    // === Code operations ===

    /// Index a directory tree for a project.
    pub async fn index_directory(
        &self,
        project: &str,
        root: &Path,
        recursive: bool,
    ) -> Result<IndexOutcome> {
        Arc::clone(&self.indexing)
            .index_directory(project, root, recursive)
            .await
    }

    /// Status of a background indexing job.
    pub fn job_status(&self, job: Uuid) -> Option<JobStatus> {
        self.indexing.job_status(job)
    }

    /// Subscribe to indexing progress events.
    pub fn index_progress(&self) -> broadcast::Receiver<IndexProgress> {
        self.indexing.progress()
    }

    /// Search indexed code.
    pub async fn search_code(
        &self,
        query: &str,
        request: CodeSearchRequest,
    ) -> Result<RetrievalOutcome> {
        self.memory.search_code(query, request).await
    }

    /// Find code similar to a snippet.
    pub async fn find_similar_code(
        &self,
        snippet: &str,
        request: CodeSearchRequest,
    ) -> Result<RetrievalOutcome> {
        self.memory.find_similar_code(snippet, request).await
    }

    // === Session operations ===

    /// Start a conversation session.
    pub fn session_start(&self, name: Option<String>) -> Uuid {
        self.sessions.start(name)
    }

    /// End a session, returning its stats.
    pub async fn session_end(&self, session_id: Uuid) -> Result<SessionStats> {
        self.sessions.end(session_id).await
    }

    // === System operations ===

    /// Engine-wide counters.
    pub async fn get_stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            stored_units: self.memory.stored_units().await? as u64,
            memories_stored: self
                .memory_counters
                .memories_stored
                .load(Ordering::Relaxed),
            searches_served: self
                .memory_counters
                .searches_served
                .load(Ordering::Relaxed),
            embeddings_computed: self.embed_counters.misses(),
            embedding_cache_hits: self.embed_counters.hits(),
            sweeps_completed: self.lifecycle.sweeps_completed(),
            active_sessions: self.sessions.len() as u64,
        })
    }

    /// Run one lifecycle sweep now.
    pub async fn lifecycle_sweep(&self) -> Result<SweepReport> {
        if self.read_only.load(Ordering::Acquire) {
            return Err(Error::ReadOnly);
        }
        self.lifecycle.sweep().await
    }

    /// Cancel background work and release connections.
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        self.store.close().await
    }
}
