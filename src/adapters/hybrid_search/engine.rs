//! Hybrid retrieval engine
//!
//! Orchestrates one query end to end: gate → embed → parallel vector +
//! keyword legs → fusion → dedup/suppression → rerank → truncate, under a
//! hard deadline. If the deadline expires after fusion produced anything,
//! the best-so-far list is returned with `partial = true`; before that,
//! the query fails with `Timeout`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::domain::error::{Error, Result};
use crate::domain::filter::Filter;
use crate::domain::ports::embedding::EmbeddingProvider;
use crate::domain::ports::vector_store::VectorStoreProvider;
use crate::domain::types::{
    FusionMode, RetrievalDiagnostics, RetrievalOutcome, RetrievedMemory, ScoredPoint,
    SearchMode, UnitId,
};

use super::bm25::{tokenize, Bm25Catalog};
use super::expansion::QueryExpander;
use super::fusion::{fuse, FusedHit, FusionParams};
use super::gate::RetrievalGate;
use super::rerank::{RankedHit, Reranker};

/// Default candidate fetch multiplier over the requested `k`.
pub const DEFAULT_FETCH_MULTIPLIER: usize = 3;

/// Default hard deadline for one query.
pub const DEFAULT_DEADLINE: Duration = Duration::from_millis(500);

/// Per-query request knobs beyond the query text itself.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    /// Target result count
    pub limit: usize,
    /// Payload filter, pushed down to both legs
    pub filter: Option<Filter>,
    /// Which legs run
    pub mode: SearchMode,
    /// Override the configured fusion rule
    pub fusion: Option<FusionMode>,
    /// Ids suppressed from the output (session dedup)
    pub suppress: HashSet<UnitId>,
    /// Extra BM25 terms contributed by session history
    pub extra_terms: Vec<String>,
    /// Override the configured fetch multiplier
    pub fetch_multiplier: Option<usize>,
    /// Skip the retrieval gate (used by code search with explicit queries)
    pub skip_gate: bool,
}

/// Engine configuration derived from the search config group.
#[derive(Debug, Clone)]
pub struct EngineParams {
    /// Hybrid search enabled; when off, hybrid requests degrade to semantic
    pub hybrid_enabled: bool,
    /// Fusion parameters
    pub fusion: FusionParams,
    /// Candidate fetch multiplier
    pub fetch_multiplier: usize,
    /// Hard per-query deadline
    pub deadline: Duration,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            hybrid_enabled: true,
            fusion: FusionParams::default(),
            fetch_multiplier: DEFAULT_FETCH_MULTIPLIER,
            deadline: DEFAULT_DEADLINE,
        }
    }
}

/// The retrieval engine.
pub struct RetrievalEngine {
    store: Arc<dyn VectorStoreProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    bm25: Arc<Bm25Catalog>,
    expander: QueryExpander,
    gate: RetrievalGate,
    reranker: Reranker,
    params: EngineParams,
}

impl RetrievalEngine {
    /// Assemble the engine from its collaborators.
    pub fn new(
        store: Arc<dyn VectorStoreProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        bm25: Arc<Bm25Catalog>,
        expander: QueryExpander,
        gate: RetrievalGate,
        reranker: Reranker,
        params: EngineParams,
    ) -> Self {
        Self {
            store,
            embedder,
            bm25,
            expander,
            gate,
            reranker,
            params,
        }
    }

    /// Shared keyword catalog (the indexer writes it in step with the store).
    pub fn bm25(&self) -> Arc<Bm25Catalog> {
        Arc::clone(&self.bm25)
    }

    /// Run one query.
    pub async fn search(
        &self,
        collection: &str,
        query: &str,
        request: SearchRequest,
    ) -> Result<RetrievalOutcome> {
        let started = Instant::now();
        if request.limit == 0 {
            return Ok(RetrievalOutcome::default());
        }
        if !request.skip_gate && self.gate.should_gate(query) {
            debug!(query, "retrieval gate predicted no utility");
            return Ok(RetrievalOutcome::gated());
        }

        let mode = match request.mode {
            SearchMode::Hybrid if !self.params.hybrid_enabled => SearchMode::Semantic,
            other => other,
        };
        let multiplier = request
            .fetch_multiplier
            .unwrap_or(self.params.fetch_multiplier);
        // Suppressed ids eat into the candidate set; fetch past them.
        let fetch = request.limit * multiplier + request.suppress.len();

        let deadline = self.params.deadline;
        let remaining = |started: Instant| deadline.saturating_sub(started.elapsed());

        // Vector leg.
        let need_vectors = self.reranker.mmr_enabled;
        let mut query_vec: Option<Vec<f32>> = None;
        let mut vector_hits: Vec<ScoredPoint> = Vec::new();
        let mut partial = false;
        if mode != SearchMode::Keyword {
            match tokio::time::timeout(remaining(started), async {
                let q_vec = self.embedder.embed_one(query).await?;
                let hits = self
                    .store
                    .search(
                        collection,
                        &q_vec,
                        request.filter.as_ref(),
                        fetch,
                        need_vectors,
                    )
                    .await?;
                Ok::<_, Error>((q_vec, hits))
            })
            .await
            {
                Ok(result) => {
                    let (q_vec, hits) = result?;
                    query_vec = Some(q_vec);
                    vector_hits = hits;
                }
                Err(_) if mode == SearchMode::Hybrid => {
                    // Keyword leg can still produce best-so-far results.
                    partial = true;
                }
                Err(_) => {
                    return Err(Error::Timeout {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }
        }

        // Keyword leg. Expansion applies to the BM25 side only.
        let mut bm25_hits: Vec<ScoredPoint> = Vec::new();
        let mut matched_keywords = Vec::new();
        if mode != SearchMode::Semantic {
            let mut terms = self.expander.expand(query);
            terms.extend(request.extra_terms.iter().cloned());
            let (hits, matched) = self
                .bm25
                .score(collection, &terms, request.filter.as_ref(), fetch)
                .await;
            bm25_hits = hits;
            matched_keywords = matched;
        }

        let fetch_count = vector_hits.len() + bm25_hits.len();

        // Fusion. Single-leg modes reuse the weighted rule at its
        // degenerate alpha so the scoring path stays uniform.
        let fusion_params = match mode {
            SearchMode::Semantic => FusionParams {
                mode: FusionMode::Weighted,
                alpha: 1.0,
                ..self.params.fusion
            },
            SearchMode::Keyword => FusionParams {
                mode: FusionMode::Weighted,
                alpha: 0.0,
                ..self.params.fusion
            },
            SearchMode::Hybrid => FusionParams {
                mode: request.fusion.unwrap_or(self.params.fusion.mode),
                ..self.params.fusion
            },
        };
        let mut fused = fuse(fusion_params, vector_hits, bm25_hits);

        if fusion_params.mode == FusionMode::Cascade {
            self.fill_cascade_similarity(collection, &mut fused, query_vec.as_deref())
                .await;
        }

        // Session suppression.
        if !request.suppress.is_empty() {
            fused.retain(|hit| !request.suppress.contains(&hit.id));
        }

        let now = crate::domain::types::now_ms();
        let deadline_hit = started.elapsed() >= deadline;
        let (ranked, reranked) = if deadline_hit {
            if fused.is_empty() {
                return Err(Error::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
            partial = true;
            // Best-so-far: fused order, no rerank.
            let ranked = fused
                .into_iter()
                .map(|hit| {
                    let lifecycle_state = hit
                        .payload
                        .lifecycle_state(now, self.reranker.session_ttl_ms);
                    RankedHit {
                        score: hit.fused,
                        lifecycle_state,
                        hit,
                    }
                })
                .collect::<Vec<_>>();
            (ranked, false)
        } else {
            (self.reranker.rerank(now, fused), true)
        };

        let results: Vec<RetrievedMemory> = ranked
            .into_iter()
            .take(request.limit)
            .map(|ranked| to_result(ranked))
            .collect();

        Ok(RetrievalOutcome {
            results,
            diagnostics: RetrievalDiagnostics {
                fetch_count,
                query_time_ms: started.elapsed().as_millis() as u64,
                matched_keywords,
                fusion_mode: fusion_params.mode,
                reranked,
                partial,
                gated: false,
            },
        })
    }

    /// Cascade re-scoring needs a similarity for keyword-only candidates;
    /// fetch their stored vectors and score against the query vector.
    async fn fill_cascade_similarity(
        &self,
        collection: &str,
        fused: &mut Vec<FusedHit>,
        query_vec: Option<&[f32]>,
    ) {
        let Some(query_vec) = query_vec else {
            return;
        };
        for hit in fused.iter_mut() {
            if hit.similarity > 0.0 {
                continue;
            }
            if let Ok(Some(point)) = self.store.get_by_id(collection, hit.id).await {
                let dot: f32 = query_vec
                    .iter()
                    .zip(&point.vector)
                    .map(|(a, b)| a * b)
                    .sum();
                hit.similarity = dot;
                hit.fused = dot;
            }
        }
        fused.sort_by(|a, b| {
            b.fused
                .partial_cmp(&a.fused)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    /// Tokenize a query the way the keyword leg will see it.
    pub fn query_terms(query: &str) -> Vec<String> {
        tokenize(query)
    }
}

fn to_result(ranked: RankedHit) -> RetrievedMemory {
    let RankedHit {
        hit,
        score,
        lifecycle_state,
    } = ranked;
    RetrievedMemory {
        id: hit.id,
        content: hit.payload.content.clone(),
        kind: hit.payload.kind,
        context_level: hit.payload.context_level,
        project: hit.payload.project.clone(),
        score,
        similarity: hit.similarity,
        bm25_score: hit.bm25,
        fused_score: hit.fused,
        lifecycle_state,
        created_at: hit.payload.created_at,
        last_accessed: hit.payload.last_accessed,
        payload: hit.payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::embedding::hashing::HashingBackend;
    use crate::adapters::vector_store::InMemoryVectorStore;
    use crate::domain::ports::embedding::EmbeddingBackend;
    use crate::domain::types::{
        ContextLevel, MemoryKind, MemoryUnit, Scope, UnitDetails, VectorPoint,
    };
    use std::collections::{BTreeSet, HashMap};
    use uuid::Uuid;

    struct DirectEmbedder(std::sync::Mutex<HashingBackend>);

    #[async_trait::async_trait]
    impl EmbeddingProvider for DirectEmbedder {
        async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
            let mut backend = self.0.lock().unwrap();
            Ok(backend.embed_batch(&[text.to_string()])?.remove(0))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut backend = self.0.lock().unwrap();
            backend.embed_batch(texts)
        }

        fn dimension(&self) -> usize {
            64
        }

        fn model_id(&self) -> &str {
            "test-hashing"
        }
    }

    fn unit(content: &str) -> MemoryUnit {
        let id = Uuid::new_v4();
        MemoryUnit {
            id,
            content: content.into(),
            kind: MemoryKind::Fact,
            scope: Scope::Global,
            project: None,
            context_level: ContextLevel::ProjectContext,
            importance: 0.5,
            tags: BTreeSet::new(),
            metadata: HashMap::new(),
            created_at: crate::domain::types::now_ms(),
            updated_at: crate::domain::types::now_ms(),
            last_accessed: crate::domain::types::now_ms(),
            access_count: 0,
            lifecycle_state: crate::domain::types::LifecycleState::Active,
            details: UnitDetails::Memory,
        }
    }

    async fn engine_with_corpus(contents: &[&str]) -> (RetrievalEngine, Vec<UnitId>) {
        let store = Arc::new(InMemoryVectorStore::new());
        let embedder = Arc::new(DirectEmbedder(std::sync::Mutex::new(HashingBackend::new(
            64,
        ))));
        let bm25 = Arc::new(Bm25Catalog::new(Default::default()));

        store.ensure_collection("units", 64).await.unwrap();
        let mut ids = Vec::new();
        for content in contents {
            let u = unit(content);
            ids.push(u.id);
            let vector = embedder.embed_one(content).await.unwrap();
            store
                .upsert_batch(
                    "units",
                    vec![VectorPoint {
                        id: u.id,
                        vector,
                        payload: u.clone(),
                    }],
                )
                .await
                .unwrap();
            bm25.upsert_unit("units", &u).await;
        }

        let engine = RetrievalEngine::new(
            store,
            embedder,
            bm25,
            QueryExpander::default(),
            RetrievalGate::default(),
            Reranker::default(),
            EngineParams::default(),
        );
        (engine, ids)
    }

    fn request(limit: usize, mode: SearchMode) -> SearchRequest {
        SearchRequest {
            limit,
            mode,
            skip_gate: false,
            ..SearchRequest::default()
        }
    }

    #[tokio::test]
    async fn keyword_mode_finds_exact_identifiers() {
        let (engine, ids) = engine_with_corpus(&[
            "fn authenticate_user(name: &str) -> bool checks credentials",
            "fn render_markdown(input: &str) -> String",
        ])
        .await;
        let outcome = engine
            .search("units", "authenticate_user", request(1, SearchMode::Keyword))
            .await
            .unwrap();
        assert_eq!(outcome.results[0].id, ids[0]);
        assert!(outcome.results[0].bm25_score > 0.0);
        assert!(!outcome.diagnostics.matched_keywords.is_empty());
    }

    #[tokio::test]
    async fn hybrid_deduplicates_across_legs() {
        let (engine, _) = engine_with_corpus(&[
            "user login flow with token refresh",
            "database migration scripts",
        ])
        .await;
        let outcome = engine
            .search("units", "user login flow", request(10, SearchMode::Hybrid))
            .await
            .unwrap();
        let mut seen = HashSet::new();
        for result in &outcome.results {
            assert!(seen.insert(result.id), "duplicate id in results");
        }
        assert!(outcome.diagnostics.fetch_count >= outcome.results.len());
    }

    #[tokio::test]
    async fn zero_limit_returns_empty_without_work() {
        let (engine, _) = engine_with_corpus(&["something"]).await;
        let outcome = engine
            .search("units", "query_terms here", request(0, SearchMode::Hybrid))
            .await
            .unwrap();
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn gated_queries_return_marker_without_results() {
        let (engine, _) = engine_with_corpus(&["anything at all"]).await;
        let outcome = engine
            .search("units", "how are you", request(5, SearchMode::Hybrid))
            .await
            .unwrap();
        assert!(outcome.results.is_empty());
        assert!(outcome.diagnostics.gated);
    }

    #[tokio::test]
    async fn suppression_hides_previously_seen_ids() {
        let (engine, ids) = engine_with_corpus(&[
            "session token management",
            "session cookie handling",
        ])
        .await;
        let mut req = request(5, SearchMode::Hybrid);
        req.suppress.insert(ids[0]);
        let outcome = engine
            .search("units", "session_token management", req)
            .await
            .unwrap();
        assert!(outcome.results.iter().all(|r| r.id != ids[0]));
    }

    #[tokio::test]
    async fn scores_are_non_ascending() {
        let (engine, _) = engine_with_corpus(&[
            "parse tokens from source",
            "tokenize the parser input",
            "unrelated graphics code",
        ])
        .await;
        let outcome = engine
            .search("units", "parser_tokens input", request(3, SearchMode::Hybrid))
            .await
            .unwrap();
        for pair in outcome.results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}
