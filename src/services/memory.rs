//! Memory operations service
//!
//! The write and read paths for free-text memories plus the code search
//! entry points. Every mutation validates its inputs, mirrors the BM25
//! index in the same logical step as the vector store write, and honors
//! the engine-wide read-only flag. Transient store failures are retried
//! here with exponential backoff; the adapters below never retry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::adapters::hybrid_search::{Bm25Catalog, RetrievalEngine, SearchRequest};
use crate::domain::error::{Error, InvalidInputKind, Result};
use crate::domain::filter::{Filter, Scalar};
use crate::domain::ports::embedding::EmbeddingProvider;
use crate::domain::ports::records::RelationStore;
use crate::domain::ports::vector_store::VectorStoreProvider;
use crate::domain::types::{
    now_ms, ContextLevel, Language, MemoryKind, MemoryUnit, RelationEdge, RelationKind,
    RetrievalOutcome, Scope, SearchMode, TimestampMs, UnitDetails, UnitId, VectorPoint,
};
use crate::validation;

use super::retry::{with_backoff, BackoffPolicy};
use super::session::SessionManager;

/// Fetch multiplier factor applied on top of the configured one when a
/// session suppresses previously seen ids.
const SESSION_MULTIPLIER_FACTOR: usize = 3;

static PREFERENCE_VERBS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(i prefer|i like|i love|i dislike|i hate|i always|i never|always use|never use|my favorite|i usually|i tend to|i want)\b",
    )
    .expect("preference pattern compiles")
});

static PROJECT_TOKENS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(this|the|our) (project|repo|repository|codebase|service|module)\b|[\w-]+/[\w.-]+|\.(rs|py|ts|tsx|js|go|java|rb|php|swift|kt|cs|cpp|sql)\b",
    )
    .expect("project pattern compiles")
});

/// Infer a context level from content when the caller left it out.
pub fn classify_context_level(content: &str) -> ContextLevel {
    if PREFERENCE_VERBS.is_match(content) {
        ContextLevel::UserPreference
    } else if PROJECT_TOKENS.is_match(content) {
        ContextLevel::ProjectContext
    } else {
        ContextLevel::SessionState
    }
}

/// Input to `store_memory`.
#[derive(Debug, Clone, Default)]
pub struct StoreMemoryInput {
    /// Memory text
    pub content: String,
    /// What it records
    pub kind: Option<MemoryKind>,
    /// Visibility scope; inferred from `project` when absent
    pub scope: Option<Scope>,
    /// Owning project
    pub project: Option<String>,
    /// Weight in `0.0..=1.0`, default 0.5
    pub importance: Option<f32>,
    /// Labels
    pub tags: Vec<String>,
    /// Scalar metadata
    pub metadata: HashMap<String, serde_json::Value>,
    /// Audience/lifetime; classified from content when absent
    pub context_level: Option<ContextLevel>,
}

/// Partial update for `update_memory`.
#[derive(Debug, Clone, Default)]
pub struct UpdateMemoryInput {
    /// Replace the content (revalidated, re-embedded)
    pub content: Option<String>,
    /// Replace the importance
    pub importance: Option<f32>,
    /// Replace the tag set
    pub tags: Option<Vec<String>>,
    /// Replace the metadata map
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    /// Replace the context level
    pub context_level: Option<ContextLevel>,
    /// Strict-update guard: fail with `Conflict` if the stored unit was
    /// modified after this timestamp
    pub expected_updated_at: Option<TimestampMs>,
}

/// What `update_memory` changed.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct UpdateDiff {
    /// Field names that changed
    pub changed: Vec<String>,
    /// Whether the embedding was recomputed
    pub embedding_regenerated: bool,
}

/// Sort order for `list_memories`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListSort {
    /// Newest first
    CreatedDesc,
    /// Most recently updated first
    UpdatedDesc,
    /// Most recently accessed first
    AccessedDesc,
    /// Highest importance first
    ImportanceDesc,
}

/// One page of `list_memories` output.
#[derive(Debug, Clone)]
pub struct ListPage {
    /// Units in this page
    pub items: Vec<MemoryUnit>,
    /// Total units matching the filter
    pub total: usize,
    /// Echoed offset
    pub offset: usize,
    /// Echoed limit
    pub limit: usize,
}

/// Code search parameters.
#[derive(Debug, Clone, Default)]
pub struct CodeSearchRequest {
    /// Restrict to one project
    pub project: Option<String>,
    /// Target result count
    pub limit: usize,
    /// Glob over `file_path` (applied after retrieval)
    pub file_pattern: Option<String>,
    /// Restrict to one language
    pub language: Option<Language>,
    /// Which legs run
    pub mode: SearchMode,
}

/// Write/read counters shared with the facade.
#[derive(Debug, Default)]
pub struct MemoryCounters {
    /// Memories stored since startup
    pub memories_stored: AtomicU64,
    /// Queries served since startup
    pub searches_served: AtomicU64,
}

/// Memory operations over the vector store + BM25 pair.
pub struct MemoryService {
    store: Arc<dyn VectorStoreProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    bm25: Arc<Bm25Catalog>,
    engine: Arc<RetrievalEngine>,
    sessions: Arc<SessionManager>,
    relations: Arc<dyn RelationStore>,
    collection: String,
    read_only: Arc<AtomicBool>,
    session_ttl_ms: i64,
    backoff: BackoffPolicy,
    counters: Arc<MemoryCounters>,
}

impl MemoryService {
    /// Assemble the service.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn VectorStoreProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        bm25: Arc<Bm25Catalog>,
        engine: Arc<RetrievalEngine>,
        sessions: Arc<SessionManager>,
        relations: Arc<dyn RelationStore>,
        collection: impl Into<String>,
        read_only: Arc<AtomicBool>,
        session_ttl_ms: i64,
    ) -> Self {
        Self {
            store,
            embedder,
            bm25,
            engine,
            sessions,
            relations,
            collection: collection.into(),
            read_only,
            session_ttl_ms,
            backoff: BackoffPolicy::default(),
            counters: Arc::new(MemoryCounters::default()),
        }
    }

    /// Shared counters.
    pub fn counters(&self) -> Arc<MemoryCounters> {
        Arc::clone(&self.counters)
    }

    fn guard_writable(&self) -> Result<()> {
        if self.read_only.load(Ordering::Acquire) {
            Err(Error::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Store one memory; returns its id.
    pub async fn store_memory(&self, input: StoreMemoryInput) -> Result<UnitId> {
        self.guard_writable()?;
        let content = validation::validate_content(&input.content)?;

        let project = match &input.project {
            Some(project) => Some(validation::validate_project(project)?),
            None => None,
        };
        let scope = input
            .scope
            .unwrap_or(if project.is_some() { Scope::Project } else { Scope::Global });
        if (scope == Scope::Project) != project.is_some() {
            return Err(Error::InvalidInput {
                field: "scope".into(),
                kind: InvalidInputKind::Malformed,
                excerpt: Some("scope=project requires a project and vice versa".into()),
            });
        }

        let importance = input.importance.unwrap_or(0.5);
        if !(0.0..=1.0).contains(&importance) {
            return Err(Error::InvalidInput {
                field: "importance".into(),
                kind: InvalidInputKind::Malformed,
                excerpt: Some(format!("{importance} outside 0.0..=1.0")),
            });
        }

        let mut tags = std::collections::BTreeSet::new();
        for tag in &input.tags {
            tags.insert(validation::validate_tag(tag)?);
        }
        validation::validate_metadata(&input.metadata)?;

        let context_level = input
            .context_level
            .unwrap_or_else(|| classify_context_level(&content));

        let vector = self.embedder.embed_one(&content).await?;
        let now = now_ms();
        let unit = MemoryUnit {
            id: Uuid::new_v4(),
            content,
            kind: input.kind.unwrap_or(MemoryKind::Fact),
            scope,
            project,
            context_level,
            importance,
            tags,
            metadata: input.metadata,
            created_at: now,
            updated_at: now,
            last_accessed: now,
            access_count: 0,
            lifecycle_state: crate::domain::types::LifecycleState::Active,
            details: UnitDetails::Memory,
        };
        let id = unit.id;

        let point = VectorPoint {
            id,
            vector,
            payload: unit.clone(),
        };
        with_backoff(self.backoff, "store_memory.upsert", || {
            let point = point.clone();
            async move { self.store.upsert_batch(&self.collection, vec![point]).await }
        })
        .await?;
        self.bm25.upsert_unit(&self.collection, &unit).await;

        self.counters.memories_stored.fetch_add(1, Ordering::Relaxed);
        debug!(%id, context_level = %unit.context_level, "memory stored");
        Ok(id)
    }

    /// Retrieve memories for a query, optionally session-aware.
    pub async fn retrieve_memories(
        &self,
        query: &str,
        limit: usize,
        filter: Option<Filter>,
        session_id: Option<Uuid>,
    ) -> Result<RetrievalOutcome> {
        let query = validation::validate_query(query)?;
        if let Some(filter) = &filter {
            filter.validate()?;
        }

        let mut request = SearchRequest {
            limit,
            filter,
            mode: SearchMode::Hybrid,
            ..SearchRequest::default()
        };

        let mut session_vec = None;
        if let Some(session_id) = session_id {
            // The embedding is cached, so the engine's own embed of the
            // same query is a cache hit, not a second model call.
            let query_vec = self.embedder.embed_one(&query).await?;
            let context = self.sessions.context_for(session_id, &query_vec).await?;
            if !context.suppress.is_empty() {
                request.fetch_multiplier =
                    Some(crate::adapters::hybrid_search::engine::DEFAULT_FETCH_MULTIPLIER
                        * SESSION_MULTIPLIER_FACTOR);
            }
            request.extra_terms = context.extra_terms;
            request.suppress = context.suppress;
            session_vec = Some(query_vec);
        }

        let outcome = self.engine.search(&self.collection, &query, request).await?;
        self.counters.searches_served.fetch_add(1, Ordering::Relaxed);

        let returned: Vec<UnitId> = outcome.results.iter().map(|r| r.id).collect();
        if let (Some(session_id), Some(query_vec)) = (session_id, session_vec) {
            self.sessions
                .record(session_id, &query, query_vec, &returned)
                .await?;
        }

        // Opportunistic usage accounting; best-effort by design.
        if !returned.is_empty() && !self.read_only.load(Ordering::Acquire) {
            self.touch_units(&returned).await;
        }
        Ok(outcome)
    }

    /// Bump access counters and refresh derived lifecycle state for units
    /// that were just returned. Failures are logged, never surfaced.
    async fn touch_units(&self, ids: &[UnitId]) {
        let now = now_ms();
        let mut updates = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.get_by_id(&self.collection, *id).await {
                Ok(Some(mut point)) => {
                    point.payload.access_count += 1;
                    point.payload.last_accessed = now;
                    point.payload.lifecycle_state =
                        point.payload.lifecycle_state(now, self.session_ttl_ms);
                    updates.push((*id, point.payload));
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(%id, error = %err, "usage writeback skipped");
                }
            }
        }
        if updates.is_empty() {
            return;
        }
        let payloads: Vec<MemoryUnit> = updates.iter().map(|(_, p)| p.clone()).collect();
        if let Err(err) = self.store.update_payloads(&self.collection, updates).await {
            debug!(error = %err, "usage writeback failed");
            return;
        }
        self.bm25.upsert_units(&self.collection, &payloads).await;
    }

    /// Fetch one memory by id.
    pub async fn get_memory(&self, id: UnitId) -> Result<MemoryUnit> {
        let point = self
            .store
            .get_by_id(&self.collection, id)
            .await?
            .ok_or_else(|| Error::not_found(format!("memory {id}")))?;
        Ok(point.payload)
    }

    /// Apply a partial update; returns what changed.
    pub async fn update_memory(
        &self,
        id: UnitId,
        input: UpdateMemoryInput,
        regenerate_embedding: bool,
    ) -> Result<UpdateDiff> {
        self.guard_writable()?;
        let mut point = self
            .store
            .get_by_id(&self.collection, id)
            .await?
            .ok_or_else(|| Error::not_found(format!("memory {id}")))?;

        if let Some(expected) = input.expected_updated_at {
            if point.payload.updated_at != expected {
                return Err(Error::conflict(format!(
                    "memory {id} was modified at {} (expected {expected})",
                    point.payload.updated_at
                )));
            }
        }

        let mut diff = UpdateDiff::default();
        if let Some(content) = input.content {
            let content = validation::validate_content(&content)?;
            if content != point.payload.content {
                point.payload.content = content;
                diff.changed.push("content".into());
            }
        }
        if let Some(importance) = input.importance {
            if !(0.0..=1.0).contains(&importance) {
                return Err(Error::InvalidInput {
                    field: "importance".into(),
                    kind: InvalidInputKind::Malformed,
                    excerpt: Some(format!("{importance} outside 0.0..=1.0")),
                });
            }
            if (importance - point.payload.importance).abs() > f32::EPSILON {
                point.payload.importance = importance;
                diff.changed.push("importance".into());
            }
        }
        if let Some(tags) = input.tags {
            let mut validated = std::collections::BTreeSet::new();
            for tag in &tags {
                validated.insert(validation::validate_tag(tag)?);
            }
            if validated != point.payload.tags {
                point.payload.tags = validated;
                diff.changed.push("tags".into());
            }
        }
        if let Some(metadata) = input.metadata {
            validation::validate_metadata(&metadata)?;
            point.payload.metadata = metadata;
            diff.changed.push("metadata".into());
        }
        if let Some(context_level) = input.context_level {
            if context_level != point.payload.context_level {
                point.payload.context_level = context_level;
                diff.changed.push("context_level".into());
            }
        }

        if diff.changed.is_empty() && !regenerate_embedding {
            return Ok(diff);
        }

        let now = now_ms();
        point.payload.updated_at = now;
        point.payload.last_accessed = now;

        if diff.changed.iter().any(|f| f == "content") || regenerate_embedding {
            point.vector = self.embedder.embed_one(&point.payload.content).await?;
            diff.embedding_regenerated = true;
        }

        let unit = point.payload.clone();
        with_backoff(self.backoff, "update_memory.upsert", || {
            let point = point.clone();
            async move { self.store.upsert_batch(&self.collection, vec![point]).await }
        })
        .await?;
        self.bm25.upsert_unit(&self.collection, &unit).await;
        Ok(diff)
    }

    /// Delete one memory and everything that references it.
    pub async fn delete_memory(&self, id: UnitId) -> Result<()> {
        self.guard_writable()?;
        let removed = with_backoff(self.backoff, "delete_memory", || async move {
            self.store.delete_by_ids(&self.collection, &[id]).await
        })
        .await?;
        if removed == 0 {
            return Err(Error::not_found(format!("memory {id}")));
        }
        self.bm25.remove_units(&self.collection, &[id]).await;
        self.relations.remove_for(id).await?;
        info!(%id, "memory deleted");
        Ok(())
    }

    /// List memories matching a filter, sorted and paginated.
    pub async fn list_memories(
        &self,
        filter: Option<Filter>,
        sort: ListSort,
        offset: usize,
        limit: usize,
    ) -> Result<ListPage> {
        if let Some(filter) = &filter {
            filter.validate()?;
        }
        let mut items = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .store
                .scroll(&self.collection, filter.as_ref(), cursor, 256)
                .await?;
            items.extend(page.points.into_iter().map(|p| p.payload));
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        let total = items.len();
        match sort {
            ListSort::CreatedDesc => items.sort_by_key(|u| std::cmp::Reverse(u.created_at)),
            ListSort::UpdatedDesc => items.sort_by_key(|u| std::cmp::Reverse(u.updated_at)),
            ListSort::AccessedDesc => {
                items.sort_by_key(|u| std::cmp::Reverse(u.last_accessed))
            }
            ListSort::ImportanceDesc => items.sort_by(|a, b| {
                b.importance
                    .partial_cmp(&a.importance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
        }
        let items = items.into_iter().skip(offset).take(limit).collect();
        Ok(ListPage {
            items,
            total,
            offset,
            limit,
        })
    }

    /// Search indexed code units.
    pub async fn search_code(
        &self,
        query: &str,
        request: CodeSearchRequest,
    ) -> Result<RetrievalOutcome> {
        let query = validation::validate_query(query)?;
        let mut filter = Filter::eq("kind", "code");
        if let Some(project) = &request.project {
            filter = filter.and(Filter::eq("project", project.as_str()));
        }
        if let Some(language) = request.language {
            filter = filter.and(Filter::eq("language", language.as_str()));
        }

        let outcome = self
            .engine
            .search(
                &self.collection,
                &query,
                SearchRequest {
                    limit: request.limit,
                    filter: Some(filter),
                    mode: request.mode,
                    skip_gate: true,
                    ..SearchRequest::default()
                },
            )
            .await?;
        self.counters.searches_served.fetch_add(1, Ordering::Relaxed);
        Ok(apply_file_pattern(outcome, request.file_pattern.as_deref()))
    }

    /// Find code similar to a snippet (vector leg only; the snippet is a
    /// document, not a query, so it gets the content byte bound).
    pub async fn find_similar_code(
        &self,
        snippet: &str,
        request: CodeSearchRequest,
    ) -> Result<RetrievalOutcome> {
        let snippet = validation::validate_content(snippet)?;
        let mut filter = Filter::eq("kind", "code");
        if let Some(project) = &request.project {
            filter = filter.and(Filter::eq("project", project.as_str()));
        }
        if let Some(language) = request.language {
            filter = filter.and(Filter::eq("language", language.as_str()));
        }

        let outcome = self
            .engine
            .search(
                &self.collection,
                &snippet,
                SearchRequest {
                    limit: request.limit,
                    filter: Some(filter),
                    mode: SearchMode::Semantic,
                    skip_gate: true,
                    ..SearchRequest::default()
                },
            )
            .await?;
        Ok(apply_file_pattern(outcome, request.file_pattern.as_deref()))
    }

    /// Record a typed relation between two existing units.
    pub async fn add_relation(
        &self,
        from: UnitId,
        to: UnitId,
        relation: RelationKind,
    ) -> Result<()> {
        self.guard_writable()?;
        for id in [from, to] {
            if self.store.get_by_id(&self.collection, id).await?.is_none() {
                return Err(Error::not_found(format!("memory {id}")));
            }
        }
        self.relations
            .add(RelationEdge {
                from,
                to,
                relation,
                created_at: now_ms(),
            })
            .await
    }

    /// Edges touching a unit, materialized on demand.
    pub async fn relations_of(&self, id: UnitId) -> Result<Vec<RelationEdge>> {
        self.relations.relations_of(id).await
    }

    /// Units currently stored in the collection.
    pub async fn stored_units(&self) -> Result<usize> {
        self.store.count(&self.collection, None).await
    }
}

fn apply_file_pattern(
    mut outcome: RetrievalOutcome,
    pattern: Option<&str>,
) -> RetrievalOutcome {
    let Some(pattern) = pattern else {
        return outcome;
    };
    let Ok(compiled) = glob::Pattern::new(pattern) else {
        return outcome;
    };
    outcome.results.retain(|result| {
        result
            .payload
            .code()
            .is_some_and(|code| compiled.matches(&code.file_path))
    });
    outcome
}

/// Scalar list helper for filters over kinds.
pub fn kind_filter(kinds: &[MemoryKind]) -> Filter {
    Filter::is_in(
        "kind",
        kinds
            .iter()
            .map(|k| Scalar::Str(k.to_string()))
            .collect(),
    )
}
