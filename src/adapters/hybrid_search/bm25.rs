//! BM25+ in-memory keyword index
//!
//! Inverted postings, document lengths, and collection statistics over the
//! textual content of every stored unit, partitioned by collection. The
//! index stores a payload snapshot per document so filters evaluate without
//! touching the vector store, keeping both sides of hybrid search in
//! agreement about the searchable set.
//!
//! Consistency contract: callers update this index in the same logical step
//! as every vector store upsert or delete, and rebuild it by scrolling the
//! store once at startup.

use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use crate::domain::error::Result;
use crate::domain::filter::Filter;
use crate::domain::ports::vector_store::VectorStoreProvider;
use crate::domain::types::{MemoryUnit, ScoredPoint, UnitId};

/// Tokens shorter than this are dropped at index and query time.
const TOKEN_MIN_CHARS: usize = 2;

/// Scroll page size during rebuild.
const REBUILD_PAGE: usize = 256;

/// BM25+ parameters.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    /// Term-frequency saturation
    pub k1: f32,
    /// Document-length normalization
    pub b: f32,
    /// Additive lower bound (the "+" in BM25+)
    pub delta: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            delta: 1.0,
        }
    }
}

/// Tokenize text: lowercase, split on non-alphanumerics, drop short tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() >= TOKEN_MIN_CHARS)
        .map(str::to_string)
        .collect()
}

struct DocMeta {
    length: u32,
    terms: Vec<String>,
    payload: MemoryUnit,
}

/// One collection's keyword index.
#[derive(Default)]
struct Bm25Index {
    postings: HashMap<String, HashMap<UnitId, u32>>,
    docs: HashMap<UnitId, DocMeta>,
    total_len: u64,
    deletions_since_compact: usize,
}

impl Bm25Index {
    fn upsert(&mut self, unit: &MemoryUnit) {
        self.remove(unit.id);
        let tokens = tokenize(&unit.content);
        let length = tokens.len() as u32;
        let mut freqs: HashMap<String, u32> = HashMap::new();
        for token in tokens {
            *freqs.entry(token).or_insert(0) += 1;
        }
        let terms: Vec<String> = freqs.keys().cloned().collect();
        for (term, tf) in &freqs {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(unit.id, *tf);
        }
        self.total_len += u64::from(length);
        self.docs.insert(
            unit.id,
            DocMeta {
                length,
                terms,
                payload: unit.clone(),
            },
        );
    }

    fn remove(&mut self, id: UnitId) -> bool {
        let Some(meta) = self.docs.remove(&id) else {
            return false;
        };
        self.total_len -= u64::from(meta.length);
        for term in &meta.terms {
            if let Some(docs) = self.postings.get_mut(term) {
                docs.remove(&id);
                if docs.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
        self.deletions_since_compact += 1;
        true
    }

    fn avg_doc_len(&self) -> f32 {
        if self.docs.is_empty() {
            0.0
        } else {
            self.total_len as f32 / self.docs.len() as f32
        }
    }

    fn idf(&self, df: f32) -> f32 {
        let n = self.docs.len() as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score(
        &self,
        query_terms: &[String],
        filter: Option<&Filter>,
        limit: usize,
        params: Bm25Params,
    ) -> (Vec<ScoredPoint>, Vec<String>) {
        if limit == 0 || self.docs.is_empty() {
            return (Vec::new(), Vec::new());
        }
        let avg_len = self.avg_doc_len();
        let mut matched_terms: Vec<String> = Vec::new();
        let mut scores: HashMap<UnitId, f32> = HashMap::new();
        let mut seen_terms: HashSet<&str> = HashSet::new();

        for term in query_terms {
            // Repeated query terms contribute once.
            if !seen_terms.insert(term.as_str()) {
                continue;
            }
            let Some(docs) = self.postings.get(term) else {
                continue;
            };
            matched_terms.push(term.clone());
            let idf = self.idf(docs.len() as f32);
            for (id, tf) in docs {
                let Some(meta) = self.docs.get(id) else {
                    continue;
                };
                let tf = *tf as f32;
                let norm = params.k1
                    * (1.0 - params.b + params.b * meta.length as f32 / avg_len.max(1.0));
                let contribution = idf * ((params.k1 + 1.0) * tf / (norm + tf) + params.delta);
                *scores.entry(*id).or_insert(0.0) += contribution;
            }
        }

        let mut hits: Vec<ScoredPoint> = scores
            .into_iter()
            .filter_map(|(id, score)| {
                let meta = self.docs.get(&id)?;
                if let Some(filter) = filter {
                    if !filter.matches(&meta.payload) {
                        return None;
                    }
                }
                Some(ScoredPoint {
                    id,
                    score,
                    payload: meta.payload.clone(),
                    vector: None,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        (hits, matched_terms)
    }

    fn compact(&mut self) {
        self.postings.retain(|_, docs| !docs.is_empty());
        self.postings.shrink_to_fit();
        for docs in self.postings.values_mut() {
            docs.shrink_to_fit();
        }
        self.docs.shrink_to_fit();
        self.deletions_since_compact = 0;
    }
}

/// All collections' keyword indexes behind one reader-writer lock.
///
/// Shared between the indexer (writes) and the retrieval engine (reads);
/// rebuild takes the write lock for the duration of the scroll.
pub struct Bm25Catalog {
    params: Bm25Params,
    indexes: RwLock<HashMap<String, Bm25Index>>,
}

impl Bm25Catalog {
    /// Create an empty catalog.
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            indexes: RwLock::new(HashMap::new()),
        }
    }

    /// Index (or reindex) one unit.
    pub async fn upsert_unit(&self, collection: &str, unit: &MemoryUnit) {
        let mut indexes = self.indexes.write().await;
        indexes
            .entry(collection.to_string())
            .or_default()
            .upsert(unit);
    }

    /// Index a batch of units under one lock acquisition.
    pub async fn upsert_units(&self, collection: &str, units: &[MemoryUnit]) {
        let mut indexes = self.indexes.write().await;
        let index = indexes.entry(collection.to_string()).or_default();
        for unit in units {
            index.upsert(unit);
        }
    }

    /// Remove units by id; returns how many were present.
    pub async fn remove_units(&self, collection: &str, ids: &[UnitId]) -> usize {
        let mut indexes = self.indexes.write().await;
        let Some(index) = indexes.get_mut(collection) else {
            return 0;
        };
        ids.iter().filter(|id| index.remove(**id)).count()
    }

    /// Score a tokenized query against one collection.
    pub async fn score(
        &self,
        collection: &str,
        query_terms: &[String],
        filter: Option<&Filter>,
        limit: usize,
    ) -> (Vec<ScoredPoint>, Vec<String>) {
        let indexes = self.indexes.read().await;
        match indexes.get(collection) {
            Some(index) => index.score(query_terms, filter, limit, self.params),
            None => (Vec::new(), Vec::new()),
        }
    }

    /// Documents currently indexed in one collection.
    pub async fn doc_count(&self, collection: &str) -> usize {
        let indexes = self.indexes.read().await;
        indexes.get(collection).map_or(0, |i| i.docs.len())
    }

    /// Rebuild one collection by scrolling the vector store. O(N); takes
    /// the write lock exclusively for the duration.
    pub async fn rebuild(
        &self,
        collection: &str,
        store: &dyn VectorStoreProvider,
    ) -> Result<usize> {
        let mut fresh = Bm25Index::default();
        let mut cursor = None;
        let mut indexed = 0usize;
        loop {
            let page = store.scroll(collection, None, cursor, REBUILD_PAGE).await?;
            for point in &page.points {
                fresh.upsert(&point.payload);
                indexed += 1;
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        let mut indexes = self.indexes.write().await;
        indexes.insert(collection.to_string(), fresh);
        Ok(indexed)
    }

    /// Compact collections whose deletions since the last compact exceed
    /// `threshold`; returns how many were compacted.
    pub async fn compact_if_needed(&self, threshold: usize) -> usize {
        let mut indexes = self.indexes.write().await;
        let mut compacted = 0;
        for index in indexes.values_mut() {
            if index.deletions_since_compact > threshold {
                index.compact();
                compacted += 1;
            }
        }
        compacted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{ContextLevel, MemoryKind, Scope, UnitDetails};
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn unit(content: &str) -> MemoryUnit {
        MemoryUnit {
            id: Uuid::new_v4(),
            content: content.into(),
            kind: MemoryKind::Fact,
            scope: Scope::Global,
            project: None,
            context_level: ContextLevel::ProjectContext,
            importance: 0.5,
            tags: BTreeSet::new(),
            metadata: HashMap::new(),
            created_at: 0,
            updated_at: 0,
            last_accessed: 0,
            access_count: 0,
            lifecycle_state: crate::domain::types::LifecycleState::Active,
            details: UnitDetails::Memory,
        }
    }

    #[tokio::test]
    async fn relevant_documents_outscore_unrelated() {
        let catalog = Bm25Catalog::new(Bm25Params::default());
        let auth = unit("fn authenticate_user(username: &str) -> bool");
        let db = unit("fn create_database_connection() -> Connection");
        catalog.upsert_units("units", &[auth.clone(), db]).await;

        let (hits, matched) = catalog
            .score("units", &tokenize("authenticate user"), None, 10)
            .await;
        assert_eq!(hits[0].id, auth.id);
        assert!(matched.contains(&"authenticate".to_string()));
    }

    #[tokio::test]
    async fn reindex_replaces_old_terms() {
        let catalog = Bm25Catalog::new(Bm25Params::default());
        let mut u = unit("original content about parsers");
        catalog.upsert_unit("units", &u).await;

        u.content = "replacement content about lexers".into();
        catalog.upsert_unit("units", &u).await;

        let (hits, _) = catalog
            .score("units", &tokenize("parsers"), None, 10)
            .await;
        assert!(hits.is_empty(), "stale term still matches after reindex");
        let (hits, _) = catalog.score("units", &tokenize("lexers"), None, 10).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(catalog.doc_count("units").await, 1);
    }

    #[tokio::test]
    async fn removed_documents_stop_matching() {
        let catalog = Bm25Catalog::new(Bm25Params::default());
        let u = unit("ephemeral session token cleanup");
        catalog.upsert_unit("units", &u).await;
        assert_eq!(catalog.remove_units("units", &[u.id]).await, 1);
        let (hits, _) = catalog.score("units", &tokenize("session"), None, 10).await;
        assert!(hits.is_empty());
        // Second removal is a no-op.
        assert_eq!(catalog.remove_units("units", &[u.id]).await, 0);
    }

    #[tokio::test]
    async fn filters_restrict_keyword_hits() {
        let catalog = Bm25Catalog::new(Bm25Params::default());
        let mut scoped = unit("project scoped fact about caching");
        scoped.scope = Scope::Project;
        scoped.project = Some("acme".into());
        let global = unit("global fact about caching");
        catalog.upsert_units("units", &[scoped.clone(), global]).await;

        let filter = Filter::eq("project", "acme");
        let (hits, _) = catalog
            .score("units", &tokenize("caching"), Some(&filter), 10)
            .await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, scoped.id);
    }

    #[tokio::test]
    async fn bm25_plus_gives_long_documents_a_floor() {
        let catalog = Bm25Catalog::new(Bm25Params::default());
        let long_text = format!("{} caching", "padding word ".repeat(200));
        let long = unit(&long_text);
        let short = unit("caching layer");
        catalog.upsert_units("units", &[long.clone(), short]).await;

        let (hits, _) = catalog.score("units", &tokenize("caching"), None, 10).await;
        // Both match; the long document still gets a positive score.
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.score > 0.0));
    }

    #[tokio::test]
    async fn compaction_resets_the_deletion_counter() {
        let catalog = Bm25Catalog::new(Bm25Params::default());
        let units: Vec<MemoryUnit> = (0..10)
            .map(|i| unit(&format!("document number {i} with shared words")))
            .collect();
        catalog.upsert_units("units", &units).await;
        let ids: Vec<UnitId> = units.iter().take(6).map(|u| u.id).collect();
        catalog.remove_units("units", &ids).await;

        assert_eq!(catalog.compact_if_needed(5).await, 1);
        // Under threshold now.
        assert_eq!(catalog.compact_if_needed(5).await, 0);
        assert_eq!(catalog.doc_count("units").await, 4);
    }
}
