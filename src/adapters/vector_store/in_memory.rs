//! In-memory vector store provider
//!
//! Full implementation of the vector store port over process memory:
//! cosine search with filter pushdown, id-ordered scroll, payload updates.
//! Backs the test suite and single-process deployments that do not run an
//! external ANN service.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::domain::error::{Error, Result};
use crate::domain::filter::Filter;
use crate::domain::ports::vector_store::{ScrollPage, VectorStoreProvider};
use crate::domain::types::{MemoryUnit, ScoredPoint, UnitId, VectorPoint};

struct Collection {
    dimension: usize,
    points: BTreeMap<UnitId, VectorPoint>,
}

/// Process-local vector store.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn passes(filter: Option<&Filter>, unit: &MemoryUnit) -> bool {
    filter.map_or(true, |f| f.matches(unit))
}

#[async_trait]
impl VectorStoreProvider for InMemoryVectorStore {
    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<()> {
        let mut collections = self.collections.write().await;
        match collections.get(collection) {
            Some(existing) if existing.dimension != dimension => Err(Error::conflict(format!(
                "collection `{collection}` exists with dimension {}, requested {dimension}",
                existing.dimension
            ))),
            Some(_) => Ok(()),
            None => {
                collections.insert(
                    collection.to_string(),
                    Collection {
                        dimension,
                        points: BTreeMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn upsert_batch(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| Error::not_found(format!("collection `{collection}`")))?;
        for point in &points {
            if point.vector.len() != coll.dimension {
                return Err(Error::internal(format!(
                    "point {} has dimension {}, collection `{collection}` wants {}",
                    point.id,
                    point.vector.len(),
                    coll.dimension
                )));
            }
        }
        for point in points {
            coll.points.insert(point.id, point);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        filter: Option<&Filter>,
        limit: usize,
        with_vectors: bool,
    ) -> Result<Vec<ScoredPoint>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let collections = self.collections.read().await;
        let coll = collections
            .get(collection)
            .ok_or_else(|| Error::not_found(format!("collection `{collection}`")))?;
        if query.len() != coll.dimension {
            return Err(Error::internal(format!(
                "query dimension {} != collection dimension {}",
                query.len(),
                coll.dimension
            )));
        }
        let mut hits: Vec<ScoredPoint> = coll
            .points
            .values()
            .filter(|p| passes(filter, &p.payload))
            .map(|p| ScoredPoint {
                id: p.id,
                score: cosine(query, &p.vector),
                payload: p.payload.clone(),
                vector: with_vectors.then(|| p.vector.clone()),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn get_by_id(&self, collection: &str, id: UnitId) -> Result<Option<VectorPoint>> {
        let collections = self.collections.read().await;
        let coll = collections
            .get(collection)
            .ok_or_else(|| Error::not_found(format!("collection `{collection}`")))?;
        Ok(coll.points.get(&id).cloned())
    }

    async fn delete_by_ids(&self, collection: &str, ids: &[UnitId]) -> Result<usize> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| Error::not_found(format!("collection `{collection}`")))?;
        let mut removed = 0;
        for id in ids {
            if coll.points.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn delete_by_filter(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| Error::not_found(format!("collection `{collection}`")))?;
        let before = coll.points.len();
        coll.points.retain(|_, p| !filter.matches(&p.payload));
        Ok(before - coll.points.len())
    }

    async fn update_payloads(
        &self,
        collection: &str,
        updates: Vec<(UnitId, MemoryUnit)>,
    ) -> Result<usize> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| Error::not_found(format!("collection `{collection}`")))?;
        let mut applied = 0;
        for (id, payload) in updates {
            if let Some(point) = coll.points.get_mut(&id) {
                point.payload = payload;
                applied += 1;
            }
        }
        Ok(applied)
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        cursor: Option<UnitId>,
        limit: usize,
    ) -> Result<ScrollPage> {
        let collections = self.collections.read().await;
        let coll = collections
            .get(collection)
            .ok_or_else(|| Error::not_found(format!("collection `{collection}`")))?;
        let range = match cursor {
            Some(cursor) => coll
                .points
                .range((std::ops::Bound::Excluded(cursor), std::ops::Bound::Unbounded)),
            None => coll.points.range(..),
        };
        let mut points: Vec<VectorPoint> = Vec::with_capacity(limit.min(128));
        let mut next = None;
        for (_, point) in range {
            if !passes(filter, &point.payload) {
                continue;
            }
            if points.len() == limit {
                // Resume after the last emitted id; this point is re-read
                // by the next page.
                next = points.last().map(|p| p.id);
                break;
            }
            points.push(point.clone());
        }
        Ok(ScrollPage { points, next })
    }

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<usize> {
        let collections = self.collections.read().await;
        let coll = collections
            .get(collection)
            .ok_or_else(|| Error::not_found(format!("collection `{collection}`")))?;
        Ok(coll
            .points
            .values()
            .filter(|p| passes(filter, &p.payload))
            .count())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
