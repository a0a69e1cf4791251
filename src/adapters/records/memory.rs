//! In-memory record stores
//!
//! One struct implementing all three record ports, used by tests and by
//! deployments that do not need persistence across restarts.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::error::Result;
use crate::domain::ports::records::{EmbeddingCacheStore, FileRecordStore, RelationStore};
use crate::domain::types::{
    EmbeddingCacheEntry, FileRecord, RelationEdge, TimestampMs, UnitId,
};

/// Non-durable record store backed by hash maps.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    files: Mutex<HashMap<(String, String), FileRecord>>,
    cache: Mutex<HashMap<(String, String), EmbeddingCacheEntry>>,
    relations: Mutex<HashMap<(UnitId, UnitId, &'static str), RelationEdge>>,
}

impl InMemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached embeddings, for tests.
    pub fn cache_len(&self) -> usize {
        self.cache.lock().expect("cache lock").len()
    }
}

#[async_trait]
impl FileRecordStore for InMemoryRecordStore {
    async fn get(&self, project: &str, file_path: &str) -> Result<Option<FileRecord>> {
        let files = self.files.lock().expect("files lock");
        Ok(files
            .get(&(project.to_string(), file_path.to_string()))
            .cloned())
    }

    async fn put(&self, record: FileRecord) -> Result<()> {
        let mut files = self.files.lock().expect("files lock");
        files.insert((record.project.clone(), record.file_path.clone()), record);
        Ok(())
    }

    async fn delete(&self, project: &str, file_path: &str) -> Result<bool> {
        let mut files = self.files.lock().expect("files lock");
        Ok(files
            .remove(&(project.to_string(), file_path.to_string()))
            .is_some())
    }

    async fn list_project(&self, project: &str) -> Result<Vec<FileRecord>> {
        let files = self.files.lock().expect("files lock");
        Ok(files
            .values()
            .filter(|r| r.project == project)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EmbeddingCacheStore for InMemoryRecordStore {
    async fn get_batch(
        &self,
        model_id: &str,
        hashes: &[String],
    ) -> Result<Vec<Option<Vec<f32>>>> {
        let now = crate::domain::types::now_ms();
        let mut cache = self.cache.lock().expect("cache lock");
        Ok(hashes
            .iter()
            .map(|hash| {
                cache
                    .get_mut(&(model_id.to_string(), hash.clone()))
                    .map(|entry| {
                        entry.last_hit_at = now;
                        entry.vector.clone()
                    })
            })
            .collect())
    }

    async fn put_batch(&self, entries: Vec<EmbeddingCacheEntry>) -> Result<()> {
        let mut cache = self.cache.lock().expect("cache lock");
        for entry in entries {
            cache.insert((entry.model_id.clone(), entry.content_hash.clone()), entry);
        }
        Ok(())
    }

    async fn sweep_expired(&self, now: TimestampMs, ttl_ms: i64) -> Result<usize> {
        let mut cache = self.cache.lock().expect("cache lock");
        let before = cache.len();
        cache.retain(|_, entry| now - entry.created_at <= ttl_ms);
        Ok(before - cache.len())
    }
}

#[async_trait]
impl RelationStore for InMemoryRecordStore {
    async fn add(&self, edge: RelationEdge) -> Result<()> {
        let mut relations = self.relations.lock().expect("relations lock");
        relations
            .entry((edge.from, edge.to, edge.relation.as_str()))
            .or_insert(edge);
        Ok(())
    }

    async fn relations_of(&self, id: UnitId) -> Result<Vec<RelationEdge>> {
        let relations = self.relations.lock().expect("relations lock");
        Ok(relations
            .values()
            .filter(|e| e.from == id || e.to == id)
            .cloned()
            .collect())
    }

    async fn remove_for(&self, id: UnitId) -> Result<usize> {
        let mut relations = self.relations.lock().expect("relations lock");
        let before = relations.len();
        relations.retain(|_, e| e.from != id && e.to != id);
        Ok(before - relations.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::RelationKind;
    use uuid::Uuid;

    #[tokio::test]
    async fn file_records_round_trip() {
        let store = InMemoryRecordStore::new();
        let record = FileRecord {
            file_path: "src/lib.rs".into(),
            project: "acme".into(),
            content_hash: "abc".into(),
            last_indexed_at: 1,
            unit_count: 4,
        };
        store.put(record.clone()).await.unwrap();
        assert_eq!(store.get("acme", "src/lib.rs").await.unwrap(), Some(record));
        assert!(store.delete("acme", "src/lib.rs").await.unwrap());
        assert_eq!(store.get("acme", "src/lib.rs").await.unwrap(), None);
    }

    #[tokio::test]
    async fn cache_sweep_honors_ttl() {
        let store = InMemoryRecordStore::new();
        store
            .put_batch(vec![
                EmbeddingCacheEntry {
                    content_hash: "old".into(),
                    model_id: "m".into(),
                    vector: vec![1.0],
                    created_at: 0,
                    last_hit_at: 0,
                },
                EmbeddingCacheEntry {
                    content_hash: "new".into(),
                    model_id: "m".into(),
                    vector: vec![2.0],
                    created_at: 900,
                    last_hit_at: 900,
                },
            ])
            .await
            .unwrap();
        let evicted = store.sweep_expired(1_000, 500).await.unwrap();
        assert_eq!(evicted, 1);
        let got = store.get_batch("m", &["new".into()]).await.unwrap();
        assert_eq!(got[0], Some(vec![2.0]));
    }

    #[tokio::test]
    async fn duplicate_edges_collapse() {
        let store = InMemoryRecordStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let edge = RelationEdge {
            from: a,
            to: b,
            relation: RelationKind::Supports,
            created_at: 1,
        };
        store.add(edge.clone()).await.unwrap();
        store.add(edge).await.unwrap();
        assert_eq!(store.relations_of(a).await.unwrap().len(), 1);
        assert_eq!(store.remove_for(b).await.unwrap(), 1);
    }
}
