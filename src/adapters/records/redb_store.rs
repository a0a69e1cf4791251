//! redb-backed record stores
//!
//! File records, the embedding cache, and relation edges share one embedded
//! database file with independent tables. Values are postcard-encoded.
//! redb is synchronous; every operation runs under `spawn_blocking` so the
//! async callers never park an executor thread on disk I/O.

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::domain::error::{Error, Result};
use crate::domain::ports::records::{EmbeddingCacheStore, FileRecordStore, RelationStore};
use crate::domain::types::{
    now_ms, EmbeddingCacheEntry, FileRecord, RelationEdge, TimestampMs, UnitId,
};

const FILE_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("file_records");
const EMBEDDING_CACHE: TableDefinition<&str, &[u8]> = TableDefinition::new("embedding_cache");
const RELATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("relations");
const RELATIONS_REVERSE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("relations_reverse");

/// Key separator; NUL cannot appear in validated projects/paths/hashes.
const SEP: char = '\u{0}';

/// How many `put_batch` calls pass between opportunistic TTL sweeps.
const SWEEP_EVERY: u64 = 64;

fn file_key(project: &str, file_path: &str) -> String {
    format!("{project}{SEP}{file_path}")
}

fn cache_key(model_id: &str, content_hash: &str) -> String {
    format!("{model_id}{SEP}{content_hash}")
}

fn relation_key(from: UnitId, to: UnitId, relation: &str) -> String {
    format!("{from}{SEP}{to}{SEP}{relation}")
}

fn prefix_end(prefix: &str) -> String {
    format!("{prefix}\u{10FFFF}")
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(value).map_err(|e| Error::storage(format!("encode failed: {e}")))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    postcard::from_bytes(bytes).map_err(|e| Error::storage(format!("decode failed: {e}")))
}

/// Durable record store over a single redb database file.
pub struct RedbRecordStore {
    db: Arc<Database>,
    cache_ttl_ms: i64,
    put_count: AtomicU64,
}

impl RedbRecordStore {
    /// Open (or create) the database at `path` and ensure all tables exist.
    pub fn open(path: &Path, cache_ttl_ms: i64) -> Result<Self> {
        let db = Database::create(path)
            .map_err(|e| Error::storage(format!("failed to open record store: {e}")))?;
        // Create tables up front so read transactions never hit
        // TableDoesNotExist.
        let txn = db
            .begin_write()
            .map_err(|e| Error::storage(e.to_string()))?;
        {
            txn.open_table(FILE_RECORDS)
                .map_err(|e| Error::storage(e.to_string()))?;
            txn.open_table(EMBEDDING_CACHE)
                .map_err(|e| Error::storage(e.to_string()))?;
            txn.open_table(RELATIONS)
                .map_err(|e| Error::storage(e.to_string()))?;
            txn.open_table(RELATIONS_REVERSE)
                .map_err(|e| Error::storage(e.to_string()))?;
        }
        txn.commit().map_err(|e| Error::storage(e.to_string()))?;
        Ok(Self {
            db: Arc::new(db),
            cache_ttl_ms,
            put_count: AtomicU64::new(0),
        })
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(Arc<Database>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(db))
            .await
            .map_err(|e| Error::storage(format!("blocking task failed: {e}")))?
    }

    fn sweep_blocking(db: &Database, now: TimestampMs, ttl_ms: i64) -> Result<usize> {
        let txn = db.begin_write().map_err(|e| Error::storage(e.to_string()))?;
        let mut evicted = 0usize;
        {
            let mut table = txn
                .open_table(EMBEDDING_CACHE)
                .map_err(|e| Error::storage(e.to_string()))?;
            let expired: Vec<String> = table
                .iter()
                .map_err(|e| Error::storage(e.to_string()))?
                .filter_map(|item| item.ok())
                .filter_map(|(key, value)| {
                    decode::<EmbeddingCacheEntry>(value.value())
                        .ok()
                        .filter(|entry| now - entry.created_at > ttl_ms)
                        .map(|_| key.value().to_string())
                })
                .collect();
            for key in expired {
                table
                    .remove(key.as_str())
                    .map_err(|e| Error::storage(e.to_string()))?;
                evicted += 1;
            }
        }
        txn.commit().map_err(|e| Error::storage(e.to_string()))?;
        Ok(evicted)
    }
}

#[async_trait]
impl FileRecordStore for RedbRecordStore {
    async fn get(&self, project: &str, file_path: &str) -> Result<Option<FileRecord>> {
        let key = file_key(project, file_path);
        self.run_blocking(move |db| {
            let txn = db.begin_read().map_err(|e| Error::storage(e.to_string()))?;
            let table = txn
                .open_table(FILE_RECORDS)
                .map_err(|e| Error::storage(e.to_string()))?;
            match table
                .get(key.as_str())
                .map_err(|e| Error::storage(e.to_string()))?
            {
                Some(guard) => Ok(Some(decode(guard.value())?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn put(&self, record: FileRecord) -> Result<()> {
        self.run_blocking(move |db| {
            let txn = db.begin_write().map_err(|e| Error::storage(e.to_string()))?;
            {
                let mut table = txn
                    .open_table(FILE_RECORDS)
                    .map_err(|e| Error::storage(e.to_string()))?;
                let key = file_key(&record.project, &record.file_path);
                let bytes = encode(&record)?;
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(|e| Error::storage(e.to_string()))?;
            }
            txn.commit().map_err(|e| Error::storage(e.to_string()))
        })
        .await
    }

    async fn delete(&self, project: &str, file_path: &str) -> Result<bool> {
        let key = file_key(project, file_path);
        self.run_blocking(move |db| {
            let txn = db.begin_write().map_err(|e| Error::storage(e.to_string()))?;
            let existed;
            {
                let mut table = txn
                    .open_table(FILE_RECORDS)
                    .map_err(|e| Error::storage(e.to_string()))?;
                existed = table
                    .remove(key.as_str())
                    .map_err(|e| Error::storage(e.to_string()))?
                    .is_some();
            }
            txn.commit().map_err(|e| Error::storage(e.to_string()))?;
            Ok(existed)
        })
        .await
    }

    async fn list_project(&self, project: &str) -> Result<Vec<FileRecord>> {
        let lo = file_key(project, "");
        let hi = prefix_end(&lo);
        self.run_blocking(move |db| {
            let txn = db.begin_read().map_err(|e| Error::storage(e.to_string()))?;
            let table = txn
                .open_table(FILE_RECORDS)
                .map_err(|e| Error::storage(e.to_string()))?;
            let mut records = Vec::new();
            for item in table
                .range(lo.as_str()..hi.as_str())
                .map_err(|e| Error::storage(e.to_string()))?
            {
                let (_, value) = item.map_err(|e| Error::storage(e.to_string()))?;
                records.push(decode(value.value())?);
            }
            Ok(records)
        })
        .await
    }
}

#[async_trait]
impl EmbeddingCacheStore for RedbRecordStore {
    async fn get_batch(
        &self,
        model_id: &str,
        hashes: &[String],
    ) -> Result<Vec<Option<Vec<f32>>>> {
        let model_id = model_id.to_string();
        let hashes = hashes.to_vec();
        self.run_blocking(move |db| {
            let now = now_ms();
            // One write transaction for the whole lookup: hits refresh
            // last_hit_at in the same pass.
            let txn = db.begin_write().map_err(|e| Error::storage(e.to_string()))?;
            let mut results = Vec::with_capacity(hashes.len());
            {
                let mut table = txn
                    .open_table(EMBEDDING_CACHE)
                    .map_err(|e| Error::storage(e.to_string()))?;
                for hash in &hashes {
                    let key = cache_key(&model_id, hash);
                    let entry: Option<EmbeddingCacheEntry> = match table
                        .get(key.as_str())
                        .map_err(|e| Error::storage(e.to_string()))?
                    {
                        Some(guard) => Some(decode(guard.value())?),
                        None => None,
                    };
                    match entry {
                        Some(mut entry) => {
                            entry.last_hit_at = now;
                            let bytes = encode(&entry)?;
                            table
                                .insert(key.as_str(), bytes.as_slice())
                                .map_err(|e| Error::storage(e.to_string()))?;
                            results.push(Some(entry.vector));
                        }
                        None => results.push(None),
                    }
                }
            }
            txn.commit().map_err(|e| Error::storage(e.to_string()))?;
            Ok(results)
        })
        .await
    }

    async fn put_batch(&self, entries: Vec<EmbeddingCacheEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.run_blocking(move |db| {
            let txn = db.begin_write().map_err(|e| Error::storage(e.to_string()))?;
            {
                let mut table = txn
                    .open_table(EMBEDDING_CACHE)
                    .map_err(|e| Error::storage(e.to_string()))?;
                for entry in &entries {
                    let key = cache_key(&entry.model_id, &entry.content_hash);
                    let bytes = encode(entry)?;
                    table
                        .insert(key.as_str(), bytes.as_slice())
                        .map_err(|e| Error::storage(e.to_string()))?;
                }
            }
            txn.commit().map_err(|e| Error::storage(e.to_string()))
        })
        .await?;

        // Opportunistic TTL sweep every SWEEP_EVERY inserts.
        let count = self.put_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % SWEEP_EVERY == 0 {
            let ttl = self.cache_ttl_ms;
            let evicted = self
                .run_blocking(move |db| Self::sweep_blocking(&db, now_ms(), ttl))
                .await?;
            if evicted > 0 {
                debug!(evicted, "embedding cache TTL sweep");
            }
        }
        Ok(())
    }

    async fn sweep_expired(&self, now: TimestampMs, ttl_ms: i64) -> Result<usize> {
        self.run_blocking(move |db| Self::sweep_blocking(&db, now, ttl_ms))
            .await
    }
}

#[async_trait]
impl RelationStore for RedbRecordStore {
    async fn add(&self, edge: RelationEdge) -> Result<()> {
        self.run_blocking(move |db| {
            let txn = db.begin_write().map_err(|e| Error::storage(e.to_string()))?;
            {
                let mut forward = txn
                    .open_table(RELATIONS)
                    .map_err(|e| Error::storage(e.to_string()))?;
                let key = relation_key(edge.from, edge.to, edge.relation.as_str());
                if forward
                    .get(key.as_str())
                    .map_err(|e| Error::storage(e.to_string()))?
                    .is_none()
                {
                    let bytes = encode(&edge)?;
                    forward
                        .insert(key.as_str(), bytes.as_slice())
                        .map_err(|e| Error::storage(e.to_string()))?;
                    let mut reverse = txn
                        .open_table(RELATIONS_REVERSE)
                        .map_err(|e| Error::storage(e.to_string()))?;
                    let rkey = relation_key(edge.to, edge.from, edge.relation.as_str());
                    reverse
                        .insert(rkey.as_str(), bytes.as_slice())
                        .map_err(|e| Error::storage(e.to_string()))?;
                }
            }
            txn.commit().map_err(|e| Error::storage(e.to_string()))
        })
        .await
    }

    async fn relations_of(&self, id: UnitId) -> Result<Vec<RelationEdge>> {
        self.run_blocking(move |db| {
            let txn = db.begin_read().map_err(|e| Error::storage(e.to_string()))?;
            let mut edges = Vec::new();
            let prefix = format!("{id}{SEP}");
            let hi = prefix_end(&prefix);
            let forward = txn
                .open_table(RELATIONS)
                .map_err(|e| Error::storage(e.to_string()))?;
            for item in forward
                .range(prefix.as_str()..hi.as_str())
                .map_err(|e| Error::storage(e.to_string()))?
            {
                let (_, value) = item.map_err(|e| Error::storage(e.to_string()))?;
                edges.push(decode(value.value())?);
            }
            let reverse = txn
                .open_table(RELATIONS_REVERSE)
                .map_err(|e| Error::storage(e.to_string()))?;
            for item in reverse
                .range(prefix.as_str()..hi.as_str())
                .map_err(|e| Error::storage(e.to_string()))?
            {
                let (_, value) = item.map_err(|e| Error::storage(e.to_string()))?;
                let edge: RelationEdge = decode(value.value())?;
                // Self-loops already came out of the forward scan.
                if edge.from != edge.to {
                    edges.push(edge);
                }
            }
            Ok(edges)
        })
        .await
    }

    async fn remove_for(&self, id: UnitId) -> Result<usize> {
        self.run_blocking(move |db| {
            let txn = db.begin_write().map_err(|e| Error::storage(e.to_string()))?;
            let mut removed = 0usize;
            {
                let mut forward = txn
                    .open_table(RELATIONS)
                    .map_err(|e| Error::storage(e.to_string()))?;
                let mut reverse = txn
                    .open_table(RELATIONS_REVERSE)
                    .map_err(|e| Error::storage(e.to_string()))?;
                let doomed: Vec<(String, String)> = forward
                    .iter()
                    .map_err(|e| Error::storage(e.to_string()))?
                    .filter_map(|item| item.ok())
                    .filter_map(|(key, value)| {
                        let edge: RelationEdge = decode(value.value()).ok()?;
                        (edge.from == id || edge.to == id).then(|| {
                            (
                                key.value().to_string(),
                                relation_key(edge.to, edge.from, edge.relation.as_str()),
                            )
                        })
                    })
                    .collect();
                for (fkey, rkey) in doomed {
                    forward
                        .remove(fkey.as_str())
                        .map_err(|e| Error::storage(e.to_string()))?;
                    reverse
                        .remove(rkey.as_str())
                        .map_err(|e| Error::storage(e.to_string()))?;
                    removed += 1;
                }
            }
            txn.commit().map_err(|e| Error::storage(e.to_string()))?;
            Ok(removed)
        })
        .await
    }
}
