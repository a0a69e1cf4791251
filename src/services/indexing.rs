//! Incremental directory indexing
//!
//! Walks a source tree, detects changed files by content hash, extracts
//! semantic units, embeds them in one batch per file, and replaces the
//! file's points in the vector store and BM25 index. Deterministic unit
//! ids make re-indexing idempotent: an unchanged tree produces zero new
//! embeddings and the same ids.
//!
//! Large trees (above the configured threshold) run as background jobs on
//! a small dedicated pool; one active job per project.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::embedding::PipelineCounters;
use crate::adapters::hybrid_search::Bm25Catalog;
use crate::domain::error::{Error, Result};
use crate::domain::filter::Filter;
use crate::domain::ports::embedding::EmbeddingProvider;
use crate::domain::ports::extractor::UnitExtractor;
use crate::domain::ports::records::{FileRecordStore, RelationStore};
use crate::domain::ports::vector_store::VectorStoreProvider;
use crate::domain::types::{
    now_ms, CodeUnit, FileRecord, IndexProgress, IndexingStats, JobHandle, JobStatus,
    Language, LifecycleState, MemoryKind, MemoryUnit, RelationEdge, RelationKind, Scope,
    SemanticUnit, UnitDetails, UnitId, VectorPoint,
};
use crate::validation;

use super::retry::{with_backoff, BackoffPolicy};

/// Built-in exclusions merged with the caller's ignore rules.
const BUILTIN_EXCLUDES: &[&str] = &[
    "node_modules",
    "target",
    "build",
    "dist",
    "out",
    "vendor",
    ".git",
    ".hg",
    ".svn",
    "__pycache__",
    ".venv",
    "venv",
];

/// Ignore file consulted in the indexed tree, gitignore syntax.
pub const IGNORE_FILE: &str = ".cmignore";

/// Files larger than this are skipped outright.
const MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;

/// Content byte bound for one unit's canonical text.
const MAX_CANONICAL_BYTES: usize = validation::MAX_CONTENT_BYTES;

/// Indexer tuning knobs.
#[derive(Debug, Clone)]
pub struct IndexingOptions {
    /// File count above which the call goes to the background pool
    pub background_threshold: usize,
    /// Extra exclude patterns (gitignore syntax)
    pub exclude_patterns: Vec<String>,
    /// Background worker pool size
    pub background_workers: usize,
}

impl Default for IndexingOptions {
    fn default() -> Self {
        Self {
            background_threshold: 500,
            exclude_patterns: Vec::new(),
            background_workers: 2,
        }
    }
}

/// What `index_directory` returned: a finished run or a job handle.
#[derive(Debug, Clone)]
pub enum IndexOutcome {
    /// The tree was processed inline
    Completed(IndexingStats),
    /// The tree went to the background pool
    Background(JobHandle),
}

/// Deterministic id for a code unit: the same (project, file, canonical
/// text) reproduces the same id across runs and processes.
pub fn unit_id(project: &str, file_path: &str, unit_hash: &str) -> UnitId {
    let mut hasher = Sha256::new();
    hasher.update(project.as_bytes());
    hasher.update([0u8]);
    hasher.update(file_path.as_bytes());
    hasher.update([0u8]);
    hasher.update(unit_hash.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

/// Stable per-file anchor id used as the endpoint of import edges.
pub fn file_anchor_id(project: &str, file_path: &str) -> UnitId {
    unit_id(project, file_path, "file")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

fn truncate_at_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// The canonical indexable text of one unit.
fn canonical_text(file_path: &str, unit: &SemanticUnit) -> String {
    let text = format!(
        "{file_path}:{}-{}\n{}\n{}",
        unit.start_line, unit.end_line, unit.signature, unit.body
    );
    truncate_at_boundary(&text, MAX_CANONICAL_BYTES).to_string()
}

struct FileWork {
    absolute: PathBuf,
    relative: String,
    language: Language,
}

/// Directory indexing service.
pub struct IndexingService {
    store: Arc<dyn VectorStoreProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    bm25: Arc<Bm25Catalog>,
    extractor: Arc<dyn UnitExtractor>,
    files: Arc<dyn FileRecordStore>,
    relations: Arc<dyn RelationStore>,
    collection: String,
    read_only: Arc<AtomicBool>,
    options: IndexingOptions,
    backoff: BackoffPolicy,
    embed_counters: Option<Arc<PipelineCounters>>,
    progress_tx: broadcast::Sender<IndexProgress>,
    jobs: DashJobs,
    background_slots: Arc<Semaphore>,
    cancel: CancellationToken,
}

struct DashJobs {
    statuses: dashmap::DashMap<Uuid, JobStatus>,
    active_projects: dashmap::DashMap<String, Uuid>,
}

impl IndexingService {
    /// Assemble the service.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn VectorStoreProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        bm25: Arc<Bm25Catalog>,
        extractor: Arc<dyn UnitExtractor>,
        files: Arc<dyn FileRecordStore>,
        relations: Arc<dyn RelationStore>,
        collection: impl Into<String>,
        read_only: Arc<AtomicBool>,
        options: IndexingOptions,
        embed_counters: Option<Arc<PipelineCounters>>,
        cancel: CancellationToken,
    ) -> Self {
        let (progress_tx, _) = broadcast::channel(64);
        let background_slots = Arc::new(Semaphore::new(options.background_workers.max(1)));
        Self {
            store,
            embedder,
            bm25,
            extractor,
            files,
            relations,
            collection: collection.into(),
            read_only,
            options,
            backoff: BackoffPolicy::default(),
            embed_counters,
            progress_tx,
            jobs: DashJobs {
                statuses: dashmap::DashMap::new(),
                active_projects: dashmap::DashMap::new(),
            },
            background_slots,
            cancel,
        }
    }

    fn collection(&self) -> String {
        self.collection.clone()
    }

    /// Subscribe to progress events.
    pub fn progress(&self) -> broadcast::Receiver<IndexProgress> {
        self.progress_tx.subscribe()
    }

    /// Status of a background job.
    pub fn job_status(&self, job: Uuid) -> Option<JobStatus> {
        self.jobs.statuses.get(&job).map(|s| s.value().clone())
    }

    /// Index a directory tree. Small trees run inline; trees above the
    /// background threshold return a job handle immediately.
    pub async fn index_directory(
        self: Arc<Self>,
        project: &str,
        root: &Path,
        recursive: bool,
    ) -> Result<IndexOutcome> {
        if self.read_only.load(Ordering::Acquire) {
            return Err(Error::ReadOnly);
        }
        let project = validation::validate_project(project)?;
        if !root.is_dir() {
            return Err(Error::not_found(format!(
                "directory {}",
                root.display()
            )));
        }

        let work = self.discover(root, recursive)?;
        info!(
            project,
            files = work.len(),
            root = %root.display(),
            "directory index requested"
        );

        if work.len() <= self.options.background_threshold {
            let stats = self.run_index(&project, work, None).await?;
            return Ok(IndexOutcome::Completed(stats));
        }

        // Background path: one active job per project.
        if self.jobs.active_projects.contains_key(&project) {
            return Err(Error::conflict(format!(
                "project `{project}` already has an active indexing job"
            )));
        }
        let job_id = Uuid::new_v4();
        self.jobs.statuses.insert(job_id, JobStatus::Pending);
        self.jobs.active_projects.insert(project.clone(), job_id);

        let service = Arc::clone(&self);
        let job_project = project.clone();
        tokio::spawn(async move {
            let _slot = match service.background_slots.clone().acquire_owned().await {
                Ok(slot) => slot,
                Err(_) => return,
            };
            let result = service.run_index(&job_project, work, Some(job_id)).await;
            match result {
                Ok(stats) => {
                    service
                        .jobs
                        .statuses
                        .insert(job_id, JobStatus::Completed { stats });
                }
                Err(err) => {
                    service.jobs.statuses.insert(
                        job_id,
                        JobStatus::Failed {
                            message: err.to_string(),
                        },
                    );
                }
            }
            service.jobs.active_projects.remove(&job_project);
        });

        Ok(IndexOutcome::Background(JobHandle {
            id: job_id,
            project,
        }))
    }

    /// Walk the tree, applying ignore rules and the supported-extension
    /// set.
    fn discover(&self, root: &Path, recursive: bool) -> Result<Vec<FileWork>> {
        let mut overrides = OverrideBuilder::new(root);
        for exclude in BUILTIN_EXCLUDES {
            overrides
                .add(&format!("!{exclude}/"))
                .map_err(|e| Error::internal(format!("bad builtin exclude: {e}")))?;
        }
        for exclude in &self.options.exclude_patterns {
            overrides
                .add(&format!("!{exclude}"))
                .map_err(|e| Error::invalid_filter(format!("bad exclude pattern: {e}")))?;
        }
        let overrides = overrides
            .build()
            .map_err(|e| Error::internal(format!("ignore rules failed to build: {e}")))?;

        let mut builder = WalkBuilder::new(root);
        builder
            .overrides(overrides)
            .add_custom_ignore_filename(IGNORE_FILE)
            .follow_links(false);
        if !recursive {
            builder.max_depth(Some(1));
        }

        let mut work = Vec::new();
        for entry in builder.build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "walk error, skipping entry");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(false) {
                debug!(path = %entry.path().display(), "oversized file skipped");
                continue;
            }
            let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) else {
                continue;
            };
            let language = Language::from_extension(ext);
            if language == Language::Unknown {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            work.push(FileWork {
                absolute: entry.path().to_path_buf(),
                relative,
                language,
            });
        }
        work.sort_by(|a, b| a.relative.cmp(&b.relative));
        Ok(work)
    }

    async fn run_index(
        &self,
        project: &str,
        work: Vec<FileWork>,
        job_id: Option<Uuid>,
    ) -> Result<IndexingStats> {
        let started = Instant::now();
        let hits_before = self.embed_counters.as_ref().map_or(0, |c| c.hits());
        let misses_before = self.embed_counters.as_ref().map_or(0, |c| c.misses());

        let mut stats = IndexingStats {
            files_total: work.len(),
            ..IndexingStats::default()
        };
        let mut progress = IndexProgress {
            files_total: work.len(),
            ..IndexProgress::default()
        };
        // Stems of everything seen this run, for import-edge resolution.
        let mut stems: HashMap<String, String> = HashMap::new();
        let mut pending_imports: Vec<(String, String)> = Vec::new();

        for file in &work {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(stem) = Path::new(&file.relative)
                .file_stem()
                .and_then(|s| s.to_str())
            {
                stems.insert(stem.to_lowercase(), file.relative.clone());
            }

            match self.index_file(project, file, &mut progress).await {
                Ok(FileResult::Unchanged) => stats.files_unchanged += 1,
                Ok(FileResult::Indexed {
                    units,
                    warnings,
                    imports,
                }) => {
                    stats.files_indexed += 1;
                    stats.units_indexed += units;
                    stats.parse_warnings += warnings;
                    for import in imports {
                        pending_imports.push((file.relative.clone(), import));
                    }
                }
                Err(err) if err.is_transient() => return Err(err),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    warn!(file = %file.relative, error = %err, "file skipped");
                    stats.parse_warnings += 1;
                }
            }

            progress.files_done += 1;
            let _ = self.progress_tx.send(progress.clone());
            if let Some(job_id) = job_id {
                self.jobs.statuses.insert(
                    job_id,
                    JobStatus::Running {
                        progress: progress.clone(),
                    },
                );
            }
        }

        self.record_import_edges(project, &stems, pending_imports)
            .await;

        stats.cache_hits = (self.embed_counters.as_ref().map_or(0, |c| c.hits())
            - hits_before) as usize;
        stats.cache_misses = (self.embed_counters.as_ref().map_or(0, |c| c.misses())
            - misses_before) as usize;
        stats.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            project,
            files_indexed = stats.files_indexed,
            files_unchanged = stats.files_unchanged,
            units = stats.units_indexed,
            "directory index finished"
        );
        Ok(stats)
    }

    async fn index_file(
        &self,
        project: &str,
        file: &FileWork,
        progress: &mut IndexProgress,
    ) -> Result<FileResult> {
        let source = std::fs::read_to_string(&file.absolute)
            .map_err(|e| Error::storage(format!("read {}: {e}", file.relative)))?;
        let file_hash = sha256_hex(source.as_bytes());

        if let Some(record) = self.files.get(project, &file.relative).await? {
            if record.content_hash == file_hash {
                return Ok(FileResult::Unchanged);
            }
        }

        // Replace-file step 1: existing units for this file are stale.
        self.delete_file_units(project, &file.relative).await?;

        let parse_started = Instant::now();
        let extraction = self.extractor.extract(file.language, &source);
        progress.parse_ms += parse_started.elapsed().as_millis() as u64;

        let canonicals: Vec<String> = extraction
            .units
            .iter()
            .map(|unit| canonical_text(&file.relative, unit))
            .collect();

        let embed_started = Instant::now();
        let vectors = self.embedder.embed_batch(&canonicals).await?;
        progress.embed_ms += embed_started.elapsed().as_millis() as u64;

        let now = now_ms();
        let points: Vec<VectorPoint> = extraction
            .units
            .iter()
            .zip(canonicals.iter())
            .zip(vectors)
            .map(|((unit, canonical), vector)| {
                let unit_hash = sha256_hex(canonical.as_bytes());
                let id = unit_id(project, &file.relative, &unit_hash);
                let payload = MemoryUnit {
                    id,
                    content: canonical.clone(),
                    kind: MemoryKind::Code,
                    scope: Scope::Project,
                    project: Some(project.to_string()),
                    context_level: crate::domain::types::ContextLevel::ProjectContext,
                    importance: 0.5,
                    tags: Default::default(),
                    metadata: Default::default(),
                    created_at: now,
                    updated_at: now,
                    last_accessed: now,
                    access_count: 0,
                    lifecycle_state: LifecycleState::Active,
                    details: UnitDetails::Code(CodeUnit {
                        file_path: file.relative.clone(),
                        unit_type: unit.unit_type,
                        unit_name: unit.unit_name.clone(),
                        signature: unit.signature.clone(),
                        language: file.language,
                        start_line: unit.start_line,
                        end_line: unit.end_line,
                        file_hash: file_hash.clone(),
                        unit_hash,
                    }),
                };
                VectorPoint {
                    id,
                    vector,
                    payload,
                }
            })
            .collect();

        let store_started = Instant::now();
        if !points.is_empty() {
            let collection = self.collection();
            with_backoff(self.backoff, "index.upsert", || {
                let points = points.clone();
                let collection = collection.clone();
                async move { self.store.upsert_batch(&collection, points).await }
            })
            .await?;
            let payloads: Vec<MemoryUnit> =
                points.iter().map(|p| p.payload.clone()).collect();
            self.bm25.upsert_units(&self.collection, &payloads).await;
        }
        progress.store_ms += store_started.elapsed().as_millis() as u64;
        progress.units_extracted += points.len();

        // Replace-file step 2: the record commits the new hash. A crash
        // before this point leaves the old record, so the next run simply
        // reprocesses the file.
        self.files
            .put(FileRecord {
                file_path: file.relative.clone(),
                project: project.to_string(),
                content_hash: file_hash,
                last_indexed_at: now,
                unit_count: points.len() as u32,
            })
            .await?;

        Ok(FileResult::Indexed {
            units: points.len(),
            warnings: extraction.warnings.len(),
            imports: extraction.imports,
        })
    }

    async fn delete_file_units(&self, project: &str, file_path: &str) -> Result<()> {
        let filter = Filter::eq("kind", "code")
            .and(Filter::eq("project", project))
            .and(Filter::eq("file_path", file_path));
        let mut stale_ids = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .store
                .scroll(&self.collection, Some(&filter), cursor, 256)
                .await?;
            stale_ids.extend(page.points.iter().map(|p| p.id));
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        if stale_ids.is_empty() {
            return Ok(());
        }
        let collection = self.collection();
        with_backoff(self.backoff, "index.delete_stale", || {
            let ids = stale_ids.clone();
            let collection = collection.clone();
            async move { self.store.delete_by_ids(&collection, &ids).await }
        })
        .await?;
        self.bm25.remove_units(&self.collection, &stale_ids).await;
        Ok(())
    }

    /// Resolve import targets against indexed file stems and persist
    /// file-imports-file edges. Unresolvable imports are dropped.
    async fn record_import_edges(
        &self,
        project: &str,
        stems: &HashMap<String, String>,
        imports: Vec<(String, String)>,
    ) {
        let now = now_ms();
        for (src, target) in imports {
            let last_segment = target
                .rsplit(['.', ':', '/', '\\'])
                .find(|s| !s.is_empty())
                .unwrap_or(&target)
                .to_lowercase();
            let Some(dst) = stems.get(&last_segment) else {
                continue;
            };
            if dst == &src {
                continue;
            }
            let edge = RelationEdge {
                from: file_anchor_id(project, &src),
                to: file_anchor_id(project, dst),
                relation: RelationKind::ImportsFile,
                created_at: now,
            };
            if let Err(err) = self.relations.add(edge).await {
                debug!(error = %err, "import edge not recorded");
            }
        }
    }
}

enum FileResult {
    Unchanged,
    Indexed {
        units: usize,
        warnings: usize,
        imports: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_ids_are_deterministic_and_distinct() {
        let a = unit_id("acme", "src/lib.rs", "hash-1");
        let b = unit_id("acme", "src/lib.rs", "hash-1");
        assert_eq!(a, b);

        assert_ne!(a, unit_id("acme", "src/lib.rs", "hash-2"));
        assert_ne!(a, unit_id("acme", "src/other.rs", "hash-1"));
        assert_ne!(a, unit_id("other", "src/lib.rs", "hash-1"));
    }

    #[test]
    fn canonical_text_carries_location_signature_and_body() {
        let unit = SemanticUnit {
            unit_type: crate::domain::types::UnitType::Function,
            unit_name: "f".into(),
            signature: "fn f() -> u32".into(),
            body: "fn f() -> u32 {\n    1\n}".into(),
            start_line: 3,
            end_line: 5,
            body_hash: "h".into(),
        };
        let text = canonical_text("src/lib.rs", &unit);
        assert!(text.starts_with("src/lib.rs:3-5\n"));
        assert!(text.contains("fn f() -> u32"));
    }

    #[test]
    fn canonical_text_is_bounded() {
        let unit = SemanticUnit {
            unit_type: crate::domain::types::UnitType::Function,
            unit_name: "big".into(),
            signature: "fn big()".into(),
            body: "x".repeat(MAX_CANONICAL_BYTES * 2),
            start_line: 1,
            end_line: 9999,
            body_hash: "h".into(),
        };
        let text = canonical_text("src/big.rs", &unit);
        assert!(text.len() <= MAX_CANONICAL_BYTES);
    }
}
