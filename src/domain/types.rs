//! Core domain entities
//!
//! Defines the record types shared by every layer of the engine: memory
//! units and their code extension, lifecycle classification, semantic units
//! emitted by extraction, and the result shapes returned to callers.
//!
//! ## Core Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`MemoryUnit`] | A persisted record (free-text memory or code unit) |
//! | [`CodeUnit`] | Code-specific extension carried by `kind = Code` units |
//! | [`VectorPoint`] | A unit paired with its embedding, as stored |
//! | [`SemanticUnit`] | Raw unit emitted by the code extractor |
//! | [`RetrievedMemory`] | Ranked search result with per-signal scores |
//!
//! The memory/code split is a tagged variant ([`UnitDetails`]) over a shared
//! base payload, pattern-matched at the seams; stored payloads carry enough
//! fields to reconstruct the variant on read.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Identifier of a persisted unit. Opaque 128-bit value, unique per store.
pub type UnitId = Uuid;

/// Milliseconds since the Unix epoch.
pub type TimestampMs = i64;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> TimestampMs {
    chrono::Utc::now().timestamp_millis()
}

/// Classification of what a memory records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// A durable user preference ("I prefer Python for data analysis")
    Preference,
    /// A standalone fact
    Fact,
    /// Something that happened at a point in time
    Event,
    /// A multi-step procedure worth replaying
    Workflow,
    /// Ambient context about the current work
    Context,
    /// A code unit extracted from a source file
    Code,
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Preference => "preference",
            Self::Fact => "fact",
            Self::Event => "event",
            Self::Workflow => "workflow",
            Self::Context => "context",
            Self::Code => "code",
        };
        write!(f, "{s}")
    }
}

/// Visibility scope of a unit.
///
/// `Project` scope requires [`MemoryUnit::project`] to be set; the pairing is
/// enforced at validation time and holds for every persisted unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Visible regardless of the active project
    #[default]
    Global,
    /// Scoped to a single project
    Project,
}

/// Audience/lifetime classification of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextLevel {
    /// Persistent, cross-project
    UserPreference,
    /// Persistent, scoped to a project
    ProjectContext,
    /// Ephemeral; carries a TTL and is pruned by the lifecycle engine
    SessionState,
}

impl std::fmt::Display for ContextLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UserPreference => "user_preference",
            Self::ProjectContext => "project_context",
            Self::SessionState => "session_state",
        };
        write!(f, "{s}")
    }
}

/// Derived lifecycle classification governing search weight and eviction.
///
/// Never authoritative in storage: always a function of
/// `(now, created_at, last_accessed)`, recomputed on read and written back
/// opportunistically. See [`crate::domain::lifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Accessed within the last 7 days
    Active,
    /// Accessed within the last 30 days
    Recent,
    /// Untouched for more than 30 days
    Archived,
    /// Expired session state, candidate for deletion
    Stale,
}

impl LifecycleState {
    /// Multiplier applied to the final retrieval score.
    pub fn search_weight(self) -> f32 {
        match self {
            Self::Active => 1.0,
            Self::Recent => 0.7,
            Self::Archived => 0.3,
            Self::Stale => 0.1,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Recent => "recent",
            Self::Archived => "archived",
            Self::Stale => "stale",
        };
        write!(f, "{s}")
    }
}

/// Kind of syntactic construct a code unit was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitType {
    /// Free function
    Function,
    /// Function attached to a type
    Method,
    /// Class, struct, or equivalent aggregate
    Class,
    /// Module or namespace
    Module,
    /// Anything else worth indexing
    Other,
}

impl std::fmt::Display for UnitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Module => "module",
            Self::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// Source languages the extractor recognizes.
///
/// The set is closed at build time. Files in other languages yield zero
/// units without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Java,
    Go,
    Rust,
    C,
    Cpp,
    CSharp,
    Ruby,
    Swift,
    Kotlin,
    Php,
    Sql,
    /// Unrecognized extension; not indexed
    Unknown,
}

impl Language {
    /// Map a file extension (without the dot) to a language.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "py" => Self::Python,
            "js" | "jsx" | "mjs" => Self::JavaScript,
            "ts" | "tsx" => Self::TypeScript,
            "java" => Self::Java,
            "go" => Self::Go,
            "rs" => Self::Rust,
            "c" | "h" => Self::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hh" => Self::Cpp,
            "cs" => Self::CSharp,
            "rb" => Self::Ruby,
            "swift" => Self::Swift,
            "kt" | "kts" => Self::Kotlin,
            "php" => Self::Php,
            "sql" => Self::Sql,
            _ => Self::Unknown,
        }
    }

    /// Stable lowercase name used in payload fields and filters.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Java => "java",
            Self::Go => "go",
            Self::Rust => "rust",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Ruby => "ruby",
            Self::Swift => "swift",
            Self::Kotlin => "kotlin",
            Self::Php => "php",
            Self::Sql => "sql",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "python" => Self::Python,
            "javascript" => Self::JavaScript,
            "typescript" => Self::TypeScript,
            "java" => Self::Java,
            "go" => Self::Go,
            "rust" => Self::Rust,
            "c" => Self::C,
            "cpp" | "c++" => Self::Cpp,
            "csharp" | "c#" => Self::CSharp,
            "ruby" => Self::Ruby,
            "swift" => Self::Swift,
            "kotlin" => Self::Kotlin,
            "php" => Self::Php,
            "sql" => Self::Sql,
            _ => Self::Unknown,
        })
    }
}

/// Code-specific extension carried by units with `kind = Code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeUnit {
    /// Project-relative path of the containing file
    pub file_path: String,
    /// Construct kind
    pub unit_type: UnitType,
    /// Identifier of the construct
    pub unit_name: String,
    /// Declaration text
    pub signature: String,
    /// Source language
    pub language: Language,
    /// 1-based first line of the unit
    pub start_line: u32,
    /// 1-based last line of the unit
    pub end_line: u32,
    /// Content hash of the containing file at index time
    pub file_hash: String,
    /// Content hash of the extracted region; stable identity within
    /// (project, file_path)
    pub unit_hash: String,
}

/// Kind-specific extension of a [`MemoryUnit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", tag = "variant")]
pub enum UnitDetails {
    /// Plain free-text memory
    #[default]
    Memory,
    /// Code unit with extraction metadata
    Code(CodeUnit),
}

impl UnitDetails {
    /// The code extension, if this is a code unit.
    pub fn as_code(&self) -> Option<&CodeUnit> {
        match self {
            Self::Code(code) => Some(code),
            Self::Memory => None,
        }
    }
}

/// A persisted record: the shared base payload plus its kind extension.
///
/// Stored as the payload of a [`VectorPoint`]; the embedding itself lives on
/// the point, not the unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryUnit {
    /// Opaque unique identifier
    pub id: UnitId,
    /// Sanitized text content, 1..=50,000 bytes
    pub content: String,
    /// What the memory records
    pub kind: MemoryKind,
    /// Visibility scope; `Project` iff [`Self::project`] is set
    pub scope: Scope,
    /// Owning project when scoped
    pub project: Option<String>,
    /// Audience/lifetime classification
    pub context_level: ContextLevel,
    /// Caller-assigned weight in `0.0..=1.0`
    pub importance: f32,
    /// Free-form labels, each ≤50 bytes
    pub tags: BTreeSet<String>,
    /// Scalar metadata; keys ≤100 bytes, values ≤1,000 bytes
    pub metadata: HashMap<String, serde_json::Value>,
    /// Creation time (ms since epoch)
    pub created_at: TimestampMs,
    /// Last mutation time
    pub updated_at: TimestampMs,
    /// Last retrieval or mutation time; drives lifecycle derivation
    pub last_accessed: TimestampMs,
    /// Times this unit has been returned from retrieval; monotonic
    pub access_count: u64,
    /// Lifecycle state as of the last refresh. Advisory: the derivation in
    /// [`crate::domain::lifecycle`] is authoritative, this copy exists so
    /// payload filters can see it. Refreshed opportunistically on access
    /// and by lifecycle sweeps.
    #[serde(default = "default_lifecycle_state")]
    pub lifecycle_state: LifecycleState,
    /// Kind extension
    #[serde(default)]
    pub details: UnitDetails,
}

fn default_lifecycle_state() -> LifecycleState {
    LifecycleState::Active
}

impl MemoryUnit {
    /// The code extension, if this is a code unit.
    pub fn code(&self) -> Option<&CodeUnit> {
        self.details.as_code()
    }

    /// Derived lifecycle state at time `now` with the given session TTL.
    pub fn lifecycle_state(&self, now: TimestampMs, session_ttl_ms: i64) -> LifecycleState {
        super::lifecycle::derive_state(
            now,
            self.created_at,
            self.last_accessed,
            self.context_level,
            session_ttl_ms,
        )
    }
}

/// A unit paired with its embedding, as written to the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPoint {
    /// Point id; equals the unit id
    pub id: UnitId,
    /// Unit-normalized embedding of the configured dimension
    pub vector: Vec<f32>,
    /// Full unit payload
    pub payload: MemoryUnit,
}

/// A raw hit from vector search, before fusion and reranking.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    /// Point id
    pub id: UnitId,
    /// Cosine similarity in `[-1, 1]`
    pub score: f32,
    /// Stored payload
    pub payload: MemoryUnit,
    /// Stored vector, when the caller asked for vectors
    pub vector: Option<Vec<f32>>,
}

/// Per-(project, file) bookkeeping for incremental indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Project-relative path
    pub file_path: String,
    /// Owning project
    pub project: String,
    /// Content hash of the file at last index
    pub content_hash: String,
    /// When the file was last indexed (ms since epoch)
    pub last_indexed_at: TimestampMs,
    /// Units extracted at last index
    pub unit_count: u32,
}

/// A cached embedding, keyed by `(content_hash, model_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingCacheEntry {
    /// SHA-256 of the exact text embedded
    pub content_hash: String,
    /// Embedding model identifier + version
    pub model_id: String,
    /// The embedding
    pub vector: Vec<f32>,
    /// Insertion time
    pub created_at: TimestampMs,
    /// Last cache hit
    pub last_hit_at: TimestampMs,
}

/// A semantic unit emitted by the code extractor, before indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticUnit {
    /// Construct kind
    pub unit_type: UnitType,
    /// Identifier
    pub unit_name: String,
    /// Declaration text
    pub signature: String,
    /// Unit body (declaration through closing delimiter)
    pub body: String,
    /// 1-based first line
    pub start_line: u32,
    /// 1-based last line
    pub end_line: u32,
    /// SHA-256 of the body
    pub body_hash: String,
}

/// Non-fatal warning produced when a file fails to parse.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseWarning {
    /// File that failed
    pub file_path: String,
    /// Why
    pub message: String,
}

/// Result of extraction over one file.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Units in source order; nested units follow their enclosing unit
    pub units: Vec<SemanticUnit>,
    /// Import targets referenced by the file (module/path tokens)
    pub imports: Vec<String>,
    /// Parse warnings; a catastrophic parse yields zero units plus one warning
    pub warnings: Vec<ParseWarning>,
}

/// How `search_code` combines signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Vector similarity only
    Semantic,
    /// BM25 only
    Keyword,
    /// Fused vector + BM25
    #[default]
    Hybrid,
}

/// Score fusion rule for hybrid search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FusionMode {
    /// Max-normalized weighted sum, `α·vec + (1-α)·bm25`
    #[default]
    Weighted,
    /// Reciprocal rank fusion, `Σ 1/(ρ + rank)`
    Rrf,
    /// Take top BM25 hits, re-score by vector similarity
    Cascade,
}

impl std::fmt::Display for FusionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Weighted => "weighted",
            Self::Rrf => "rrf",
            Self::Cascade => "cascade",
        };
        write!(f, "{s}")
    }
}

/// A ranked retrieval result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedMemory {
    /// Unit id
    pub id: UnitId,
    /// Unit content
    pub content: String,
    /// Unit kind
    pub kind: MemoryKind,
    /// Context level
    pub context_level: ContextLevel,
    /// Owning project, when scoped
    pub project: Option<String>,
    /// Final score after fusion, reranking, and lifecycle weighting
    pub score: f32,
    /// Raw vector similarity, when the vector side ran
    pub similarity: f32,
    /// Raw BM25 score, when the keyword side ran
    pub bm25_score: f32,
    /// Fused retrieval score before reranking
    pub fused_score: f32,
    /// Derived lifecycle state at query time
    pub lifecycle_state: LifecycleState,
    /// Creation time
    pub created_at: TimestampMs,
    /// Last access time
    pub last_accessed: TimestampMs,
    /// Full payload for callers that need the rest
    pub payload: MemoryUnit,
}

/// Aggregate diagnostics attached to every retrieval response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalDiagnostics {
    /// Candidates fetched across both retrieval legs before dedup
    pub fetch_count: usize,
    /// Wall-clock time of the whole query
    pub query_time_ms: u64,
    /// Query terms that matched at least one BM25 posting
    pub matched_keywords: Vec<String>,
    /// Fusion rule applied
    pub fusion_mode: FusionMode,
    /// Whether the rerank stage ran
    pub reranked: bool,
    /// Deadline expired; results are best-so-far
    pub partial: bool,
    /// The retrieval gate predicted no utility and skipped the search
    pub gated: bool,
}

/// A retrieval response: ranked results plus diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    /// Ranked results, scores non-ascending
    pub results: Vec<RetrievedMemory>,
    /// Aggregate diagnostics
    pub diagnostics: RetrievalDiagnostics,
}

impl RetrievalOutcome {
    /// An empty outcome with the gate marker set.
    pub fn gated() -> Self {
        Self {
            diagnostics: RetrievalDiagnostics {
                gated: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Progress event emitted while a directory index runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexProgress {
    /// Files processed so far
    pub files_done: usize,
    /// Files discovered
    pub files_total: usize,
    /// Units extracted so far
    pub units_extracted: usize,
    /// Cumulative parse time
    pub parse_ms: u64,
    /// Cumulative embedding time
    pub embed_ms: u64,
    /// Cumulative store time
    pub store_ms: u64,
}

/// Summary of a completed directory index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexingStats {
    /// Files discovered after ignore rules
    pub files_total: usize,
    /// Files processed (changed since last index)
    pub files_indexed: usize,
    /// Files skipped because their hash was unchanged
    pub files_unchanged: usize,
    /// Units extracted and stored
    pub units_indexed: usize,
    /// Files that produced parse warnings
    pub parse_warnings: usize,
    /// Embedding cache hits during this run
    pub cache_hits: usize,
    /// Embeddings actually computed
    pub cache_misses: usize,
    /// Wall-clock duration
    pub duration_ms: u64,
}

/// Status of a background indexing job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state")]
pub enum JobStatus {
    /// Queued, not yet started
    Pending,
    /// Currently processing
    Running {
        /// Latest progress snapshot
        progress: IndexProgress,
    },
    /// Finished successfully
    Completed {
        /// Final stats
        stats: IndexingStats,
    },
    /// Failed or cancelled
    Failed {
        /// What went wrong
        message: String,
    },
}

/// Handle to a background indexing job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    /// Job id
    pub id: Uuid,
    /// Project the job indexes
    pub project: String,
}

/// Typed relationship between two units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// `from` supports/corroborates `to`
    Supports,
    /// `from` contradicts `to`
    Contradicts,
    /// `from` duplicates `to`
    Duplicates,
    /// `from` (a file's unit) imports the file containing `to`
    ImportsFile,
}

impl RelationKind {
    /// Stable name used as part of the persisted edge key.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Supports => "supports",
            Self::Contradicts => "contradicts",
            Self::Duplicates => "duplicates",
            Self::ImportsFile => "imports_file",
        }
    }
}

/// A persisted relationship edge, keyed by `(from, to, relation)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationEdge {
    /// Source unit
    pub from: UnitId,
    /// Target unit
    pub to: UnitId,
    /// Edge type
    pub relation: RelationKind,
    /// When the edge was recorded
    pub created_at: TimestampMs,
}

/// Engine-wide counters surfaced by `get_stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    /// Units currently stored
    pub stored_units: u64,
    /// Memories stored since startup
    pub memories_stored: u64,
    /// Retrieval queries served since startup
    pub searches_served: u64,
    /// Embeddings computed since startup (cache misses)
    pub embeddings_computed: u64,
    /// Embedding cache hits since startup
    pub embedding_cache_hits: u64,
    /// Lifecycle sweeps completed since startup
    pub sweeps_completed: u64,
    /// Active conversation sessions
    pub active_sessions: u64,
}
