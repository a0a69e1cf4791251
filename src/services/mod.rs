//! Application services: indexing, memory operations, lifecycle, sessions.

/// Incremental directory indexing
pub mod indexing;
/// Lifecycle sweeps
pub mod lifecycle;
/// Memory operations and code search
pub mod memory;
/// Retry with exponential backoff
pub mod retry;
/// Conversation sessions
pub mod session;

pub use indexing::{IndexOutcome, IndexingOptions, IndexingService};
pub use lifecycle::{LifecycleEngine, LifecycleOptions, SweepReport};
pub use memory::{
    classify_context_level, CodeSearchRequest, ListPage, ListSort, MemoryService,
    StoreMemoryInput, UpdateDiff, UpdateMemoryInput,
};
pub use retry::{with_backoff, BackoffPolicy};
pub use session::{SessionManager, SessionStats};
