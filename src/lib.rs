//! Codemem — a persistent semantic memory and code retrieval engine.
//!
//! Stores short free-text memories and semantic units extracted from
//! source code in one vector collection, indexes them into a hybrid
//! BM25 + vector space, and answers similarity, filter, and hybrid
//! queries with multi-signal reranking and lifecycle-aware weighting.
//!
//! The crate is the engine core. The tool-protocol server shell, CLI, and
//! dashboards are external consumers of [`MemoryEngine`].
//!
//! ```rust,no_run
//! use codemem::application::MemoryEngine;
//! use codemem::infrastructure::config::Config;
//! use codemem::services::StoreMemoryInput;
//!
//! # async fn example() -> codemem::Result<()> {
//! let engine = MemoryEngine::new(Config::default()).await?;
//! let id = engine
//!     .store_memory(StoreMemoryInput {
//!         content: "I prefer Python for data analysis".into(),
//!         ..StoreMemoryInput::default()
//!     })
//!     .await?;
//! let found = engine
//!     .retrieve_memories("data science language", 1, None, None)
//!     .await?;
//! assert_eq!(found.results[0].id, id);
//! # Ok(())
//! # }
//! ```

/// Adapter implementations (embedding, vector stores, extraction, search)
pub mod adapters;
/// Engine facade
pub mod application;
/// Entities, filter language, errors, ports
pub mod domain;
/// Configuration and logging setup
pub mod infrastructure;
/// Indexing, memory, lifecycle, and session services
pub mod services;
/// Input validation and sanitization
pub mod validation;

// Re-export core types for public API
pub use application::MemoryEngine;
pub use domain::error::{Error, Result};
pub use domain::filter::{Filter, Scalar};
pub use domain::types::*;
