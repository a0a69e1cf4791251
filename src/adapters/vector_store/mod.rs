//! Vector store provider implementations
//!
//! Two backends behind [`crate::domain::ports::vector_store`]: a
//! process-local store and a remote ANN service with a bounded connection
//! pool.

/// Remote ANN service provider
pub mod http;
/// Process-local provider
pub mod in_memory;
/// Bounded connection pool
pub mod pool;

pub use http::HttpVectorStore;
pub use in_memory::InMemoryVectorStore;
pub use pool::{ConnectionPool, PoolConfig};
