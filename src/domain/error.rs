//! Error handling types
//!
//! One error enum for the whole engine, mapped onto a small taxonomy the
//! caller can act on: correct the input, retry with backoff, or give up.
//! Retries never live in the adapters; the indexer and retrieval layers own
//! retry policy and consult [`Error::is_transient`].

use thiserror::Error;

/// Result type alias for operations that can fail
pub type Result<T> = std::result::Result<T, Error>;

/// Input class that tripped the injection catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionClass {
    /// SQL injection patterns
    Sql,
    /// Prompt-injection patterns
    Prompt,
    /// Shell-command patterns
    Shell,
    /// Path-traversal patterns
    PathTraversal,
}

impl std::fmt::Display for InjectionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Sql => "sql",
            Self::Prompt => "prompt",
            Self::Shell => "shell",
            Self::PathTraversal => "path_traversal",
        };
        write!(f, "{s}")
    }
}

/// Why an input failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidInputKind {
    /// Required input was empty
    Empty,
    /// Input exceeded its byte bound
    TooLarge,
    /// Input matched the injection catalog
    Injection(InjectionClass),
    /// Structural problem (missing project for project scope, bad range, ...)
    Malformed,
}

/// Main error type for the memory engine
#[derive(Error, Debug)]
pub enum Error {
    /// Validation failure. The caller must correct the input; never retried.
    #[error("invalid input ({field}): {kind:?}{}", .excerpt.as_deref().map(|e| format!(" [{e}]")).unwrap_or_default())]
    InvalidInput {
        /// Which input failed
        field: String,
        /// Failure class
        kind: InvalidInputKind,
        /// Bounded excerpt of the offending input (≤256 bytes)
        excerpt: Option<String>,
    },

    /// Id or collection missing
    #[error("not found: {resource}")]
    NotFound {
        /// The resource that was not found
        resource: String,
    },

    /// Operation blocked by the global read-only flag
    #[error("engine is read-only")]
    ReadOnly,

    /// Concurrent modification detected on a strict-update path
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict
        message: String,
    },

    /// Connection/timeout/resource exhaustion in an external service.
    /// Retriable with exponential backoff one level above the adapter.
    #[error("transient failure: {message}")]
    Transient {
        /// Description of the failure
        message: String,
    },

    /// External service unavailable (ANN service, model runtime)
    #[error("dependency unavailable: {service}: {message}")]
    DependencyMissing {
        /// Which dependency
        service: String,
        /// Description of the failure
        message: String,
    },

    /// A text in a batch failed to embed; the whole batch fails
    #[error("embedding failed at index {index}: {cause}")]
    EmbeddingFailure {
        /// Position of the offending text within the batch
        index: usize,
        /// Underlying cause
        cause: String,
    },

    /// Cooperative cancellation observed
    #[error("operation cancelled")]
    Cancelled,

    /// Deadline expired with nothing to return
    #[error("operation timed out after {elapsed_ms} ms")]
    Timeout {
        /// How long the operation ran
        elapsed_ms: u64,
    },

    /// Filter references an unknown field or malformed predicate
    #[error("invalid filter: {message}")]
    InvalidFilter {
        /// Description of the problem
        message: String,
    },

    /// Configuration constraint violation; fatal at load time
    #[error("configuration error ({key}): {message}")]
    Config {
        /// The violating key
        key: String,
        /// What constraint was violated
        message: String,
    },

    /// Local persistence (file records, embedding cache) failure
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage error
        message: String,
    },

    /// I/O operation error
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// JSON parsing or serialization error
    #[error("JSON error: {source}")]
    Json {
        /// The underlying JSON error
        #[from]
        source: serde_json::Error,
    },

    /// Invariant violation. Logged with full diagnostics, surfaced opaque.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error
        message: String,
    },
}

impl Error {
    /// Create a not-found error
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a transient (retriable) error
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Create a dependency-missing error
    pub fn dependency<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Self::DependencyMissing {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create an invalid-filter error
    pub fn invalid_filter<S: Into<String>>(message: S) -> Self {
        Self::InvalidFilter {
            message: message.into(),
        }
    }

    /// Create a configuration error naming the violating key
    pub fn config<K: Into<String>, M: Into<String>>(key: K, message: M) -> Self {
        Self::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::DependencyMissing { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::transient("pool exhausted").is_transient());
        assert!(Error::dependency("ann", "connection refused").is_transient());
        assert!(!Error::not_found("unit").is_transient());
        assert!(!Error::ReadOnly.is_transient());
    }

    #[test]
    fn invalid_input_displays_excerpt() {
        let err = Error::InvalidInput {
            field: "content".into(),
            kind: InvalidInputKind::Injection(InjectionClass::Sql),
            excerpt: Some("drop table".into()),
        };
        let text = err.to_string();
        assert!(text.contains("content"));
        assert!(text.contains("drop table"));
    }
}
