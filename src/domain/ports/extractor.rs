//! Code extraction contract
//!
//! The engine consumes semantic units through this seam; the parser behind
//! it is replaceable (the in-crate pattern extractor, or an external AST
//! parser adapted to the same trait).

use crate::domain::types::{Extraction, Language};

/// Extracts semantic units from source text.
///
/// Implementations must be infallible at the call boundary: a catastrophic
/// parse yields an [`Extraction`] with zero units and a warning, never an
/// error, so the indexer records the file and does not retry it forever.
pub trait UnitExtractor: Send + Sync {
    /// Extract units from `source`. Unsupported languages yield zero units.
    fn extract(&self, language: Language, source: &str) -> Extraction;

    /// The closed set of languages this extractor understands.
    fn supported_languages(&self) -> &[Language];
}
