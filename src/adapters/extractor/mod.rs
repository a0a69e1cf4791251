//! Code extraction adapters
//!
//! The in-crate pattern-table extractor behind the
//! [`crate::domain::ports::extractor`] port.

/// Per-language rule tables
pub mod languages;
/// Pattern-table extractor
pub mod pattern;

pub use languages::{spec_for, BlockStyle, LanguageSpec, SUPPORTED};
pub use pattern::PatternExtractor;
