//! Retrieval gate
//!
//! A lightweight utility predictor run before any embedding or store work.
//! Queries predicted to retrieve nothing useful are answered with an empty
//! "no-candidates" outcome instead of spending an embedding. The predictor
//! works from query shape alone and never consults the vector store.
//!
//! The 0.8 default threshold is an empirical placeholder; deployments are
//! expected to tune it against held-out queries.

use std::collections::HashSet;
use std::sync::LazyLock;

use super::bm25::tokenize;

static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "of", "in", "on", "at", "to", "for", "with",
        "is", "are", "was", "were", "be", "been", "it", "its", "this", "that", "these",
        "those", "what", "which", "who", "how", "why", "when", "where", "do", "does", "did",
        "can", "could", "will", "would", "should", "me", "my", "you", "your", "i", "we",
        "us", "our", "they", "them", "their", "please", "thanks", "hello", "hi", "hey",
    ]
    .into_iter()
    .collect()
});

/// Query utility predictor.
#[derive(Debug, Clone)]
pub struct RetrievalGate {
    /// Master switch
    pub enabled: bool,
    /// Queries scoring below this are gated
    pub threshold: f32,
}

impl Default for RetrievalGate {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.8,
        }
    }
}

impl RetrievalGate {
    /// Predicted utility of a query in `[0, 1]`.
    pub fn predict(&self, query: &str) -> f32 {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return 0.0;
        }
        let tokens = tokenize(trimmed);
        if tokens.is_empty() {
            return 0.1;
        }

        let content_tokens = tokens
            .iter()
            .filter(|t| !STOPWORDS.contains(t.as_str()))
            .count();
        let stopword_ratio = 1.0 - content_tokens as f32 / tokens.len() as f32;

        let mut score = 0.5f32;
        if content_tokens >= 2 {
            score += 0.25;
        }
        if has_identifier_shape(trimmed) {
            score += 0.2;
        }
        if (4..=300).contains(&trimmed.len()) {
            score += 0.1;
        }
        if stopword_ratio > 0.8 {
            score *= 0.3;
        }
        score.clamp(0.0, 1.0)
    }

    /// Whether the query should be gated (skip retrieval entirely).
    pub fn should_gate(&self, query: &str) -> bool {
        self.enabled && self.predict(query) < self.threshold
    }
}

/// Identifier-ish content (snake_case, camelCase, paths, `::`) is a strong
/// signal the caller is looking for code.
fn has_identifier_shape(query: &str) -> bool {
    query.split_whitespace().any(|word| {
        word.contains('_')
            || word.contains("::")
            || word.contains('/')
            || word.contains('(')
            || (word.chars().any(|c| c.is_lowercase())
                && word.chars().any(|c| c.is_uppercase()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_queries_pass_the_gate() {
        let gate = RetrievalGate::default();
        assert!(!gate.should_gate("authenticate_user"));
        assert!(!gate.should_gate("SessionStore::start timeout"));
    }

    #[test]
    fn multi_term_domain_queries_pass() {
        let gate = RetrievalGate::default();
        assert!(!gate.should_gate("user login flow"));
        assert!(!gate.should_gate("data science language"));
    }

    #[test]
    fn stopword_chatter_is_gated() {
        let gate = RetrievalGate::default();
        assert!(gate.should_gate("how are you"));
        assert!(gate.should_gate("the and of it"));
        assert!(gate.should_gate(""));
    }

    #[test]
    fn disabled_gate_passes_everything() {
        let gate = RetrievalGate {
            enabled: false,
            threshold: 0.8,
        };
        assert!(!gate.should_gate("how are you"));
    }

    #[test]
    fn predictions_stay_in_unit_interval() {
        let gate = RetrievalGate::default();
        for query in ["", "x", "авторизация", "fn main() { println!(\"hi\") }"] {
            let p = gate.predict(query);
            assert!((0.0..=1.0).contains(&p), "{query} -> {p}");
        }
    }
}
