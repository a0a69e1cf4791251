//! Query expansion
//!
//! Static programming-domain synonym and co-occurrence tables. Expansion
//! feeds the BM25 side only; the vector side always embeds the original
//! query text.

use std::collections::HashSet;

use super::bm25::tokenize;

/// Synonym groups: a query term matching any entry gains the others.
const SYNONYMS: &[&[&str]] = &[
    &["auth", "authentication", "login", "signin"],
    &["config", "configuration", "settings"],
    &["db", "database", "storage"],
    &["error", "exception", "failure", "fault"],
    &["function", "method", "fn", "func"],
    &["test", "spec", "check"],
    &["delete", "remove", "drop"],
    &["create", "add", "insert", "new"],
    &["update", "modify", "edit", "change"],
    &["fetch", "get", "retrieve", "load"],
    &["search", "query", "find", "lookup"],
    &["cache", "memo", "memoize"],
    &["async", "asynchronous", "concurrent"],
    &["thread", "worker", "pool"],
    &["parse", "parser", "parsing", "lexer"],
    &["serialize", "encode", "marshal"],
    &["deserialize", "decode", "unmarshal"],
    &["request", "req", "call"],
    &["response", "resp", "reply"],
    &["token", "jwt", "credential"],
    &["user", "account", "principal"],
    &["index", "indexing", "catalog"],
    &["embed", "embedding", "vector"],
    &["log", "logging", "trace"],
    &["init", "initialize", "setup", "bootstrap"],
];

/// Domain co-occurrence terms appended for context.
const CONTEXT_TERMS: &[(&str, &[&str])] = &[
    ("auth", &["user", "token", "session"]),
    ("authentication", &["user", "token", "session"]),
    ("login", &["user", "password", "session"]),
    ("database", &["connection", "query", "transaction"]),
    ("cache", &["hit", "miss", "eviction"]),
    ("http", &["request", "response", "client"]),
    ("server", &["listen", "socket", "handler"]),
    ("embedding", &["vector", "model", "dimension"]),
    ("search", &["rank", "score", "result"]),
    ("parser", &["ast", "token", "grammar"]),
    ("queue", &["push", "pop", "worker"]),
    ("session", &["timeout", "expiry", "state"]),
    ("test", &["assert", "mock", "fixture"]),
    ("error", &["retry", "handler", "recover"]),
    ("file", &["path", "read", "write"]),
];

/// Query expander with per-term caps.
#[derive(Debug, Clone)]
pub struct QueryExpander {
    /// Master switch
    pub enabled: bool,
    /// At most this many synonyms are added per query term
    pub max_synonyms: usize,
    /// At most this many context-term groups are appended per query
    pub max_context_terms: usize,
}

impl Default for QueryExpander {
    fn default() -> Self {
        Self {
            enabled: true,
            max_synonyms: 2,
            max_context_terms: 3,
        }
    }
}

impl QueryExpander {
    /// Expand a query into BM25 scoring terms. The original terms always
    /// come first; added terms are deduplicated against them.
    pub fn expand(&self, query: &str) -> Vec<String> {
        let original = tokenize(query);
        if !self.enabled {
            return original;
        }

        let mut seen: HashSet<String> = original.iter().cloned().collect();
        let mut expanded = original.clone();

        for term in &original {
            let mut added = 0;
            for group in SYNONYMS {
                if !group.contains(&term.as_str()) {
                    continue;
                }
                for synonym in *group {
                    if added >= self.max_synonyms {
                        break;
                    }
                    if seen.insert((*synonym).to_string()) {
                        expanded.push((*synonym).to_string());
                        added += 1;
                    }
                }
                break;
            }
        }

        let mut context_added = 0;
        for term in &original {
            if context_added >= self.max_context_terms {
                break;
            }
            if let Some((_, terms)) = CONTEXT_TERMS.iter().find(|(key, _)| *key == term.as_str()) {
                for context in *terms {
                    if seen.insert((*context).to_string()) {
                        expanded.push((*context).to_string());
                    }
                }
                context_added += 1;
            }
        }

        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_expander_returns_original_terms() {
        let expander = QueryExpander {
            enabled: false,
            ..QueryExpander::default()
        };
        assert_eq!(expander.expand("auth flow"), vec!["auth", "flow"]);
    }

    #[test]
    fn synonyms_are_added_up_to_the_cap() {
        let expander = QueryExpander::default();
        let terms = expander.expand("auth");
        assert_eq!(terms[0], "auth");
        // Two synonyms (the cap), then the auth context group.
        assert!(terms.contains(&"authentication".to_string()));
        assert!(terms.contains(&"login".to_string()));
        assert!(!terms.contains(&"signin".to_string()), "cap exceeded: {terms:?}");
        assert!(terms.contains(&"token".to_string()));
    }

    #[test]
    fn expansion_never_duplicates_original_terms() {
        let expander = QueryExpander::default();
        let terms = expander.expand("login user session");
        let mut unique: Vec<&String> = terms.iter().collect();
        unique.dedup();
        assert_eq!(unique.len(), terms.len());
    }

    #[test]
    fn unknown_terms_pass_through_unchanged() {
        let expander = QueryExpander::default();
        assert_eq!(expander.expand("zanzibar quokka"), vec!["zanzibar", "quokka"]);
    }
}
