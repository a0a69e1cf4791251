//! Configuration loading
//!
//! Layered sources: optional file, then `CODEMEM__`-prefixed environment
//! variables (`CODEMEM__SEARCH__BM25_K1=2.0`). The merged result is
//! validated before anything else starts; a violation is fatal.

use std::path::Path;

use crate::domain::error::{Error, Result};

use super::Config;

/// Load configuration from an optional file plus the environment.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path.to_path_buf()));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("CODEMEM")
            .separator("__")
            .try_parsing(true),
    );

    let merged = builder
        .build()
        .map_err(|e| Error::config("config", e.to_string()))?;
    let config: Config = merged
        .try_deserialize()
        .map_err(|e| Error::config("config", e.to_string()))?;
    config.validate_all()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    #[serial_test::serial]
    fn empty_sources_produce_defaults() {
        let config = load(None).unwrap();
        assert_eq!(config.embedding.dimension, 384);
        assert!(config.search.hybrid_search);
    }

    #[test]
    #[serial_test::serial]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "[search]\nbm25_k1 = 1.9\n\n[embedding]\ndimension = 512\n"
        )
        .unwrap();
        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.search.bm25_k1, 1.9);
        assert_eq!(config.embedding.dimension, 512);
        // Untouched groups keep their defaults.
        assert_eq!(config.ranking.weight_similarity, 0.6);
    }

    #[test]
    #[serial_test::serial]
    fn invalid_file_values_are_fatal() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "[ranking]\nweight_similarity = 0.9\nweight_recency = 0.3\nweight_usage = 0.2\n"
        )
        .unwrap();
        let err = load(Some(file.path())).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
