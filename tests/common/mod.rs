//! Shared test harness: an engine over the in-process store and the
//! deterministic hashing embedder (no model download, no network).

use codemem::application::MemoryEngine;
use codemem::infrastructure::config::Config;

/// Configuration used by the integration suite.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.embedding.model_id = "feature-hashing-v1".to_string();
    config.embedding.dimension = 64;
    // Keep the scheduler out of test runtimes.
    config.memory.auto_pruning = false;
    config
}

/// Build an engine with the test configuration.
pub async fn test_engine() -> MemoryEngine {
    MemoryEngine::new(test_config())
        .await
        .expect("test engine builds")
}
