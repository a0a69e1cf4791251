//! Infrastructure: configuration and logging setup.

/// Feature-group configuration
pub mod config;

/// Initialize tracing from `RUST_LOG`, once. Safe to call repeatedly; used
/// by binaries embedding the engine and by integration tests.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .try_init();
}
