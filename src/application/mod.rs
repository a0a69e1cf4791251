//! Application layer: the engine facade consumed by the protocol shell.

/// Engine assembly and operation surface
pub mod engine;

pub use engine::{MemoryEngine, COLLECTION};
