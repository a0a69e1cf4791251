//! FastEmbed-backed embedding backend
//!
//! Local ONNX inference via fastembed. Constructed once per worker thread;
//! the model instance is never shared across workers.

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::domain::error::{Error, Result};
use crate::domain::ports::embedding::{normalize, EmbeddingBackend};

/// Default model identifier.
pub const DEFAULT_MODEL_ID: &str = "BAAI/bge-small-en-v1.5";

/// Embedding backend running a local fastembed model.
pub struct FastEmbedBackend {
    model: TextEmbedding,
    model_id: String,
    dimension: usize,
}

impl FastEmbedBackend {
    /// Load the model named by `model_id` (e.g. `BAAI/bge-small-en-v1.5`).
    ///
    /// Unknown model ids fail with `DependencyMissing` rather than silently
    /// falling back: the cache keys every vector by model id, so loading a
    /// different model than asked for would poison it.
    pub fn new(model_id: &str, dimension: usize) -> Result<Self> {
        let model = match model_id {
            "BAAI/bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "BAAI/bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
            "sentence-transformers/all-MiniLM-L6-v2" => EmbeddingModel::AllMiniLML6V2,
            other => {
                return Err(Error::dependency(
                    "fastembed",
                    format!("unsupported embedding model `{other}`"),
                ))
            }
        };
        let model = TextEmbedding::try_new(
            InitOptions::new(model).with_show_download_progress(false),
        )
        .map_err(|e| Error::dependency("fastembed", e.to_string()))?;
        Ok(Self {
            model,
            model_id: model_id.to_string(),
            dimension,
        })
    }
}

impl EmbeddingBackend for FastEmbedBackend {
    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut vectors = self
            .model
            .embed(texts.to_vec(), None)
            .map_err(|e| Error::transient(format!("fastembed inference failed: {e}")))?;
        for vector in &mut vectors {
            if vector.len() != self.dimension {
                return Err(Error::internal(format!(
                    "model `{}` produced dimension {} (configured {})",
                    self.model_id,
                    vector.len(),
                    self.dimension
                )));
            }
            normalize(vector);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
