//! Deterministic feature-hashing embedding backend
//!
//! Projects text into a fixed-dimension space by hashing token character
//! trigrams into signed buckets. No model download, no external service,
//! fully deterministic across platforms, so it backs the test suite and any
//! deployment that disables the `embeddings` feature.
//!
//! Overlapping vocabulary produces overlapping buckets, which preserves
//! enough cosine structure for retrieval tests to be meaningful.

use sha2::{Digest, Sha256};

use crate::domain::error::Result;
use crate::domain::ports::embedding::{normalize, EmbeddingBackend};

/// Model id recorded in cache keys for this backend.
pub const HASHING_MODEL_ID: &str = "feature-hashing-v1";

/// Feature-hashing embedder. Cheap to construct; one per worker.
#[derive(Debug, Clone)]
pub struct HashingBackend {
    dimension: usize,
}

impl HashingBackend {
    /// Create a backend with the given output dimension.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let raw = u64::from_le_bytes(
            digest[..8].try_into().expect("digest is at least 8 bytes"),
        );
        let index = (raw % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            // Whole-token feature plus character trigrams, so related
            // word forms ("authenticate"/"authentication") share mass.
            let (index, sign) = self.bucket(&token);
            vector[index] += sign;
            let chars: Vec<char> = token.chars().collect();
            if chars.len() > 3 {
                for gram in chars.windows(3) {
                    let gram: String = gram.iter().collect();
                    let (index, sign) = self.bucket(&gram);
                    vector[index] += 0.5 * sign;
                }
            }
        }
        // Token-free text still gets a unit vector, keeping the
        // storage-side norm invariant unconditional.
        if vector.iter().all(|v| *v == 0.0) {
            vector[0] = 1.0;
        }
        normalize(&mut vector);
        vector
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

impl EmbeddingBackend for HashingBackend {
    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        HASHING_MODEL_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn embeddings_are_deterministic_and_normalized() {
        let mut backend = HashingBackend::new(128);
        let a = backend.embed_batch(&["hello world".into()]).unwrap();
        let b = backend.embed_batch(&["hello world".into()]).unwrap();
        assert_eq!(a, b);

        let norm: f32 = a[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn related_texts_score_higher_than_unrelated() {
        let mut backend = HashingBackend::new(256);
        let vectors = backend
            .embed_batch(&[
                "user authentication and login flow".into(),
                "authenticate the user at login".into(),
                "matrix multiplication kernels".into(),
            ])
            .unwrap();
        let related = cosine(&vectors[0], &vectors[1]);
        let unrelated = cosine(&vectors[0], &vectors[2]);
        assert!(related > unrelated);
    }

    #[test]
    fn token_free_text_still_embeds_to_a_unit_vector() {
        let mut backend = HashingBackend::new(64);
        let vectors = backend.embed_batch(&["".into(), "!!!".into()]).unwrap();
        for vector in vectors {
            let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4);
        }
    }
}
