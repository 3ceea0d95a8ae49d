//! Deterministic, dependency-free [`EmbeddingProvider`] for tests and
//! offline operation, generalized from the teacher's
//! `ports::null_embedding::NullEmbeddingProvider`: instead of calling out
//! to a model, it hash-projects the input text into a fixed-dimension
//! unit vector so cosine similarity still behaves sensibly (identical
//! text embeds identically, different text embeds differently) without
//! any network dependency.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::domain::errors::MediatorResult;
use crate::domain::ports::{EmbeddingInput, EmbeddingOutput, EmbeddingProvider};

pub struct NullEmbeddingProvider {
    dimension: usize,
}

impl NullEmbeddingProvider {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for NullEmbeddingProvider {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Projects `text` into a `dimension`-length unit vector by repeatedly
/// hashing a running seed and scattering the digest bytes across the
/// vector's components, then normalizing.
fn hash_project(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension];
    let mut seed = text.as_bytes().to_vec();

    let mut i = 0;
    while i < dimension {
        let digest = Sha256::digest(&seed);
        for chunk in digest.chunks(4) {
            if i >= dimension {
                break;
            }
            let mut bytes = [0u8; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            let raw = i32::from_le_bytes(bytes);
            vector[i] = (raw as f64 / i32::MAX as f64) as f32;
            i += 1;
        }
        seed = digest.to_vec();
    }

    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

#[async_trait]
impl EmbeddingProvider for NullEmbeddingProvider {
    fn name(&self) -> &'static str {
        "null"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> MediatorResult<Vec<f32>> {
        Ok(hash_project(text, self.dimension))
    }

    async fn embed_batch(&self, inputs: &[EmbeddingInput]) -> MediatorResult<Vec<EmbeddingOutput>> {
        Ok(inputs
            .iter()
            .map(|input| EmbeddingOutput { id: input.id.clone(), vector: hash_project(&input.text, self.dimension) })
            .collect())
    }

    fn max_batch_size(&self) -> usize {
        256
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_text_embeds_identically() {
        let provider = NullEmbeddingProvider::new(32);
        let a = provider.embed("summarize the repo").await.unwrap();
        let b = provider.embed("summarize the repo").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn different_text_embeds_differently() {
        let provider = NullEmbeddingProvider::new(32);
        let a = provider.embed("summarize the repo").await.unwrap();
        let b = provider.embed("delete the repo").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn vectors_are_unit_normalized() {
        let provider = NullEmbeddingProvider::new(64);
        let v = provider.embed("anything").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn dimension_matches_config() {
        let provider = NullEmbeddingProvider::new(17);
        assert_eq!(provider.embed("x").await.unwrap().len(), 17);
        assert_eq!(provider.dimension(), 17);
    }
}
