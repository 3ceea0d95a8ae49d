//! Dense vector embeddings and cosine-similarity utilities.
//!
//! A [`ToolEmbedding`] is 1:1 with a [`super::tool::Tool`] (`spec.md` §3);
//! the same vector shape is reused for capability intent embeddings.

use serde::{Deserialize, Serialize};

/// A dense embedding vector, fixed-dimension per [`super::config::EmbeddingConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    #[must_use]
    pub fn new(vector: Vec<f32>) -> Self {
        Self(vector)
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    /// Cosine similarity in `[-1.0, 1.0]`. Two zero vectors compare as `0.0`.
    #[must_use]
    pub fn cosine_similarity(&self, other: &Self) -> f32 {
        cosine_similarity(&self.0, &other.0)
    }
}

/// Cosine similarity between two equal-length vectors. Returns `0.0` if
/// either has zero magnitude or the lengths differ.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// A tool's embedding, keyed by the owning tool id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEmbedding {
    pub tool_id: String,
    pub vector: Embedding,
    /// Hash of the text the vector was derived from, to detect staleness.
    pub source_text_hash: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = Embedding::new(vec![1.0, 2.0, 3.0]);
        assert!((v.cosine_similarity(&v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!(a.cosine_similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_is_safe() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 1.0]);
        assert_eq!(a.cosine_similarity(&b), 0.0);
    }

    #[test]
    fn mismatched_length_is_safe() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert_eq!(a.cosine_similarity(&b), 0.0);
    }
}
