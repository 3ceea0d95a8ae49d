//! Embedding provider port.
//!
//! Mirrors the teacher's `EmbeddingProvider` trait shape, generalized to
//! return the domain's unified [`MediatorError`] instead of a
//! swarm-specific error enum.

use async_trait::async_trait;

use crate::domain::errors::MediatorResult;

#[derive(Debug, Clone)]
pub struct EmbeddingInput {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct EmbeddingOutput {
    pub id: String,
    pub vector: Vec<f32>,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> MediatorResult<Vec<f32>>;

    /// Batch embeds, chunking internally if the provider caps request size.
    async fn embed_batch(&self, inputs: &[EmbeddingInput]) -> MediatorResult<Vec<EmbeddingOutput>>;

    fn max_batch_size(&self) -> usize;
}
