//! Embedding service: batch and single-text vector generation.
//!
//! Orchestrates embedding generation for tool/capability indexing, chunking
//! large batches according to the provider's own batch-size cap. Ported
//! near-verbatim from the teacher's `services/embedding_service.rs`, which
//! already generalizes cleanly (it has no knowledge of tools or capabilities,
//! only of `EmbeddingProvider`).

use std::sync::Arc;

use crate::domain::errors::MediatorResult;
use crate::domain::ports::{EmbeddingInput, EmbeddingOutput, EmbeddingProvider};

/// Minimum item count that triggers the provider's batch API rather than
/// individual calls.
#[derive(Debug, Clone)]
pub struct EmbeddingServiceConfig {
    pub batch_threshold: usize,
}

impl Default for EmbeddingServiceConfig {
    fn default() -> Self {
        Self { batch_threshold: 5 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchEmbeddingReport {
    pub total_items: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub api_calls: usize,
}

pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    config: EmbeddingServiceConfig,
}

impl EmbeddingService {
    #[must_use]
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: EmbeddingServiceConfig) -> Self {
        Self { provider, config }
    }

    #[must_use]
    pub fn with_defaults(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self::new(provider, EmbeddingServiceConfig::default())
    }

    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub async fn embed_single(&self, text: &str) -> MediatorResult<Vec<f32>> {
        self.provider.embed(text).await
    }

    /// Embeds multiple texts. Below `batch_threshold`, embeds individually;
    /// at or above it, uses the provider's batch API, auto-chunked to its
    /// `max_batch_size`.
    pub async fn embed_many(&self, inputs: &[EmbeddingInput]) -> MediatorResult<Vec<EmbeddingOutput>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let max_size = self.provider.max_batch_size();
        if inputs.len() < self.config.batch_threshold || max_size == 0 {
            let mut outputs = Vec::with_capacity(inputs.len());
            for input in inputs {
                let vector = self.provider.embed(&input.text).await?;
                outputs.push(EmbeddingOutput { id: input.id.clone(), vector });
            }
            return Ok(outputs);
        }

        let mut all_outputs = Vec::with_capacity(inputs.len());
        for chunk in inputs.chunks(max_size) {
            let chunk_outputs = self.provider.embed_batch(chunk).await?;
            all_outputs.extend(chunk_outputs);
        }
        Ok(all_outputs)
    }

    pub async fn embed_many_with_report(&self, inputs: &[EmbeddingInput]) -> (Vec<EmbeddingOutput>, BatchEmbeddingReport) {
        let total = inputs.len();
        let max_size = self.provider.max_batch_size().max(1);
        let api_calls =
            if inputs.len() < self.config.batch_threshold { inputs.len() } else { inputs.len().div_ceil(max_size) };

        match self.embed_many(inputs).await {
            Ok(outputs) => {
                let report = BatchEmbeddingReport {
                    total_items: total,
                    succeeded: outputs.len(),
                    failed: total.saturating_sub(outputs.len()),
                    api_calls,
                };
                (outputs, report)
            }
            Err(_) => {
                let report = BatchEmbeddingReport { total_items: total, succeeded: 0, failed: total, api_calls };
                (Vec::new(), report)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockEmbeddingProvider {
        dimension: usize,
        max_batch: usize,
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for MockEmbeddingProvider {
        fn name(&self) -> &'static str {
            "mock"
        }
        fn dimension(&self) -> usize {
            self.dimension
        }
        async fn embed(&self, _text: &str) -> MediatorResult<Vec<f32>> {
            Ok(vec![0.1; self.dimension])
        }
        async fn embed_batch(&self, inputs: &[EmbeddingInput]) -> MediatorResult<Vec<EmbeddingOutput>> {
            Ok(inputs.iter().map(|i| EmbeddingOutput { id: i.id.clone(), vector: vec![0.1; self.dimension] }).collect())
        }
        fn max_batch_size(&self) -> usize {
            self.max_batch
        }
    }

    #[tokio::test]
    async fn embed_many_empty_returns_empty() {
        let service = EmbeddingService::with_defaults(Arc::new(MockEmbeddingProvider { dimension: 4, max_batch: 10 }));
        assert!(service.embed_many(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn small_batch_embeds_individually() {
        let service = EmbeddingService::new(
            Arc::new(MockEmbeddingProvider { dimension: 4, max_batch: 100 }),
            EmbeddingServiceConfig { batch_threshold: 5 },
        );
        let inputs = vec![
            EmbeddingInput { id: "1".to_string(), text: "a".to_string() },
            EmbeddingInput { id: "2".to_string(), text: "b".to_string() },
        ];
        let result = service.embed_many(&inputs).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].id, "1");
    }

    #[tokio::test]
    async fn large_batch_auto_chunks() {
        let service = EmbeddingService::new(
            Arc::new(MockEmbeddingProvider { dimension: 4, max_batch: 3 }),
            EmbeddingServiceConfig { batch_threshold: 2 },
        );
        let inputs: Vec<EmbeddingInput> =
            (0..7).map(|i| EmbeddingInput { id: i.to_string(), text: format!("text {i}") }).collect();
        let (outputs, report) = service.embed_many_with_report(&inputs).await;
        assert_eq!(outputs.len(), 7);
        assert_eq!(report.api_calls, 3);
        assert_eq!(report.succeeded, 7);
    }
}
