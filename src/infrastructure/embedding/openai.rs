//! HTTP embedding provider adapter, talking to any OpenAI-compatible
//! `/v1/embeddings` endpoint (the real OpenAI API, Azure OpenAI, or a
//! local server) — the same shape as the teacher's `OpenAiEmbeddingProvider`,
//! with the dimension read from `EmbeddingConfig` rather than hardcoded.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::errors::{MediatorError, MediatorResult};
use crate::domain::ports::{EmbeddingInput, EmbeddingOutput, EmbeddingProvider};

#[derive(Debug, Clone)]
pub struct HttpEmbeddingConfig {
    /// Falls back to the `CASYS_PML_EMBEDDING_API_KEY` env var.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
    pub max_batch_size: usize,
}

impl Default for HttpEmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimension: 1024,
            timeout_secs: 30,
            max_batch_size: 512,
        }
    }
}

impl HttpEmbeddingConfig {
    fn get_api_key(&self) -> MediatorResult<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("CASYS_PML_EMBEDDING_API_KEY").ok())
            .ok_or_else(|| {
                MediatorError::EmbeddingUnavailable(
                    "no embedding API key configured (set CASYS_PML_EMBEDDING_API_KEY or config.embedding.api_key)"
                        .to_string(),
                )
            })
    }
}

pub struct HttpEmbeddingProvider {
    config: HttpEmbeddingConfig,
    client: Arc<reqwest::Client>,
}

impl HttpEmbeddingProvider {
    #[must_use]
    pub fn new(config: HttpEmbeddingConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to build embedding HTTP client");
        Self { config, client: Arc::new(client) }
    }

    async fn call_embeddings_api(&self, texts: Vec<String>) -> MediatorResult<Vec<Vec<f32>>> {
        let api_key = self.config.get_api_key()?;
        let url = format!("{}/embeddings", self.config.base_url);

        let request_body = EmbeddingsRequest { model: self.config.model.clone(), input: texts };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(MediatorError::EmbeddingUnavailable(format!("embedding API returned {status}: {body}")));
        }

        let mut result: EmbeddingsResponse =
            response.json().await.map_err(|e| MediatorError::EmbeddingUnavailable(e.to_string()))?;

        result.data.sort_by_key(|d| d.index);
        Ok(result.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed(&self, text: &str) -> MediatorResult<Vec<f32>> {
        let results = self.call_embeddings_api(vec![text.to_string()]).await?;
        results.into_iter().next().ok_or_else(|| MediatorError::EmbeddingUnavailable("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, inputs: &[EmbeddingInput]) -> MediatorResult<Vec<EmbeddingOutput>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = inputs.iter().map(|i| i.text.clone()).collect();
        let mut outputs = Vec::with_capacity(inputs.len());

        for chunk_start in (0..texts.len()).step_by(self.config.max_batch_size) {
            let chunk_end = (chunk_start + self.config.max_batch_size).min(texts.len());
            let chunk_texts = texts[chunk_start..chunk_end].to_vec();
            let chunk_inputs = &inputs[chunk_start..chunk_end];

            let vectors = self.call_embeddings_api(chunk_texts).await?;
            for (input, vector) in chunk_inputs.iter().zip(vectors) {
                outputs.push(EmbeddingOutput { id: input.id.clone(), vector });
            }
        }

        Ok(outputs)
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_the_configured_dimension() {
        let config = HttpEmbeddingConfig::default();
        assert_eq!(config.dimension, 1024);
        assert_eq!(config.max_batch_size, 512);
    }

    #[test]
    fn api_key_resolves_from_config_before_env() {
        let config = HttpEmbeddingConfig { api_key: Some("test-key".to_string()), ..Default::default() };
        assert_eq!(config.get_api_key().unwrap(), "test-key");
    }
}
