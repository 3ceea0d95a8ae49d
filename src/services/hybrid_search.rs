//! Hybrid Search Engine (`spec.md` §4.1).
//!
//! Blends cosine-similarity semantic search with an Adamic-Adar graph
//! relatedness score over the dependency hypergraph, weighted by an
//! adaptive α and each candidate's reliability factor. Orchestration shape
//! (provider-backed service wrapping a repository) follows the teacher's
//! `services/embedding_service.rs::EmbeddingService`.

use std::sync::Arc;

use crate::domain::errors::{MediatorError, MediatorResult};
use crate::domain::models::{cosine_similarity, DependencyGraph, Embedding, SearchTarget};
use crate::domain::ports::{CapabilityRepository, DependencyEdgeRepository, EmbeddingProvider, ToolRepository};

/// Maximum intent text length accepted, beyond which the request is
/// rejected with `InvalidIntent` rather than embedded.
const MAX_INTENT_LEN: usize = 4096;

/// Number of top candidates retrieved by semantic similarity before
/// graph re-ranking (`spec.md` §4.1 step 2, "N≈50").
const SEMANTIC_CANDIDATE_POOL: usize = 50;

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub target: SearchTarget,
    pub score: f64,
    pub explanation: String,
}

pub struct HybridSearchEngine {
    embedding_provider: Arc<dyn EmbeddingProvider>,
    tool_repository: Arc<dyn ToolRepository>,
    capability_repository: Arc<dyn CapabilityRepository>,
    edge_repository: Arc<dyn DependencyEdgeRepository>,
}

impl HybridSearchEngine {
    #[must_use]
    pub fn new(
        embedding_provider: Arc<dyn EmbeddingProvider>,
        tool_repository: Arc<dyn ToolRepository>,
        capability_repository: Arc<dyn CapabilityRepository>,
        edge_repository: Arc<dyn DependencyEdgeRepository>,
    ) -> Self {
        Self { embedding_provider, tool_repository, capability_repository, edge_repository }
    }

    /// `search(intent_text, k, min_score)` from `spec.md` §4.1.
    pub async fn search(&self, intent_text: &str, k: usize, min_score: f64) -> MediatorResult<Vec<SearchResult>> {
        if intent_text.is_empty() || intent_text.len() > MAX_INTENT_LEN {
            return Err(MediatorError::InvalidIntent(format!(
                "intent text must be 1..={MAX_INTENT_LEN} bytes, got {}",
                intent_text.len()
            )));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let intent_vector = self
            .embedding_provider
            .embed(intent_text)
            .await
            .map_err(|e| MediatorError::EmbeddingUnavailable(e.to_string()))?;
        let intent_embedding = Embedding::new(intent_vector);

        let tool_embeddings = self.tool_repository.all_embeddings().await?;
        let capabilities = self.capability_repository.list().await?;
        let edges = self.edge_repository.all_edges().await?;
        let graph = DependencyGraph::from_edges(&edges);

        if tool_embeddings.is_empty() && capabilities.is_empty() {
            return Ok(Vec::new());
        }

        struct Candidate {
            target: SearchTarget,
            semantic: f32,
            reliability: f64,
            last_used: Option<chrono::DateTime<chrono::Utc>>,
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        for embedding in &tool_embeddings {
            let semantic = intent_embedding.cosine_similarity(&embedding.vector);
            candidates.push(Candidate {
                target: SearchTarget::Tool(embedding.tool_id.clone()),
                semantic,
                reliability: 1.0,
                last_used: None,
            });
        }
        for capability in &capabilities {
            let semantic = cosine_similarity(&intent_embedding.0, &capability.intent_embedding.0);
            let stats = self.capability_repository.get_stats(&capability.fqdn).await?;
            candidates.push(Candidate {
                target: SearchTarget::Capability(capability.fqdn.0.clone()),
                semantic,
                reliability: stats.reliability_factor(),
                last_used: stats.last_used,
            });
        }

        candidates.sort_by(|a, b| b.semantic.total_cmp(&a.semantic));
        candidates.truncate(SEMANTIC_CANDIDATE_POOL);

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let alpha = adaptive_alpha(&candidates.iter().map(|c| c.semantic).collect::<Vec<_>>());

        // The semantic top-1 candidate anchors the graph term: relatedness
        // is scored against what the intent is most clearly about, not
        // against each candidate itself (Adamic-Adar of a node with itself
        // is degenerate and would not discriminate between candidates).
        let anchor = &candidates[0].target;

        let mut scored: Vec<(SearchResult, Option<chrono::DateTime<chrono::Utc>>)> = candidates
            .iter()
            .map(|c| {
                let graph_score = if c.target == *anchor { 1.0 } else { graph.adamic_adar(&c.target, anchor) };
                let blended = f64::from(alpha) * f64::from(c.semantic) + f64::from(1.0 - alpha) * f64::from(graph_score);
                let score = blended * c.reliability;
                let result = SearchResult {
                    target: c.target.clone(),
                    score,
                    explanation: format!(
                        "semantic={:.3} graph={:.3} alpha={:.3} reliability={:.3}",
                        c.semantic, graph_score, alpha, c.reliability
                    ),
                };
                (result, c.last_used)
            })
            .collect();

        // Ties broken by last-used recency (`spec.md` §4.1 step 5); ties
        // among never-used candidates fall back to stable insertion order.
        scored.sort_by(|(a, a_used), (b, b_used)| {
            b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| b_used.cmp(a_used))
        });

        let mut results: Vec<SearchResult> = scored.into_iter().map(|(result, _)| result).collect();
        results.retain(|r| r.score >= min_score);
        results.truncate(k);
        Ok(results)
    }
}

/// `alpha` is "the normalized ratio of the candidate's semantic top-1
/// score to its top-N mean; high semantic dominance ⇒ higher α"
/// (`spec.md` §4.1 step 4). A single dominant top score biases toward
/// semantic similarity; a flat distribution biases toward graph
/// relatedness.
fn adaptive_alpha(semantic_scores: &[f32]) -> f32 {
    if semantic_scores.is_empty() {
        return 0.6;
    }
    let top1 = semantic_scores.iter().copied().fold(f32::MIN, f32::max);
    let mean: f32 = semantic_scores.iter().sum::<f32>() / semantic_scores.len() as f32;
    if mean <= 0.0 {
        return 0.5;
    }
    let ratio = top1 / mean;
    // Maps (0, inf) -> (0, 1), monotonically increasing in dominance.
    (ratio / (1.0 + ratio)).clamp(0.05, 0.95)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adaptive_alpha_rises_with_semantic_dominance() {
        let flat = adaptive_alpha(&[0.5, 0.5, 0.5, 0.5]);
        let dominant = adaptive_alpha(&[0.95, 0.1, 0.1, 0.1]);
        assert!(dominant > flat);
    }

    #[test]
    fn adaptive_alpha_handles_empty_and_zero_mean() {
        assert!((adaptive_alpha(&[]) - 0.6).abs() < f32::EPSILON);
        assert!((adaptive_alpha(&[0.0, 0.0]) - 0.5).abs() < f32::EPSILON);
    }
}
