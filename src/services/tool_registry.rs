//! Tool Registry (`spec.md` §2, §3): keeps [`ToolRepository`] in sync with
//! whatever the [`EndpointClientPool`] currently reports.
//!
//! Created when the endpoint pool lists a server, refreshed on schema
//! change, deleted when the server is removed — this module is the
//! "diff discovered state against the stored table, upsert the delta"
//! shape the rest of the storage layer already uses, applied to the one
//! thing nothing else in the crate currently owns: deciding *when* a
//! tool's embedding actually needs to be regenerated.

use std::collections::HashSet;
use std::sync::Arc;

use crate::domain::errors::MediatorResult;
use crate::domain::models::{Embedding, Tool, ToolEmbedding};
use crate::domain::ports::ToolRepository;
use crate::services::embedding_service::EmbeddingService;
use crate::services::endpoint_pool::EndpointClientPool;

/// Tallies what a refresh pass actually did, for startup/periodic logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub discovered: usize,
    pub upserted: usize,
    pub embedded: usize,
    pub removed_servers: usize,
}

pub struct ToolRegistry {
    repository: Arc<dyn ToolRepository>,
    embeddings: Arc<EmbeddingService>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new(repository: Arc<dyn ToolRepository>, embeddings: Arc<EmbeddingService>) -> Self {
        Self { repository, embeddings }
    }

    /// Lists every tool across `pool`'s registered endpoints, upserts each
    /// into the repository, and regenerates an embedding only for a tool
    /// whose `embedding_text()` hash changed since the last refresh
    /// (`spec.md` §3: "Regenerated only if the tool's text changes").
    /// Tools belonging to a server no longer in the pool are deleted.
    pub async fn refresh(&self, pool: &EndpointClientPool) -> MediatorResult<RefreshReport> {
        let discovered = pool.list_all_tools().await?;
        let mut report = RefreshReport { discovered: discovered.len(), ..RefreshReport::default() };

        let live_servers: HashSet<String> = pool.server_ids().into_iter().collect();
        let known_servers: HashSet<String> =
            self.repository.list().await?.into_iter().map(|tool| tool.server_id).collect();
        for stale_server in known_servers.difference(&live_servers) {
            self.repository.delete_by_server(stale_server).await?;
            report.removed_servers += 1;
        }

        for tool in &discovered {
            self.upsert_with_embedding(tool, &mut report).await?;
        }

        Ok(report)
    }

    async fn upsert_with_embedding(&self, tool: &Tool, report: &mut RefreshReport) -> MediatorResult<()> {
        self.repository.upsert(tool).await?;
        report.upserted += 1;

        let text = tool.embedding_text();
        let hash = text_hash(&text);
        let needs_embedding = match self.repository.get_embedding(&tool.id).await? {
            Some(existing) => existing.source_text_hash != hash,
            None => true,
        };
        if !needs_embedding {
            return Ok(());
        }

        let vector = self.embeddings.embed_single(&text).await?;
        self.repository
            .upsert_embedding(&ToolEmbedding {
                tool_id: tool.id.to_string(),
                vector: Embedding::new(vector),
                source_text_hash: hash,
            })
            .await?;
        report.embedded += 1;
        Ok(())
    }
}

/// A cheap, stable hash of a tool's embedding source text, used only to
/// detect change — not for any cryptographic purpose.
fn text_hash(text: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ToolId;
    use crate::infrastructure::endpoints::MockEndpointClient;
    use crate::infrastructure::storage::create_test_pool;
    use crate::infrastructure::storage::SqliteToolRepository;
    use crate::services::endpoint_pool::EndpointPoolConfig;
    use serde_json::json;

    struct StubEmbeddingProvider;

    #[async_trait::async_trait]
    impl crate::domain::ports::EmbeddingProvider for StubEmbeddingProvider {
        fn name(&self) -> &'static str {
            "stub"
        }
        fn dimension(&self) -> usize {
            4
        }
        async fn embed(&self, text: &str) -> MediatorResult<Vec<f32>> {
            Ok(vec![text.len() as f32; 4])
        }
        async fn embed_batch(
            &self,
            inputs: &[crate::domain::ports::EmbeddingInput],
        ) -> MediatorResult<Vec<crate::domain::ports::EmbeddingOutput>> {
            let mut outputs = Vec::with_capacity(inputs.len());
            for input in inputs {
                outputs.push(crate::domain::ports::EmbeddingOutput {
                    id: input.id.clone(),
                    vector: self.embed(&input.text).await?,
                });
            }
            Ok(outputs)
        }
        fn max_batch_size(&self) -> usize {
            0
        }
    }

    async fn registry() -> (ToolRegistry, Arc<SqliteToolRepository>) {
        let pool = create_test_pool().await.unwrap();
        let repository = Arc::new(SqliteToolRepository::new(pool));
        let embeddings = Arc::new(EmbeddingService::with_defaults(Arc::new(StubEmbeddingProvider)));
        (ToolRegistry::new(repository.clone(), embeddings), repository)
    }

    #[tokio::test]
    async fn refresh_upserts_discovered_tools_and_embeds_them() {
        let (registry, repository) = registry().await;
        let mut pool = EndpointClientPool::new(EndpointPoolConfig::default());
        pool.register(Arc::new(MockEndpointClient::new(
            "files",
            vec![Tool::new("files", "read", "reads a file", json!({}), json!({}))],
        )));

        let report = registry.refresh(&pool).await.unwrap();
        assert_eq!(report.discovered, 1);
        assert_eq!(report.upserted, 1);
        assert_eq!(report.embedded, 1);

        let stored = repository.get(&ToolId::new("files", "read")).await.unwrap();
        assert!(stored.is_some());
        let embedding = repository.get_embedding(&ToolId::new("files", "read")).await.unwrap();
        assert!(embedding.is_some());
    }

    #[tokio::test]
    async fn refresh_skips_re_embedding_when_text_is_unchanged() {
        let (registry, _repository) = registry().await;
        let mut pool = EndpointClientPool::new(EndpointPoolConfig::default());
        pool.register(Arc::new(MockEndpointClient::new(
            "files",
            vec![Tool::new("files", "read", "reads a file", json!({}), json!({}))],
        )));

        let first = registry.refresh(&pool).await.unwrap();
        assert_eq!(first.embedded, 1);
        let second = registry.refresh(&pool).await.unwrap();
        assert_eq!(second.embedded, 0);
    }

    #[tokio::test]
    async fn refresh_deletes_tools_of_servers_no_longer_registered() {
        let (registry, repository) = registry().await;
        let mut pool = EndpointClientPool::new(EndpointPoolConfig::default());
        pool.register(Arc::new(MockEndpointClient::new(
            "files",
            vec![Tool::new("files", "read", "reads a file", json!({}), json!({}))],
        )));
        registry.refresh(&pool).await.unwrap();

        let empty_pool = EndpointClientPool::new(EndpointPoolConfig::default());
        let report = registry.refresh(&empty_pool).await.unwrap();
        assert_eq!(report.removed_servers, 1);

        let stored = repository.list().await.unwrap();
        assert!(stored.is_empty());
    }
}
