//! Tool and tool-embedding repository ports.

use async_trait::async_trait;

use crate::domain::errors::MediatorResult;
use crate::domain::models::{Tool, ToolEmbedding, ToolId};

#[async_trait]
pub trait ToolRepository: Send + Sync {
    async fn upsert(&self, tool: &Tool) -> MediatorResult<()>;

    async fn get(&self, id: &ToolId) -> MediatorResult<Option<Tool>>;

    async fn list(&self) -> MediatorResult<Vec<Tool>>;

    async fn list_by_server(&self, server_id: &str) -> MediatorResult<Vec<Tool>>;

    /// Removes every tool belonging to a server, used when an endpoint
    /// disappears from the pool.
    async fn delete_by_server(&self, server_id: &str) -> MediatorResult<()>;

    async fn upsert_embedding(&self, embedding: &ToolEmbedding) -> MediatorResult<()>;

    async fn get_embedding(&self, tool_id: &ToolId) -> MediatorResult<Option<ToolEmbedding>>;

    async fn all_embeddings(&self) -> MediatorResult<Vec<ToolEmbedding>>;
}
