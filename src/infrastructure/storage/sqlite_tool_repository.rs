//! SQLite-backed [`ToolRepository`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::errors::{MediatorError, MediatorResult};
use crate::domain::models::{Embedding, Tool, ToolEmbedding, ToolId};
use crate::domain::ports::ToolRepository;

pub struct SqliteToolRepository {
    pool: SqlitePool,
}

impl SqliteToolRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_tool(row: &sqlx::sqlite::SqliteRow) -> MediatorResult<Tool> {
    let id: String = row.try_get("id")?;
    let server_id: String = row.try_get("server_id")?;
    let description: String = row.try_get("description")?;
    let input_schema: String = row.try_get("input_schema")?;
    let output_schema: String = row.try_get("output_schema")?;
    let refreshed_at: String = row.try_get("refreshed_at")?;
    let idempotent: i64 = row.try_get("idempotent")?;

    Ok(Tool {
        id: ToolId(id),
        server_id,
        description,
        input_schema: serde_json::from_str(&input_schema)?,
        output_schema: serde_json::from_str(&output_schema)?,
        refreshed_at: refreshed_at.parse::<DateTime<Utc>>().map_err(|e| MediatorError::Storage(e.to_string()))?,
        idempotent: idempotent != 0,
    })
}

#[async_trait]
impl ToolRepository for SqliteToolRepository {
    async fn upsert(&self, tool: &Tool) -> MediatorResult<()> {
        sqlx::query(
            "INSERT INTO tools (id, server_id, description, input_schema, output_schema, refreshed_at, idempotent)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                server_id = excluded.server_id,
                description = excluded.description,
                input_schema = excluded.input_schema,
                output_schema = excluded.output_schema,
                refreshed_at = excluded.refreshed_at,
                idempotent = excluded.idempotent",
        )
        .bind(tool.id.0.as_str())
        .bind(&tool.server_id)
        .bind(&tool.description)
        .bind(serde_json::to_string(&tool.input_schema)?)
        .bind(serde_json::to_string(&tool.output_schema)?)
        .bind(tool.refreshed_at.to_rfc3339())
        .bind(i64::from(tool.idempotent))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &ToolId) -> MediatorResult<Option<Tool>> {
        let row = sqlx::query("SELECT * FROM tools WHERE id = ?")
            .bind(id.0.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_tool).transpose()
    }

    async fn list(&self) -> MediatorResult<Vec<Tool>> {
        let rows = sqlx::query("SELECT * FROM tools ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_tool).collect()
    }

    async fn list_by_server(&self, server_id: &str) -> MediatorResult<Vec<Tool>> {
        let rows = sqlx::query("SELECT * FROM tools WHERE server_id = ? ORDER BY id")
            .bind(server_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_tool).collect()
    }

    async fn delete_by_server(&self, server_id: &str) -> MediatorResult<()> {
        sqlx::query("DELETE FROM tools WHERE server_id = ?")
            .bind(server_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn upsert_embedding(&self, embedding: &ToolEmbedding) -> MediatorResult<()> {
        sqlx::query(
            "INSERT INTO tool_embeddings (tool_id, vector, source_text_hash) VALUES (?, ?, ?)
             ON CONFLICT (tool_id) DO UPDATE SET
                vector = excluded.vector,
                source_text_hash = excluded.source_text_hash",
        )
        .bind(&embedding.tool_id)
        .bind(serde_json::to_string(&embedding.vector.0)?)
        .bind(embedding.source_text_hash as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_embedding(&self, tool_id: &ToolId) -> MediatorResult<Option<ToolEmbedding>> {
        let row = sqlx::query("SELECT tool_id, vector, source_text_hash FROM tool_embeddings WHERE tool_id = ?")
            .bind(tool_id.0.as_str())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(row_to_embedding(&row)?))
    }

    async fn all_embeddings(&self) -> MediatorResult<Vec<ToolEmbedding>> {
        let rows = sqlx::query("SELECT tool_id, vector, source_text_hash FROM tool_embeddings")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_embedding).collect()
    }
}

fn row_to_embedding(row: &sqlx::sqlite::SqliteRow) -> MediatorResult<ToolEmbedding> {
    let tool_id: String = row.try_get("tool_id")?;
    let vector: String = row.try_get("vector")?;
    let source_text_hash: i64 = row.try_get("source_text_hash")?;

    Ok(ToolEmbedding {
        tool_id,
        vector: Embedding::new(serde_json::from_str(&vector)?),
        source_text_hash: source_text_hash as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::connection::create_test_pool;
    use serde_json::json;

    async fn repo() -> SqliteToolRepository {
        let pool = create_test_pool().await.expect("pool");
        SqliteToolRepository::new(pool)
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let repo = repo().await;
        let tool = Tool::new("files", "read_file", "reads a file", json!({}), json!({}));
        repo.upsert(&tool).await.unwrap();

        let fetched = repo.get(&tool.id).await.unwrap().expect("tool present");
        assert_eq!(fetched.id, tool.id);
        assert_eq!(fetched.description, "reads a file");
    }

    #[tokio::test]
    async fn delete_by_server_removes_only_that_servers_tools() {
        let repo = repo().await;
        repo.upsert(&Tool::new("files", "read_file", "d", json!({}), json!({}))).await.unwrap();
        repo.upsert(&Tool::new("github", "open_issue", "d", json!({}), json!({}))).await.unwrap();

        repo.delete_by_server("files").await.unwrap();

        let remaining = repo.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].server_id, "github");
    }

    #[tokio::test]
    async fn embedding_round_trips() {
        let repo = repo().await;
        let embedding = ToolEmbedding {
            tool_id: "files:read_file".to_string(),
            vector: Embedding::new(vec![0.1, 0.2, 0.3]),
            source_text_hash: 42,
        };
        repo.upsert_embedding(&embedding).await.unwrap();

        let fetched = repo.get_embedding(&ToolId("files:read_file".to_string())).await.unwrap().expect("present");
        assert_eq!(fetched.source_text_hash, 42);
        assert_eq!(fetched.vector.dimension(), 3);
    }
}
