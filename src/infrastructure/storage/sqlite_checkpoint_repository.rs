//! SQLite-backed [`CheckpointRepository`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::{MediatorError, MediatorResult};
use crate::domain::models::Checkpoint;
use crate::domain::ports::CheckpointRepository;

pub struct SqliteCheckpointRepository {
    pool: SqlitePool,
}

impl SqliteCheckpointRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointRepository for SqliteCheckpointRepository {
    async fn save(&self, checkpoint: &Checkpoint) -> MediatorResult<()> {
        sqlx::query(
            "INSERT INTO checkpoints (id, dag_run_id, control_state, remaining_tasks, completed_outputs, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(checkpoint.id.to_string())
        .bind(checkpoint.dag_run_id.to_string())
        .bind(serde_json::to_string(&checkpoint.control_state)?)
        .bind(serde_json::to_string(&checkpoint.remaining_tasks)?)
        .bind(serde_json::to_string(&checkpoint.completed_outputs)?)
        .bind(checkpoint.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest(&self, dag_run_id: Uuid) -> MediatorResult<Option<Checkpoint>> {
        let row = sqlx::query(
            "SELECT * FROM checkpoints WHERE dag_run_id = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(dag_run_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let id: String = row.try_get("id")?;
        let control_state: String = row.try_get("control_state")?;
        let remaining_tasks: String = row.try_get("remaining_tasks")?;
        let completed_outputs: String = row.try_get("completed_outputs")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(Some(Checkpoint {
            id: id.parse().map_err(|e: uuid::Error| MediatorError::Storage(e.to_string()))?,
            dag_run_id,
            control_state: serde_json::from_str(&control_state)?,
            remaining_tasks: serde_json::from_str(&remaining_tasks)?,
            completed_outputs: serde_json::from_str(&completed_outputs)?,
            created_at: created_at.parse::<DateTime<Utc>>().map_err(|e| MediatorError::Storage(e.to_string()))?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ControlState;
    use crate::infrastructure::storage::connection::create_test_pool;
    use std::collections::HashMap;

    #[tokio::test]
    async fn latest_returns_the_most_recently_saved_checkpoint() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteCheckpointRepository::new(pool);
        let run_id = Uuid::new_v4();

        let first = Checkpoint::new(run_id, ControlState::Running, vec![], HashMap::new());
        repo.save(&first).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let second = Checkpoint::new(run_id, ControlState::Paused, vec![], HashMap::new());
        repo.save(&second).await.unwrap();

        let latest = repo.latest(run_id).await.unwrap().expect("checkpoint present");
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.control_state, ControlState::Paused);
    }

    #[tokio::test]
    async fn latest_is_none_for_unknown_run() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteCheckpointRepository::new(pool);
        assert!(repo.latest(Uuid::new_v4()).await.unwrap().is_none());
    }
}
