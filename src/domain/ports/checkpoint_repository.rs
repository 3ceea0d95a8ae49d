//! Checkpoint repository port, used to resume an interrupted DAG run.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::MediatorResult;
use crate::domain::models::Checkpoint;

#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> MediatorResult<()>;

    /// Returns the most recently saved checkpoint for a run, if any.
    async fn latest(&self, dag_run_id: Uuid) -> MediatorResult<Option<Checkpoint>>;
}
