//! Execution trace repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::MediatorResult;
use crate::domain::models::{ExecutionTrace, TaskTraceEntry};

#[async_trait]
pub trait TraceRepository: Send + Sync {
    async fn create(&self, trace: &ExecutionTrace) -> MediatorResult<()>;

    async fn append_entry(&self, dag_run_id: Uuid, entry: &TaskTraceEntry) -> MediatorResult<()>;

    async fn get(&self, dag_run_id: Uuid) -> MediatorResult<Option<ExecutionTrace>>;

    async fn mark_completed(&self, dag_run_id: Uuid) -> MediatorResult<()>;
}
