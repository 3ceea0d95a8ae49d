//! SQLite-backed [`TraceRepository`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::{MediatorError, MediatorResult};
use crate::domain::models::{ExecutionTrace, TaskOutcome, TaskTraceEntry};
use crate::domain::ports::TraceRepository;

pub struct SqliteTraceRepository {
    pool: SqlitePool,
}

impl SqliteTraceRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn outcome_str(outcome: TaskOutcome) -> &'static str {
    match outcome {
        TaskOutcome::Success => "success",
        TaskOutcome::Failure => "failure",
        TaskOutcome::Skipped => "skipped",
    }
}

fn parse_outcome(s: &str) -> MediatorResult<TaskOutcome> {
    match s {
        "success" => Ok(TaskOutcome::Success),
        "failure" => Ok(TaskOutcome::Failure),
        "skipped" => Ok(TaskOutcome::Skipped),
        other => Err(MediatorError::Storage(format!("unknown task outcome: {other}"))),
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> MediatorResult<TaskTraceEntry> {
    let task_id: String = row.try_get("task_id")?;
    let outcome: String = row.try_get("outcome")?;
    let output: Option<String> = row.try_get("output")?;
    let error: Option<String> = row.try_get("error")?;
    let latency_ms: i64 = row.try_get("latency_ms")?;
    let started_at: String = row.try_get("started_at")?;
    let completed_at: String = row.try_get("completed_at")?;
    let fused: i64 = row.try_get("fused")?;

    Ok(TaskTraceEntry {
        task_id: task_id.parse().map_err(|e: uuid::Error| MediatorError::Storage(e.to_string()))?,
        outcome: parse_outcome(&outcome)?,
        output: output.map(|s| serde_json::from_str(&s)).transpose()?,
        error,
        latency_ms: latency_ms as u64,
        started_at: started_at.parse::<DateTime<Utc>>().map_err(|e| MediatorError::Storage(e.to_string()))?,
        completed_at: completed_at.parse::<DateTime<Utc>>().map_err(|e| MediatorError::Storage(e.to_string()))?,
        fused: fused != 0,
    })
}

#[async_trait]
impl TraceRepository for SqliteTraceRepository {
    async fn create(&self, trace: &ExecutionTrace) -> MediatorResult<()> {
        sqlx::query("INSERT INTO execution_traces (dag_run_id, intent, started_at, completed_at) VALUES (?, ?, ?, ?)")
            .bind(trace.dag_run_id.to_string())
            .bind(&trace.intent)
            .bind(trace.started_at.to_rfc3339())
            .bind(trace.completed_at.map(|t| t.to_rfc3339()))
            .execute(&self.pool)
            .await?;

        for entry in &trace.entries {
            self.append_entry(trace.dag_run_id, entry).await?;
        }

        Ok(())
    }

    async fn append_entry(&self, dag_run_id: Uuid, entry: &TaskTraceEntry) -> MediatorResult<()> {
        sqlx::query(
            "INSERT INTO task_trace_entries (dag_run_id, task_id, outcome, output, error, latency_ms, started_at, completed_at, fused)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (dag_run_id, task_id) DO UPDATE SET
                outcome = excluded.outcome,
                output = excluded.output,
                error = excluded.error,
                latency_ms = excluded.latency_ms,
                completed_at = excluded.completed_at,
                fused = excluded.fused",
        )
        .bind(dag_run_id.to_string())
        .bind(entry.task_id.to_string())
        .bind(outcome_str(entry.outcome))
        .bind(entry.output.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&entry.error)
        .bind(entry.latency_ms as i64)
        .bind(entry.started_at.to_rfc3339())
        .bind(entry.completed_at.to_rfc3339())
        .bind(i64::from(entry.fused))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, dag_run_id: Uuid) -> MediatorResult<Option<ExecutionTrace>> {
        let header = sqlx::query("SELECT intent, started_at, completed_at FROM execution_traces WHERE dag_run_id = ?")
            .bind(dag_run_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(header) = header else { return Ok(None) };

        let intent: Option<String> = header.try_get("intent")?;
        let started_at: String = header.try_get("started_at")?;
        let completed_at: Option<String> = header.try_get("completed_at")?;

        let rows = sqlx::query("SELECT * FROM task_trace_entries WHERE dag_run_id = ? ORDER BY started_at")
            .bind(dag_run_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        let entries = rows.iter().map(row_to_entry).collect::<MediatorResult<Vec<_>>>()?;

        Ok(Some(ExecutionTrace {
            dag_run_id,
            intent,
            entries,
            started_at: started_at.parse::<DateTime<Utc>>().map_err(|e| MediatorError::Storage(e.to_string()))?,
            completed_at: completed_at
                .map(|s| s.parse::<DateTime<Utc>>())
                .transpose()
                .map_err(|e: chrono::ParseError| MediatorError::Storage(e.to_string()))?,
        }))
    }

    async fn mark_completed(&self, dag_run_id: Uuid) -> MediatorResult<()> {
        sqlx::query("UPDATE execution_traces SET completed_at = ? WHERE dag_run_id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(dag_run_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::connection::create_test_pool;
    use serde_json::json;

    #[tokio::test]
    async fn create_then_append_then_get_round_trips() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteTraceRepository::new(pool);

        let run_id = Uuid::new_v4();
        let trace = ExecutionTrace::new(run_id, Some("summarize repo".to_string()));
        repo.create(&trace).await.unwrap();

        let entry = TaskTraceEntry {
            task_id: Uuid::new_v4(),
            outcome: TaskOutcome::Success,
            output: Some(json!({"ok": true})),
            error: None,
            latency_ms: 42,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            fused: false,
        };
        repo.append_entry(run_id, &entry).await.unwrap();
        repo.mark_completed(run_id).await.unwrap();

        let fetched = repo.get(run_id).await.unwrap().expect("trace present");
        assert_eq!(fetched.entries.len(), 1);
        assert!(fetched.completed_at.is_some());
        assert_eq!(fetched.success_count(), 1);
    }
}
