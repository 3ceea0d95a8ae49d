//! Execution trace models (`spec.md` §3, §6).
//!
//! One [`ExecutionTrace`] per DAG run, accumulating a [`TaskTraceEntry`]
//! per task as it completes, persisted so `continue`/`replan` can resume
//! a run across process restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Success,
    Failure,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTraceEntry {
    pub task_id: Uuid,
    pub outcome: TaskOutcome,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub latency_ms: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// True if this entry's output was produced by task fusion (`spec.md`
    /// §4.2) rather than an individual invocation.
    pub fused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub dag_run_id: Uuid,
    pub intent: Option<String>,
    pub entries: Vec<TaskTraceEntry>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionTrace {
    #[must_use]
    pub fn new(dag_run_id: Uuid, intent: Option<String>) -> Self {
        Self { dag_run_id, intent, entries: Vec::new(), started_at: Utc::now(), completed_at: None }
    }

    pub fn record(&mut self, entry: TaskTraceEntry) {
        self.entries.push(entry);
    }

    #[must_use]
    pub fn outputs(&self) -> std::collections::HashMap<Uuid, Value> {
        self.entries
            .iter()
            .filter_map(|e| e.output.clone().map(|o| (e.task_id, o)))
            .collect()
    }

    #[must_use]
    pub fn success_count(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome == TaskOutcome::Success).count()
    }

    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome == TaskOutcome::Failure).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outputs_map_collects_only_successful_entries_with_output() {
        let mut trace = ExecutionTrace::new(Uuid::new_v4(), Some("summarize repo".to_string()));
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        trace.record(TaskTraceEntry {
            task_id: t1,
            outcome: TaskOutcome::Success,
            output: Some(json!({"ok": true})),
            error: None,
            latency_ms: 10,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            fused: false,
        });
        trace.record(TaskTraceEntry {
            task_id: t2,
            outcome: TaskOutcome::Failure,
            output: None,
            error: Some("timed out".to_string()),
            latency_ms: 5,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            fused: false,
        });

        let outputs = trace.outputs();
        assert_eq!(outputs.len(), 1);
        assert!(outputs.contains_key(&t1));
        assert_eq!(trace.success_count(), 1);
        assert_eq!(trace.failure_count(), 1);
    }
}
