//! Checkpoint snapshot model (`spec.md` §4.3, §6).
//!
//! A [`Checkpoint`] captures enough state to resume a paused or
//! interrupted DAG run: the control state, the remaining task graph, and
//! every output produced so far. Persisted after every completed wave.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use super::control_state::ControlState;
use super::dag::Task;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub dag_run_id: Uuid,
    pub control_state: ControlState,
    pub remaining_tasks: Vec<Task>,
    pub completed_outputs: HashMap<Uuid, Value>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    #[must_use]
    pub fn new(
        dag_run_id: Uuid,
        control_state: ControlState,
        remaining_tasks: Vec<Task>,
        completed_outputs: HashMap<Uuid, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            dag_run_id,
            control_state,
            remaining_tasks,
            completed_outputs,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_checkpoint_stamps_a_fresh_id_and_timestamp() {
        let dag_run_id = Uuid::new_v4();
        let checkpoint = Checkpoint::new(dag_run_id, ControlState::Paused, vec![], HashMap::new());
        assert_eq!(checkpoint.dag_run_id, dag_run_id);
        assert_eq!(checkpoint.control_state, ControlState::Paused);
        assert!(checkpoint.remaining_tasks.is_empty());
    }
}
