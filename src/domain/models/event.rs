//! Event frames streamed to the caller during DAG execution (`spec.md`
//! §6). One frame is emitted per occurrence; the gateway's stdio
//! transport writes each as one newline-delimited JSON object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    DagStart { dag_run_id: Uuid, task_count: usize },
    TaskStart { dag_run_id: Uuid, task_id: Uuid },
    TaskEnd {
        dag_run_id: Uuid,
        task_id: Uuid,
        success: bool,
        latency_ms: u64,
        /// Set when the outcome came from somewhere other than a live
        /// invocation, e.g. `"speculation_hit"` (`spec.md` §8 scenario 5).
        /// Omitted from the wire frame on the common live-invocation path.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
    LayerComplete { dag_run_id: Uuid, layer_index: usize, task_ids: Vec<Uuid> },
    HilRequest { dag_run_id: Uuid, task_id: Uuid, prompt: String },
    AilGate { dag_run_id: Uuid, task_id: Uuid, rationale: String },
    CheckpointSaved { dag_run_id: Uuid, checkpoint_id: Uuid },
    DagEnd { dag_run_id: Uuid, success: bool },
    Error { dag_run_id: Uuid, task_id: Option<Uuid>, message: String, retryable: bool },
}

/// A timestamped, serializable wrapper, the unit actually written to the
/// event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventFrame {
    #[must_use]
    pub fn new(event: Event) -> Self {
        Self { emitted_at: Utc::now(), event }
    }
}

/// Redacts any PII-bearing free-text fields in an event before it leaves
/// the process, per `spec.md` §7's redaction requirement on HIL prompts.
#[must_use]
pub fn redact_event(event: Event, redact: impl Fn(&str) -> String) -> Event {
    match event {
        Event::HilRequest { dag_run_id, task_id, prompt } => {
            Event::HilRequest { dag_run_id, task_id, prompt: redact(&prompt) }
        }
        other => other,
    }
}

/// A free-form status payload a gateway operation may return alongside
/// its terminal frame (`spec.md` §6's "success or error payload").
pub type OperationPayload = Value;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_event_only_touches_hil_prompts() {
        let dag_run_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        let event = Event::HilRequest { dag_run_id, task_id, prompt: "call me at 555-1234".to_string() };
        let redacted = redact_event(event, |s| s.replace("555-1234", "[PHONE_1]"));
        match redacted {
            Event::HilRequest { prompt, .. } => assert_eq!(prompt, "call me at [PHONE_1]"),
            _ => panic!("expected HilRequest"),
        }
    }

    #[test]
    fn redact_event_passes_through_other_variants() {
        let dag_run_id = Uuid::new_v4();
        let event = Event::DagStart { dag_run_id, task_count: 3 };
        let passed = redact_event(event, |s| s.to_string());
        assert!(matches!(passed, Event::DagStart { task_count: 3, .. }));
    }
}
