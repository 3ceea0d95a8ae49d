//! Sandbox worker RPC bridge frames (`spec.md` §4.5).
//!
//! The bridge is a bidirectional JSON-frame channel between the mediator
//! and a zero-ambient-permission sandbox worker subprocess. The worker
//! only ever sends [`WorkerFrame`]s; the mediator only ever sends
//! [`MediatorFrame`]s — the two enums are kept separate (rather than one
//! tagged union both sides match on) since neither side ever needs to
//! parse a frame it would send itself.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A frame the worker sends to the mediator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerFrame {
    /// The worker asks the mediator to invoke a tool on its behalf.
    Invoke { request_id: Uuid, tool_id: String, arguments: Value },
    /// A tool-call lifecycle event, emitted for observability.
    Trace { phase: TracePhase, tool_id: String, timestamp: chrono::DateTime<chrono::Utc>, digest: String },
    /// Terminal frame; the worker exits after sending this.
    Done { ok: bool, value: Option<Value>, error: Option<String>, logs: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TracePhase {
    ToolStart,
    ToolEnd,
}

/// A frame the mediator sends to the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediatorFrame {
    /// The first frame on the bridge: the code to run, its arguments, and
    /// the stub tool ids the worker may call through `invoke` — everything
    /// else is unreachable from inside the sandbox (`spec.md` §4.5,
    /// "injects a stub object exposing only the tools selected by hybrid
    /// search").
    Setup { capability_code_base64: String, arguments: Value, available_tools: Vec<String>, limits: SandboxLimits },
    /// Reply to a worker [`WorkerFrame::Invoke`].
    Result { request_id: Uuid, ok: bool, value: Option<Value>, error: Option<String> },
}

/// Per-invocation resource limits enforced by the mediator over a sandbox
/// run (`spec.md` §4.5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SandboxLimits {
    pub max_wall_time_ms: u64,
    pub max_rpc_fan_in: u32,
    pub max_output_bytes: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self { max_wall_time_ms: 30_000, max_rpc_fan_in: 32, max_output_bytes: 512 * 1024 }
    }
}
