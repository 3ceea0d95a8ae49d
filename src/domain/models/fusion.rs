//! Wire format for a fused task chain (`spec.md` §4.3 "Task Fusion").
//!
//! A fused chain is not compiled to a WebAssembly component like a
//! crystallized [`super::capability::Capability`] — there is no source
//! code to analyze, just an ordered run of already-planned tool calls
//! against the same endpoint. Instead of inventing a second sandbox
//! transport for it, [`FusionProgram`] reuses the existing
//! `capability_code_base64` slot on [`super::rpc::MediatorFrame::Setup`]
//! with a reserved magic prefix the worker recognizes before it ever
//! tries to treat the payload as a WASM component module — the same
//! kind of tagged-payload trick the teacher's `WorkerFrame`/`MediatorFrame`
//! split uses to let either side skip parsing a frame shape it can't
//! produce itself.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Distinguishes a fusion program from a real compiled WASM component:
/// component binaries begin with the 4-byte `\0asm` magic, which can
/// never collide with this ASCII prefix.
pub const FUSION_MAGIC_PREFIX: &str = "CASYS-FUSION-V1:";

/// One call in a fused chain. `arguments` may reference the immediately
/// preceding step's output via `$OUTPUT[task_id]...` exactly like any
/// other task argument template — fusion never rewrites references, it
/// only guarantees (by construction, see
/// [`crate::services::fusion::find_fusable_groups`]) that every
/// non-first step's only reference is to its immediate predecessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionStep {
    pub task_id: Uuid,
    pub tool_id: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionProgram {
    pub steps: Vec<FusionStep>,
}

impl FusionProgram {
    #[must_use]
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("FusionProgram always serializes");
        format!("{FUSION_MAGIC_PREFIX}{}", BASE64.encode(json))
    }

    /// Returns `Some` if `code` is a fusion program, `None` if it looks
    /// like an ordinary capability (WASM component) payload instead.
    #[must_use]
    pub fn decode(code: &str) -> Option<Self> {
        let payload = code.strip_prefix(FUSION_MAGIC_PREFIX)?;
        let bytes = BASE64.decode(payload).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}
