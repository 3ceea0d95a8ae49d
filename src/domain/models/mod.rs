//! Domain models.
//!
//! Pure domain entities with business logic and validation rules. These
//! models are framework-agnostic and contain no infrastructure concerns.

pub mod argument_template;
pub mod capability;
pub mod checkpoint;
pub mod config;
pub mod control_state;
pub mod dag;
pub mod dependency_edge;
pub mod embedding;
pub mod event;
pub mod fusion;
pub mod rpc;
pub mod tool;
pub mod trace;
pub mod user;

pub use argument_template::{find_refs, parse_ref, resolve, OutputRef, PathSegment};
pub use capability::{Capability, CapabilityStats, Fqdn};
pub use checkpoint::Checkpoint;
pub use config::{
    Config, EmbeddingConfig, EndpointConfig, ExecutionConfig, LoggingConfig, RedactionConfig, SandboxConfig,
    SearchConfig, SpeculationConfig,
};
pub use control_state::{ControlCommand, ControlState};
pub use dag::{DagError, DagNode, DagStats, Invocation, StaticDag, StaticTaskNode, Task, TaskDag};
pub use dependency_edge::{DependencyEdge, DependencyGraph, SearchTarget};
pub use embedding::{cosine_similarity, Embedding, ToolEmbedding};
pub use event::{redact_event, Event, EventFrame, OperationPayload};
pub use fusion::{FusionProgram, FusionStep, FUSION_MAGIC_PREFIX};
pub use rpc::{MediatorFrame, SandboxLimits, TracePhase, WorkerFrame};
pub use tool::{Tool, ToolId};
pub use trace::{ExecutionTrace, TaskOutcome, TaskTraceEntry};
pub use user::User;
