//! Unified mediator error taxonomy.
//!
//! `spec.md` §7 names one flat taxonomy of error kinds surfaced to callers
//! of the Gateway Facade. Subsystems still raise their own narrower errors
//! internally (see `domain::ports` and `adapters::sqlite`), but everything
//! that crosses the gateway boundary converges on [`MediatorError`],
//! mirroring how the teacher repo's fine-grained `domain::error` enums
//! converge into `domain::errors::DomainError` at the service boundary.

use thiserror::Error;
use uuid::Uuid;

/// The full error taxonomy a Gateway Facade call can surface.
#[derive(Debug, Error)]
pub enum MediatorError {
    /// Intent text was empty or exceeded the configured length limit.
    #[error("invalid intent: {0}")]
    InvalidIntent(String),

    /// An explicit DAG spec failed schema validation.
    #[error("invalid DAG spec: {0}")]
    InvalidDagSpec(String),

    /// An explicit or planned DAG contains a cycle.
    #[error("cyclic DAG: {0}")]
    CyclicDag(String),

    /// A replan amendment tried to redefine an already-completed task.
    #[error("replan conflict: task {0} is already completed")]
    ReplanConflict(Uuid),

    /// The embedding service could not be reached or errored.
    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// A tool endpoint could not be reached.
    #[error("tool endpoint unavailable: {0}")]
    ToolEndpointUnavailable(String),

    /// A per-endpoint or pool queue was full.
    #[error("backpressure: {0}")]
    BackpressureBusy(String),

    /// An endpoint returned an application-level error for a tool call.
    #[error("tool invocation failed for {tool_id}: {kind}")]
    ToolInvocationFailed { tool_id: String, kind: String },

    /// The sandbox worker exceeded a configured resource limit.
    #[error("sandbox limit exceeded: {which}")]
    SandboxLimitExceeded { which: String },

    /// The sandbox worker process crashed or exited abnormally.
    #[error("sandbox worker crashed: {0}")]
    SandboxCrashed(String),

    /// A checkpoint could not be deserialized or applied cleanly.
    #[error("checkpoint corrupted for dag {0}")]
    CheckpointCorrupted(Uuid),

    /// A task referenced a dependency output that is missing (non-required
    /// upstream task failed or was skipped).
    #[error("missing dependency: task {task_id} needs output of {dep_id}")]
    MissingDependency { task_id: Uuid, dep_id: Uuid },

    /// Argument-template resolution failed (e.g. mixed-type path access).
    #[error("argument resolution error: {0}")]
    ResolutionError(String),

    /// Requested entity was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A bug: an invariant the mediator relies on was violated.
    #[error("internal invariant violation: {0}")]
    InternalInvariantViolation(String),

    /// Generic storage failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl MediatorError {
    /// Whether the client should retry the same request.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingUnavailable(_)
                | Self::ToolEndpointUnavailable(_)
                | Self::BackpressureBusy(_)
        )
    }

    /// Stable machine-readable kind name, matching `spec.md` §7's taxonomy.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidIntent(_) => "InvalidIntent",
            Self::InvalidDagSpec(_) => "InvalidDagSpec",
            Self::CyclicDag(_) => "CyclicDag",
            Self::ReplanConflict(_) => "ReplanConflict",
            Self::EmbeddingUnavailable(_) => "EmbeddingUnavailable",
            Self::ToolEndpointUnavailable(_) => "ToolEndpointUnavailable",
            Self::BackpressureBusy(_) => "BackpressureBusy",
            Self::ToolInvocationFailed { .. } => "ToolInvocationFailed",
            Self::SandboxLimitExceeded { .. } => "SandboxLimitExceeded",
            Self::SandboxCrashed(_) => "SandboxCrashed",
            Self::CheckpointCorrupted(_) => "CheckpointCorrupted",
            Self::MissingDependency { .. } => "MissingDependency",
            Self::ResolutionError(_) => "ResolutionError",
            Self::NotFound(_) => "NotFound",
            Self::InternalInvariantViolation(_) => "InternalInvariantViolation",
            Self::Storage(_) => "Storage",
        }
    }
}

pub type MediatorResult<T> = Result<T, MediatorError>;

impl From<sqlx::Error> for MediatorError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for MediatorError {
    fn from(err: serde_json::Error) -> Self {
        Self::ResolutionError(err.to_string())
    }
}

impl From<reqwest::Error> for MediatorError {
    fn from(err: reqwest::Error) -> Self {
        Self::ToolEndpointUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(MediatorError::EmbeddingUnavailable("x".into()).retryable());
        assert!(MediatorError::BackpressureBusy("x".into()).retryable());
        assert!(!MediatorError::InvalidIntent("x".into()).retryable());
    }

    #[test]
    fn kind_names_match_taxonomy() {
        assert_eq!(MediatorError::CyclicDag("x".into()).kind(), "CyclicDag");
        assert_eq!(
            MediatorError::ReplanConflict(Uuid::nil()).kind(),
            "ReplanConflict"
        );
    }
}
