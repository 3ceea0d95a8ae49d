//! Endpoint client port: the abstraction over a tool-providing server
//! (`spec.md` §3 "Endpoint Client Pool"), generalized from the teacher's
//! `Substrate` trait — the same shape of "discover, invoke, check
//! liveness" applied to tool endpoints instead of LLM backends.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::MediatorResult;
use crate::domain::models::Tool;

#[async_trait]
pub trait EndpointClient: Send + Sync {
    /// Stable identifier of the endpoint this client talks to.
    fn server_id(&self) -> &str;

    /// Lists every tool the endpoint currently exposes.
    async fn list_tools(&self) -> MediatorResult<Vec<Tool>>;

    /// Invokes a named tool with the given (already-resolved) arguments.
    async fn invoke(&self, tool_name: &str, arguments: Value) -> MediatorResult<Value>;

    /// Whether the endpoint currently responds to liveness checks.
    async fn is_available(&self) -> bool;
}
