//! Mock [`EndpointClient`], grounded on the teacher's `MockSubstrate`:
//! a programmable stand-in used in tests and local development instead
//! of a live tool server.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::errors::{MediatorError, MediatorResult};
use crate::domain::models::Tool;
use crate::domain::ports::EndpointClient;

#[derive(Debug, Clone)]
pub struct MockInvocationResult {
    pub output: Value,
    pub fail: bool,
    pub error_message: Option<String>,
}

impl MockInvocationResult {
    #[must_use]
    pub fn success(output: Value) -> Self {
        Self { output, fail: false, error_message: None }
    }

    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self { output: Value::Null, fail: true, error_message: Some(error.into()) }
    }
}

pub struct MockEndpointClient {
    server_id: String,
    tools: Vec<Tool>,
    responses: Arc<RwLock<HashMap<String, MockInvocationResult>>>,
    default_response: MockInvocationResult,
    available: Arc<RwLock<bool>>,
}

impl MockEndpointClient {
    #[must_use]
    pub fn new(server_id: impl Into<String>, tools: Vec<Tool>) -> Self {
        Self {
            server_id: server_id.into(),
            tools,
            responses: Arc::new(RwLock::new(HashMap::new())),
            default_response: MockInvocationResult::success(Value::Null),
            available: Arc::new(RwLock::new(true)),
        }
    }

    pub async fn set_response(&self, tool_name: impl Into<String>, response: MockInvocationResult) {
        self.responses.write().await.insert(tool_name.into(), response);
    }

    pub async fn set_available(&self, available: bool) {
        *self.available.write().await = available;
    }
}

#[async_trait]
impl EndpointClient for MockEndpointClient {
    fn server_id(&self) -> &str {
        &self.server_id
    }

    async fn list_tools(&self) -> MediatorResult<Vec<Tool>> {
        Ok(self.tools.clone())
    }

    async fn invoke(&self, tool_name: &str, _arguments: Value) -> MediatorResult<Value> {
        let responses = self.responses.read().await;
        let response = responses.get(tool_name).cloned().unwrap_or_else(|| self.default_response.clone());

        if response.fail {
            return Err(MediatorError::ToolInvocationFailed {
                tool_id: format!("{}:{tool_name}", self.server_id),
                kind: response.error_message.unwrap_or_else(|| "mock failure".to_string()),
            });
        }

        Ok(response.output)
    }

    async fn is_available(&self) -> bool {
        *self.available.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn default_response_is_a_successful_null() {
        let client = MockEndpointClient::new("files", vec![]);
        let result = client.invoke("read_file", json!({})).await.unwrap();
        assert_eq!(result, Value::Null);
    }

    #[tokio::test]
    async fn overridden_response_is_used() {
        let client = MockEndpointClient::new("files", vec![]);
        client.set_response("read_file", MockInvocationResult::success(json!({"content": "hi"}))).await;

        let result = client.invoke("read_file", json!({})).await.unwrap();
        assert_eq!(result, json!({"content": "hi"}));
    }

    #[tokio::test]
    async fn failure_response_surfaces_as_tool_invocation_failed() {
        let client = MockEndpointClient::new("files", vec![]);
        client.set_response("read_file", MockInvocationResult::failure("disk full")).await;

        let err = client.invoke("read_file", json!({})).await.unwrap_err();
        assert!(matches!(err, MediatorError::ToolInvocationFailed { .. }));
    }

    #[tokio::test]
    async fn availability_can_be_toggled() {
        let client = MockEndpointClient::new("files", vec![]);
        assert!(client.is_available().await);
        client.set_available(false).await;
        assert!(!client.is_available().await);
    }
}
