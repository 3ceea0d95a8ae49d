//! HTTP [`EndpointClient`] adapter: talks to a tool-providing server over
//! JSON-RPC-ish HTTP (`list_tools` / `invoke`), the endpoint-side analogue
//! of the teacher's `Substrate` adapters talking to LLM backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::domain::errors::{MediatorError, MediatorResult};
use crate::domain::models::Tool;
use crate::domain::ports::EndpointClient;

#[derive(Debug, Clone)]
pub struct HttpEndpointConfig {
    pub server_id: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

pub struct HttpEndpointClient {
    config: HttpEndpointConfig,
    client: Arc<reqwest::Client>,
}

impl HttpEndpointClient {
    #[must_use]
    pub fn new(config: HttpEndpointConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to build endpoint HTTP client");
        Self { config, client: Arc::new(client) }
    }
}

#[derive(Debug, Deserialize)]
struct ListToolsResponse {
    tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Deserialize)]
struct ToolDescriptor {
    name: String,
    description: String,
    #[serde(default)]
    input_schema: Value,
    #[serde(default)]
    output_schema: Value,
}

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    tool: &'a str,
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl EndpointClient for HttpEndpointClient {
    fn server_id(&self) -> &str {
        &self.config.server_id
    }

    async fn list_tools(&self) -> MediatorResult<Vec<Tool>> {
        let url = format!("{}/tools", self.config.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(MediatorError::ToolEndpointUnavailable(format!(
                "{} returned {}",
                self.config.server_id,
                response.status()
            )));
        }

        let parsed: ListToolsResponse =
            response.json().await.map_err(|e| MediatorError::ToolEndpointUnavailable(e.to_string()))?;

        Ok(parsed
            .tools
            .into_iter()
            .map(|t| Tool::new(&self.config.server_id, &t.name, t.description, t.input_schema, t.output_schema))
            .collect())
    }

    async fn invoke(&self, tool_name: &str, arguments: Value) -> MediatorResult<Value> {
        let url = format!("{}/invoke", self.config.base_url);
        let body = InvokeRequest { tool: tool_name, arguments };

        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(MediatorError::ToolInvocationFailed {
                tool_id: format!("{}:{tool_name}", self.config.server_id),
                kind: format!("http {}", response.status()),
            });
        }

        let parsed: InvokeResponse =
            response.json().await.map_err(|e| MediatorError::ToolEndpointUnavailable(e.to_string()))?;

        if let Some(error) = parsed.error {
            return Err(MediatorError::ToolInvocationFailed {
                tool_id: format!("{}:{tool_name}", self.config.server_id),
                kind: error,
            });
        }

        parsed.result.ok_or_else(|| MediatorError::ToolInvocationFailed {
            tool_id: format!("{}:{tool_name}", self.config.server_id),
            kind: "empty response body".to_string(),
        })
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/health", self.config.base_url);
        self.client.get(&url).send().await.is_ok_and(|r| r.status().is_success())
    }
}
