//! Tool domain model.
//!
//! A [`Tool`] is an atomic capability exposed by an external endpoint
//! (`spec.md` §3). Tools are discovered when the Endpoint Client Pool lists
//! a server, refreshed on schema change, and removed when the server goes
//! away.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Globally unique tool identifier, `server:name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ToolId(pub String);

impl ToolId {
    #[must_use]
    pub fn new(server: &str, name: &str) -> Self {
        Self(format!("{server}:{name}"))
    }

    #[must_use]
    pub fn server(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(s, _)| s)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.0.split_once(':').map_or("", |(_, n)| n)
    }
}

impl std::fmt::Display for ToolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An atomic tool exposed by an originating endpoint server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub id: ToolId,
    pub input_schema: Value,
    pub output_schema: Value,
    pub description: String,
    pub server_id: String,
    pub refreshed_at: DateTime<Utc>,
    /// Whether re-invoking this tool with the same arguments after a
    /// failed attempt is safe. Only idempotent tools are retried by the
    /// executor (`spec.md` §4.3, §7).
    pub idempotent: bool,
}

impl Tool {
    #[must_use]
    pub fn new(server_id: &str, name: &str, description: impl Into<String>, input_schema: Value, output_schema: Value) -> Self {
        Self {
            id: ToolId::new(server_id, name),
            input_schema,
            output_schema,
            description: description.into(),
            server_id: server_id.to_string(),
            refreshed_at: Utc::now(),
            idempotent: false,
        }
    }

    #[must_use]
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    /// Text used to derive the tool's embedding: name + description + a
    /// flattened parameter summary (`spec.md` §3).
    #[must_use]
    pub fn embedding_text(&self) -> String {
        let params = summarize_schema(&self.input_schema);
        format!("{} — {} — params: {}", self.id.name(), self.description, params)
    }
}

/// Flattens a JSON schema's top-level property names into a short summary
/// string, good enough to seed an embedding without a full schema walker.
fn summarize_schema(schema: &Value) -> String {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.keys().cloned().collect::<Vec<_>>().join(", "))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_id_splits_server_and_name() {
        let id = ToolId::new("files", "read_file");
        assert_eq!(id.server(), "files");
        assert_eq!(id.name(), "read_file");
        assert_eq!(id.to_string(), "files:read_file");
    }

    #[test]
    fn embedding_text_includes_param_names() {
        let tool = Tool::new(
            "files",
            "read_file",
            "Reads a file from disk",
            json!({"properties": {"path": {"type": "string"}}}),
            json!({"type": "string"}),
        );
        let text = tool.embedding_text();
        assert!(text.contains("read_file"));
        assert!(text.contains("path"));
    }
}
