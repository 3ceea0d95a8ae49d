//! MCP stdio server implementing JSON-RPC 2.0 over stdin/stdout.
//!
//! Exposes the Gateway Facade's eight meta-operations (`spec.md` §6) as
//! native Claude Code tools via the MCP (Model Context Protocol), the
//! same transport shape the teacher's `StdioServer` uses for its own
//! task/agent/memory tools — newline-delimited JSON-RPC 2.0 on
//! stdin/stdout, logging reserved for stderr.
//!
//! One addition over the teacher's server: every DAG run publishes its
//! event stream to the shared [`EventBus`], so this server also forwards
//! those frames to stdout as `notifications/event` JSON-RPC
//! notifications while a `tools/call` request is in flight.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::domain::models::{Invocation, Task, ToolId};
use crate::services::gateway::{
    ExecuteDagOptions, ExecuteDagRequest, Gateway, SearchRequest,
};
use crate::services::planner::ExplicitTaskSpec;

/// MCP stdio server that exposes the mediator's Gateway Facade as tools.
pub struct StdioServer {
    gateway: Arc<Gateway>,
    stdout: AsyncMutex<tokio::io::Stdout>,
}

impl StdioServer {
    #[must_use]
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway, stdout: AsyncMutex::new(tokio::io::stdout()) }
    }

    /// Runs the stdio server loop, reading JSON-RPC from stdin and
    /// writing responses (and event notifications) to stdout.
    pub async fn run(self: &Arc<Self>) -> anyhow::Result<()> {
        let stdin = tokio::io::stdin();
        let reader = BufReader::new(stdin);
        let mut lines = reader.lines();

        eprintln!("[casys-pml-mcp] stdio server started");

        let forwarder = self.clone();
        tokio::spawn(async move { forwarder.forward_events().await });

        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }

            let response = self.handle_message(&line).await;
            if response.is_empty() {
                continue;
            }
            self.write_line(&response).await?;
        }

        eprintln!("[casys-pml-mcp] stdio server stopped");
        Ok(())
    }

    /// Drains the gateway's event bus for as long as the server runs,
    /// relaying every frame as a `notifications/event` JSON-RPC
    /// notification. A lagged subscriber simply resumes at the next
    /// frame — the durable record of a run is its persisted trace, not
    /// this stream.
    async fn forward_events(&self) {
        let mut receiver = self.gateway.events().subscribe();
        loop {
            match receiver.recv().await {
                Ok(sequenced) => {
                    let notification = serde_json::json!({
                        "jsonrpc": "2.0",
                        "method": "notifications/event",
                        "params": sequenced.frame,
                    });
                    if self.write_line(&notification.to_string()).await.is_err() {
                        return;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    async fn write_line(&self, line: &str) -> anyhow::Result<()> {
        let mut stdout = self.stdout.lock().await;
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        stdout.write_all(&bytes).await?;
        stdout.flush().await?;
        Ok(())
    }

    async fn handle_message(&self, line: &str) -> String {
        let request: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => return self.error_response(Value::Null, -32700, &format!("Parse error: {e}")),
        };

        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
        let params = request.get("params").cloned().unwrap_or_else(|| serde_json::json!({}));

        match method {
            "initialize" => self.handle_initialize(id),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tools_call(id, &params).await,
            "notifications/initialized" => String::new(),
            _ => self.error_response(id, -32601, &format!("Method not found: {method}")),
        }
    }

    fn handle_initialize(&self, id: Value) -> String {
        let result = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": "casys-pml-mediator",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        self.success_response(id, result)
    }

    fn handle_tools_list(&self, id: Value) -> String {
        let tools = serde_json::json!({
            "tools": [
                {
                    "name": "search_tools",
                    "description": "Search the catalog of atomic tools exposed by registered endpoints for ones matching an intent. Use this before execute_dag when you don't yet know which concrete tool(s) to invoke. Ranked by hybrid semantic + graph relatedness score.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "intent": { "type": "string", "description": "Natural-language description of the capability or action you're looking for." },
                            "k": { "type": "integer", "description": "Maximum number of results to return (default 10)." },
                            "min_score": { "type": "number", "description": "Drop results scoring below this threshold (default 0)." }
                        },
                        "required": ["intent"]
                    }
                },
                {
                    "name": "search_capabilities",
                    "description": "Search the catalog of crystallized capabilities — previously fused, reusable tool chains — for ones matching an intent. Each result includes a reliability figure derived from the capability's recorded successes and failures. Prefer a matching capability over re-planning from tools when one scores above your threshold.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "intent": { "type": "string", "description": "Natural-language description of the task the capability should accomplish." },
                            "k": { "type": "integer", "description": "Maximum number of results to return (default 10)." },
                            "min_score": { "type": "number", "description": "Drop results scoring below this threshold (default 0)." }
                        },
                        "required": ["intent"]
                    }
                },
                {
                    "name": "execute_dag",
                    "description": "Plan and run a task DAG, either by intent (the mediator plans it, reusing a matching capability when one exists) or from an explicit list of tool/capability invocations. Returns a dag_run_id to track and control the run with continue, abort, replan, and approval_response. Optionally gate tasks behind human-in-the-loop approval or agent-in-the-loop review.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "intent": { "type": "string", "description": "Natural-language description of the goal to plan and execute. Mutually exclusive with tasks." },
                            "k": { "type": "integer", "description": "Search breadth when planning from intent (default 10)." },
                            "min_score": { "type": "number", "description": "Minimum search score when planning from intent (default 0)." },
                            "tasks": {
                                "type": "array",
                                "description": "Explicit task list. Mutually exclusive with intent.",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "id": { "type": "string", "description": "Caller-chosen id for this task, referenced by other tasks' depends_on." },
                                        "tool_id": { "type": "string", "description": "Tool invocation target, e.g. 'files:list'. Mutually exclusive with capability_fqdn." },
                                        "capability_fqdn": { "type": "string", "description": "Capability invocation target. Mutually exclusive with tool_id." },
                                        "arguments": { "type": "object", "description": "Argument JSON, whose string values may embed $OUTPUT[task_id.path] references to an earlier task's output." },
                                        "depends_on": { "type": "array", "items": { "type": "string" } },
                                        "required": { "type": "boolean", "description": "Whether the whole run fails if this task fails (default true)." }
                                    },
                                    "required": ["arguments"]
                                }
                            },
                            "hil_tasks": { "type": "array", "items": { "type": "string" }, "description": "Ids of explicit tasks to require human approval for before they run." },
                            "ail_after_layer": { "type": "integer", "description": "Gate every task in this execution-wave index behind agent-in-the-loop review." }
                        }
                    }
                },
                {
                    "name": "execute_code",
                    "description": "Run ad-hoc code directly in the sandbox against a set of injected tools, bypassing DAG planning. On success the code is crystallized as a candidate capability for future reuse by search_capabilities and execute_dag. Use this to compose or explore a tool chain before it's worth crystallizing deliberately.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "code": { "type": "string", "description": "Code to run in the sandbox." },
                            "intent": { "type": "string", "description": "Natural-language description of what this code accomplishes, used to place the crystallized capability in the search index." },
                            "injected_tools": { "type": "array", "items": { "type": "string" }, "description": "Tool ids made available to the sandboxed code via RPC." }
                        },
                        "required": ["code"]
                    }
                },
                {
                    "name": "continue",
                    "description": "Resume a DAG run paused at a human-in-the-loop or agent-in-the-loop gate, or sitting idle between layers. Returns the run's current control state.",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "dag_run_id": { "type": "string" } },
                        "required": ["dag_run_id"]
                    }
                },
                {
                    "name": "abort",
                    "description": "Cancel a running or paused DAG run. Already-completed tasks and checkpoints are left in place; no further layers execute.",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "dag_run_id": { "type": "string" } },
                        "required": ["dag_run_id"]
                    }
                },
                {
                    "name": "replan",
                    "description": "Replace the not-yet-executed remainder of a DAG run with a new set of tasks, e.g. after a failure or a change in requirements discovered mid-run. Tasks already completed cannot be redefined.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "dag_run_id": { "type": "string" },
                            "tasks": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "id": { "type": "string" },
                                        "tool_id": { "type": "string" },
                                        "capability_fqdn": { "type": "string" },
                                        "arguments": { "type": "object" },
                                        "depends_on": { "type": "array", "items": { "type": "string" } },
                                        "required": { "type": "boolean" }
                                    },
                                    "required": ["arguments"]
                                }
                            }
                        },
                        "required": ["dag_run_id", "tasks"]
                    }
                },
                {
                    "name": "approval_response",
                    "description": "Answer a pending human-in-the-loop gate for a task, approving or rejecting its execution.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "dag_run_id": { "type": "string" },
                            "task_id": { "type": "string" },
                            "approved": { "type": "boolean" }
                        },
                        "required": ["dag_run_id", "task_id", "approved"]
                    }
                }
            ]
        });
        self.success_response(id, tools)
    }

    async fn handle_tools_call(&self, id: Value, params: &Value) -> String {
        let tool_name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| serde_json::json!({}));

        let result = match tool_name {
            "search_tools" => self.tool_search_tools(&arguments).await,
            "search_capabilities" => self.tool_search_capabilities(&arguments).await,
            "execute_dag" => self.tool_execute_dag(&arguments).await,
            "execute_code" => self.tool_execute_code(&arguments).await,
            "continue" => self.tool_continue(&arguments).await,
            "abort" => self.tool_abort(&arguments).await,
            "replan" => self.tool_replan(&arguments).await,
            "approval_response" => self.tool_approval_response(&arguments).await,
            _ => Err(format!("Unknown tool: {tool_name}")),
        };

        match result {
            Ok(content) => {
                let result = serde_json::json!({ "content": [{ "type": "text", "text": content }] });
                self.success_response(id, result)
            }
            Err(error) => {
                let result = serde_json::json!({
                    "content": [{ "type": "text", "text": error }],
                    "isError": true,
                });
                self.success_response(id, result)
            }
        }
    }

    // ========================================================================
    // Gateway tools
    // ========================================================================

    async fn tool_search_tools(&self, args: &Value) -> Result<String, String> {
        let request = parse_search_request(args)?;
        let hits = self.gateway.search_tools(request).await.map_err(|e| e.to_string())?;
        serde_json::to_string_pretty(&hits).map_err(|e| e.to_string())
    }

    async fn tool_search_capabilities(&self, args: &Value) -> Result<String, String> {
        let request = parse_search_request(args)?;
        let hits = self.gateway.search_capabilities(request).await.map_err(|e| e.to_string())?;
        serde_json::to_string_pretty(&hits).map_err(|e| e.to_string())
    }

    async fn tool_execute_dag(&self, args: &Value) -> Result<String, String> {
        let request = if let Some(intent) = args.get("intent").and_then(|v| v.as_str()) {
            ExecuteDagRequest::Intent {
                text: intent.to_string(),
                k: args.get("k").and_then(Value::as_u64).map(|v| v as usize),
                min_score: args.get("min_score").and_then(Value::as_f64),
            }
        } else if let Some(tasks) = args.get("tasks").and_then(|v| v.as_array()) {
            let tasks = tasks.iter().map(parse_explicit_task).collect::<Result<Vec<_>, _>>()?;
            ExecuteDagRequest::Explicit { tasks }
        } else {
            return Err("execute_dag requires either \"intent\" or \"tasks\"".to_string());
        };

        let options = ExecuteDagOptions {
            hil_tasks: parse_uuid_array(args.get("hil_tasks"))?,
            ail_after_layer: args.get("ail_after_layer").and_then(Value::as_u64).map(|v| v as usize),
            checkpoint: true,
        };

        let outcome = self.gateway.execute_dag(request, options).await.map_err(|e| e.to_string())?;
        serde_json::to_string_pretty(&outcome).map_err(|e| e.to_string())
    }

    async fn tool_execute_code(&self, args: &Value) -> Result<String, String> {
        let code = args.get("code").and_then(|v| v.as_str()).ok_or("Missing required field: code")?.to_string();
        let intent = args.get("intent").and_then(|v| v.as_str()).map(str::to_string);
        let injected_tools = args
            .get("injected_tools")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let outcome = self.gateway.execute_code(code, intent, injected_tools).await.map_err(|e| e.to_string())?;
        serde_json::to_string_pretty(&outcome).map_err(|e| e.to_string())
    }

    async fn tool_continue(&self, args: &Value) -> Result<String, String> {
        let dag_run_id = parse_uuid_field(args, "dag_run_id")?;
        let snapshot = self.gateway.continue_run(dag_run_id).await.map_err(|e| e.to_string())?;
        serde_json::to_string_pretty(&snapshot).map_err(|e| e.to_string())
    }

    async fn tool_abort(&self, args: &Value) -> Result<String, String> {
        let dag_run_id = parse_uuid_field(args, "dag_run_id")?;
        let snapshot = self.gateway.abort_run(dag_run_id).await.map_err(|e| e.to_string())?;
        serde_json::to_string_pretty(&snapshot).map_err(|e| e.to_string())
    }

    async fn tool_replan(&self, args: &Value) -> Result<String, String> {
        let dag_run_id = parse_uuid_field(args, "dag_run_id")?;
        let tasks = args
            .get("tasks")
            .and_then(Value::as_array)
            .ok_or("Missing required field: tasks")?
            .iter()
            .map(parse_explicit_task)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(explicit_spec_to_task)
            .collect();

        let snapshot = self.gateway.replan(dag_run_id, tasks).await.map_err(|e| e.to_string())?;
        serde_json::to_string_pretty(&snapshot).map_err(|e| e.to_string())
    }

    async fn tool_approval_response(&self, args: &Value) -> Result<String, String> {
        let dag_run_id = parse_uuid_field(args, "dag_run_id")?;
        let task_id = parse_uuid_field(args, "task_id")?;
        let approved = args.get("approved").and_then(Value::as_bool).ok_or("Missing required field: approved")?;

        let snapshot =
            self.gateway.approval_response(dag_run_id, task_id, approved).await.map_err(|e| e.to_string())?;
        serde_json::to_string_pretty(&snapshot).map_err(|e| e.to_string())
    }

    // ========================================================================
    // JSON-RPC helpers
    // ========================================================================

    fn success_response(&self, id: Value, result: Value) -> String {
        serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result }).to_string()
    }

    fn error_response(&self, id: Value, code: i32, message: &str) -> String {
        serde_json::json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } }).to_string()
    }
}

fn parse_search_request(args: &Value) -> Result<SearchRequest, String> {
    let intent = args.get("intent").and_then(|v| v.as_str()).ok_or("Missing required field: intent")?.to_string();
    Ok(SearchRequest {
        intent,
        k: args.get("k").and_then(Value::as_u64).map(|v| v as usize),
        min_score: args.get("min_score").and_then(Value::as_f64),
    })
}

fn parse_uuid_field(args: &Value, field: &str) -> Result<Uuid, String> {
    args.get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("Missing required field: {field}"))?
        .parse()
        .map_err(|e| format!("Invalid {field}: {e}"))
}

fn parse_uuid_array(value: Option<&Value>) -> Result<Vec<Uuid>, String> {
    let Some(value) = value else { return Ok(Vec::new()) };
    let Some(array) = value.as_array() else { return Err("expected an array of task ids".to_string()) };
    array
        .iter()
        .map(|v| {
            v.as_str()
                .ok_or_else(|| "task id must be a string".to_string())
                .and_then(|s| s.parse::<Uuid>().map_err(|e| format!("invalid task id: {e}")))
        })
        .collect()
}

/// Parses one element of an `execute_dag`/`replan` `tasks` array into an
/// [`ExplicitTaskSpec`].
fn parse_explicit_task(value: &Value) -> Result<ExplicitTaskSpec, String> {
    let id = value.get("id").and_then(|v| v.as_str()).map(|s| s.parse::<Uuid>()).transpose().map_err(|e| e.to_string())?;

    let invocation = if let Some(tool_id) = value.get("tool_id").and_then(|v| v.as_str()) {
        let (server, name) = tool_id.split_once(':').ok_or("tool_id must be of the form \"server:name\"")?;
        Invocation::Tool(ToolId::new(server, name))
    } else if let Some(fqdn) = value.get("capability_fqdn").and_then(|v| v.as_str()) {
        Invocation::Capability(crate::domain::models::Fqdn(fqdn.to_string()))
    } else {
        return Err("each task requires either tool_id or capability_fqdn".to_string());
    };

    let arguments = value.get("arguments").cloned().unwrap_or_else(|| serde_json::json!({}));
    let depends_on = parse_uuid_array(value.get("depends_on"))?;
    let required = value.get("required").and_then(Value::as_bool).unwrap_or(true);
    let hil = value.get("hil").and_then(Value::as_bool).unwrap_or(false);
    let ail = value.get("ail").and_then(Value::as_bool).unwrap_or(false);

    Ok(ExplicitTaskSpec { id, invocation, arguments, depends_on, required, hil, ail })
}

fn explicit_spec_to_task(spec: ExplicitTaskSpec) -> Task {
    let mut task = Task::new(spec.invocation, spec.arguments);
    if let Some(id) = spec.id {
        task.id = id;
    }
    task.depends_on = spec.depends_on;
    task.required = spec.required;
    task.hil = spec.hil;
    task.ail = spec.ail;
    task
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_search_request_requires_intent() {
        let args = serde_json::json!({});
        assert!(parse_search_request(&args).is_err());
    }

    #[test]
    fn parse_search_request_applies_caller_overrides() {
        let args = serde_json::json!({"intent": "list files", "k": 3, "min_score": 0.2});
        let request = parse_search_request(&args).unwrap();
        assert_eq!(request.intent, "list files");
        assert_eq!(request.k, Some(3));
        assert_eq!(request.min_score, Some(0.2));
    }

    #[test]
    fn parse_explicit_task_requires_an_invocation_target() {
        let value = serde_json::json!({"arguments": {}});
        assert!(parse_explicit_task(&value).is_err());
    }

    #[test]
    fn parse_explicit_task_accepts_tool_id() {
        let value = serde_json::json!({"tool_id": "files:list", "arguments": {}});
        let spec = parse_explicit_task(&value).unwrap();
        assert_eq!(spec.invocation, Invocation::Tool(ToolId::new("files", "list")));
    }

    #[test]
    fn parse_explicit_task_accepts_capability_fqdn() {
        let value = serde_json::json!({"capability_fqdn": "casys.pml.files.list.deadbeef", "arguments": {}});
        let spec = parse_explicit_task(&value).unwrap();
        assert_eq!(
            spec.invocation,
            Invocation::Capability(crate::domain::models::Fqdn("casys.pml.files.list.deadbeef".to_string()))
        );
    }

    #[test]
    fn parse_uuid_array_defaults_to_empty() {
        assert_eq!(parse_uuid_array(None).unwrap(), Vec::<Uuid>::new());
    }

    #[test]
    fn parse_uuid_array_rejects_non_string_elements() {
        let value = serde_json::json!([1, 2]);
        assert!(parse_uuid_array(Some(&value)).is_err());
    }
}
