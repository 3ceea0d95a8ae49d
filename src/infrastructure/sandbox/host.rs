//! Sandbox host: spawns the `casys-pml-sandbox-worker` child process and
//! drives the RPC bridge (`spec.md` §4.5).
//!
//! Process isolation mirrors the teacher's `McpProcessManager::start` —
//! piped stdio over `tokio::process::Command` — generalized from MCP's
//! JSON-RPC envelope to the bridge's four frame kinds, framed the same
//! newline-delimited way the teacher's `StdioServer::run` reads and
//! writes (`adapters/mcp/stdio_server.rs`).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

use crate::domain::errors::{MediatorError, MediatorResult};
use crate::domain::models::{MediatorFrame, SandboxLimits, WorkerFrame};
use crate::domain::ports::EndpointClient;
use crate::services::pii_redaction::RedactionContext;

/// A completed, PII-redacted sandbox run.
#[derive(Debug, Clone)]
pub struct SandboxOutcome {
    pub value: Option<Value>,
    pub logs: Vec<String>,
}

fn command_stdio(command: &mut Command) -> &mut Command {
    command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::null())
}

/// Spawns and supervises one Sandbox Worker invocation.
pub struct SandboxHost {
    worker_binary: PathBuf,
}

impl SandboxHost {
    #[must_use]
    pub fn new(worker_binary: impl Into<PathBuf>) -> Self {
        Self { worker_binary: worker_binary.into() }
    }

    /// Runs one capability invocation to completion, enforcing
    /// `limits` for the whole call. The worker is given no file,
    /// network, environment, or subprocess access of its own; every
    /// effect it has on the outside world goes through `invoke` frames
    /// this function answers, looked up against `endpoints` and gated by
    /// `available_tools`.
    pub async fn run(
        &self,
        capability_code_base64: String,
        arguments: Value,
        endpoints: &HashMap<String, Arc<dyn EndpointClient>>,
        available_tools: Vec<String>,
        limits: SandboxLimits,
    ) -> MediatorResult<SandboxOutcome> {
        let mut command = Command::new(&self.worker_binary);
        Self::spawn_and_drive(command_stdio(&mut command), capability_code_base64, arguments, endpoints, available_tools, limits)
            .await
    }

    /// Shared by [`Self::run`] and, in tests, by a stand-in shell script
    /// that exercises the bridge loop without a compiled wasmtime host.
    async fn spawn_and_drive(
        command: &mut Command,
        capability_code_base64: String,
        arguments: Value,
        endpoints: &HashMap<String, Arc<dyn EndpointClient>>,
        available_tools: Vec<String>,
        limits: SandboxLimits,
    ) -> MediatorResult<SandboxOutcome> {
        let mut child = command.kill_on_drop(true).spawn().map_err(|e| MediatorError::SandboxCrashed(e.to_string()))?;

        let setup = MediatorFrame::Setup {
            capability_code_base64,
            arguments,
            available_tools: available_tools.clone(),
            limits,
        };
        {
            let stdin = child
                .stdin
                .as_mut()
                .ok_or_else(|| MediatorError::SandboxCrashed("worker stdin not piped".to_string()))?;
            Self::write_frame(stdin, &setup).await?;
        }

        let allowed: HashSet<String> = available_tools.into_iter().collect();
        let wall_time = Duration::from_millis(limits.max_wall_time_ms);

        match tokio::time::timeout(wall_time, Self::drive(&mut child, endpoints, &allowed, limits)).await {
            Ok(result) => result,
            Err(_) => {
                let _ = child.kill().await;
                Err(MediatorError::SandboxLimitExceeded { which: "max_wall_time_ms".to_string() })
            }
        }
    }

    async fn drive(
        child: &mut Child,
        endpoints: &HashMap<String, Arc<dyn EndpointClient>>,
        allowed: &HashSet<String>,
        limits: SandboxLimits,
    ) -> MediatorResult<SandboxOutcome> {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediatorError::SandboxCrashed("worker stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediatorError::SandboxCrashed("worker stdout not piped".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let mut fan_in: u32 = 0;
        let mut output_bytes: usize = 0;
        let mut redaction = RedactionContext::new();

        loop {
            let Some(line) = lines.next_line().await.map_err(|e| MediatorError::SandboxCrashed(e.to_string()))?
            else {
                return Err(MediatorError::SandboxCrashed("worker exited before sending a done frame".to_string()));
            };
            if line.trim().is_empty() {
                continue;
            }

            output_bytes += line.len();
            if output_bytes > limits.max_output_bytes {
                let _ = child.kill().await;
                return Err(MediatorError::SandboxLimitExceeded { which: "max_output_bytes".to_string() });
            }

            let frame: WorkerFrame = serde_json::from_str(&line)?;
            match frame {
                WorkerFrame::Invoke { request_id, tool_id, arguments } => {
                    fan_in += 1;
                    if fan_in > limits.max_rpc_fan_in {
                        let _ = child.kill().await;
                        return Err(MediatorError::SandboxLimitExceeded { which: "max_rpc_fan_in".to_string() });
                    }

                    let reply = Self::invoke_tool(endpoints, allowed, &tool_id, arguments).await;
                    let response = match reply {
                        Ok(value) => MediatorFrame::Result { request_id, ok: true, value: Some(value), error: None },
                        Err(e) => MediatorFrame::Result { request_id, ok: false, value: None, error: Some(e.to_string()) },
                    };
                    Self::write_frame(&mut stdin, &response).await?;
                }
                WorkerFrame::Trace { .. } => {
                    // Tool-call lifecycle event; no control-flow effect here, the
                    // run's owning `ExecutionTrace` entry already records timing.
                }
                WorkerFrame::Done { ok, value, error, logs } => {
                    let _ = child.wait().await;
                    if !ok {
                        return Err(MediatorError::ToolInvocationFailed {
                            tool_id: "sandbox".to_string(),
                            kind: error.unwrap_or_else(|| "sandbox execution failed".to_string()),
                        });
                    }
                    let value = value.map(|v| redaction.redact_value(&v));
                    let logs = logs.iter().map(|l| redaction.redact(l)).collect();
                    return Ok(SandboxOutcome { value, logs });
                }
            }
        }
    }

    async fn invoke_tool(
        endpoints: &HashMap<String, Arc<dyn EndpointClient>>,
        allowed: &HashSet<String>,
        tool_id: &str,
        arguments: Value,
    ) -> MediatorResult<Value> {
        if !allowed.contains(tool_id) {
            return Err(MediatorError::NotFound(format!(
                "tool {tool_id} is not exposed to this sandbox invocation"
            )));
        }
        let server = tool_id.split_once(':').map_or(tool_id, |(server, _)| server);
        let name = tool_id.split_once(':').map_or("", |(_, name)| name);
        let client = endpoints
            .get(server)
            .ok_or_else(|| MediatorError::ToolEndpointUnavailable(format!("no endpoint client for server {server}")))?;
        client.invoke(name, arguments).await
    }

    #[cfg(test)]
    async fn run_command(
        command: &mut Command,
        endpoints: &HashMap<String, Arc<dyn EndpointClient>>,
        available_tools: Vec<String>,
        limits: SandboxLimits,
    ) -> MediatorResult<SandboxOutcome> {
        Self::spawn_and_drive(command, String::new(), serde_json::json!({}), endpoints, available_tools, limits).await
    }

    async fn write_frame(stdin: &mut (impl AsyncWrite + Unpin), frame: &MediatorFrame) -> MediatorResult<()> {
        let mut bytes = serde_json::to_vec(frame)?;
        bytes.push(b'\n');
        stdin.write_all(&bytes).await.map_err(|e| MediatorError::SandboxCrashed(e.to_string()))?;
        stdin.flush().await.map_err(|e| MediatorError::SandboxCrashed(e.to_string()))?;
        Ok(())
    }
}
