//! Controlled Executor (`spec.md` §4.3): drives a [`TaskDag`] through its
//! execution waves, persisting a [`Checkpoint`] after each one, honoring
//! HIL/AIL gates, pause/abort/replan, and task fusion.
//!
//! Run state lives for as long as the process does — one run per
//! `execute_dag` call, addressed by `dag_run_id` — and is driven by an
//! explicit command queue rather than a free-running loop, the
//! "coroutine-style orchestration" shape `spec.md` §9 calls for. This
//! mirrors the teacher's `DagExecutor::execute_wave` concurrency (a
//! `Semaphore` capping in-flight tasks per wave), generalized with a
//! command channel so `continue`/`abort`/`replan`/`approval_response`
//! can reach an in-flight run from a separate Gateway call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::{MediatorError, MediatorResult};
use crate::domain::models::{
    resolve, Capability, Checkpoint, ControlCommand, ControlState, Event, ExecutionConfig, ExecutionTrace,
    Invocation, SearchTarget, Task, TaskDag, TaskOutcome, TaskTraceEntry, ToolId,
};
use crate::domain::ports::{CheckpointRepository, DependencyEdgeRepository, ToolRepository, TraceRepository};
use crate::infrastructure::sandbox::host::SandboxHost;
use crate::services::capability_store::CapabilityStore;
use crate::services::endpoint_pool::EndpointClientPool;
use crate::services::event_bus::EventBus;
use crate::services::fusion::find_fusable_groups;
use crate::services::retry::retry_idempotent;

/// The 300s auto-continue on an unanswered AIL gate (`spec.md` §4.3).
const AIL_AUTO_CONTINUE: Duration = Duration::from_secs(300);

struct Dispatched {
    command: ControlCommand,
    ack: oneshot::Sender<MediatorResult<()>>,
}

struct RunHandle {
    command_tx: mpsc::UnboundedSender<Dispatched>,
    state: Arc<Mutex<ControlState>>,
    cancellation: CancellationToken,
}

pub struct ControlledExecutor {
    tool_repository: Arc<dyn ToolRepository>,
    capability_store: Arc<CapabilityStore>,
    endpoints: Arc<EndpointClientPool>,
    sandbox: Arc<SandboxHost>,
    checkpoints: Arc<dyn CheckpointRepository>,
    traces: Arc<dyn TraceRepository>,
    edges: Arc<dyn DependencyEdgeRepository>,
    events: Arc<EventBus>,
    config: ExecutionConfig,
    runs: Mutex<HashMap<Uuid, RunHandle>>,
}

impl ControlledExecutor {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tool_repository: Arc<dyn ToolRepository>,
        capability_store: Arc<CapabilityStore>,
        endpoints: Arc<EndpointClientPool>,
        sandbox: Arc<SandboxHost>,
        checkpoints: Arc<dyn CheckpointRepository>,
        traces: Arc<dyn TraceRepository>,
        edges: Arc<dyn DependencyEdgeRepository>,
        events: Arc<EventBus>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            tool_repository,
            capability_store,
            endpoints,
            sandbox,
            checkpoints,
            traces,
            edges,
            events,
            config,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Starts executing `dag` as a new run, returning its id immediately;
    /// the run itself proceeds on a spawned task, observable through
    /// `events` and queried/steered through `control_state` and the
    /// `continue_run`/`abort_run`/`approval_response`/`replan` calls.
    pub async fn execute_dag(self: &Arc<Self>, dag: TaskDag, intent: Option<String>) -> MediatorResult<Uuid> {
        let dag_run_id = Uuid::new_v4();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(ControlState::Idle));
        let cancellation = CancellationToken::new();

        self.runs.lock().await.insert(
            dag_run_id,
            RunHandle { command_tx, state: state.clone(), cancellation: cancellation.clone() },
        );

        let executor = self.clone();
        tokio::spawn(async move {
            executor.run(dag_run_id, dag, intent, command_rx, state, cancellation).await;
        });

        Ok(dag_run_id)
    }

    pub async fn control_state(&self, dag_run_id: Uuid) -> Option<ControlState> {
        let runs = self.runs.lock().await;
        let handle = runs.get(&dag_run_id)?;
        Some(*handle.state.lock().await)
    }

    pub async fn continue_run(&self, dag_run_id: Uuid) -> MediatorResult<()> {
        self.dispatch(dag_run_id, ControlCommand::Continue).await
    }

    pub async fn abort_run(&self, dag_run_id: Uuid) -> MediatorResult<()> {
        if let Some(handle) = self.runs.lock().await.get(&dag_run_id) {
            handle.cancellation.cancel();
        }
        self.dispatch(dag_run_id, ControlCommand::Abort).await
    }

    pub async fn pause_run(&self, dag_run_id: Uuid) -> MediatorResult<()> {
        self.dispatch(dag_run_id, ControlCommand::Pause).await
    }

    pub async fn approval_response(&self, dag_run_id: Uuid, task_id: Uuid, approved: bool) -> MediatorResult<()> {
        self.dispatch(dag_run_id, ControlCommand::ApprovalResponse { task_id, approved }).await
    }

    pub async fn replan(&self, dag_run_id: Uuid, replacement_tasks: Vec<Task>) -> MediatorResult<()> {
        self.dispatch(dag_run_id, ControlCommand::Replan { replacement_tasks }).await
    }

    async fn dispatch(&self, dag_run_id: Uuid, command: ControlCommand) -> MediatorResult<()> {
        let tx = {
            let runs = self.runs.lock().await;
            runs.get(&dag_run_id)
                .ok_or_else(|| MediatorError::NotFound(format!("dag run {dag_run_id}")))?
                .command_tx
                .clone()
        };
        let (ack, ack_rx) = oneshot::channel();
        tx.send(Dispatched { command, ack })
            .map_err(|_| MediatorError::InternalInvariantViolation(format!("run {dag_run_id} command queue closed")))?;
        ack_rx
            .await
            .map_err(|_| MediatorError::InternalInvariantViolation(format!("run {dag_run_id} dropped its ack")))?
    }

    fn publish(&self, event: Event) {
        self.events.publish(event);
    }

    #[allow(clippy::too_many_lines)]
    async fn run(
        self: Arc<Self>,
        dag_run_id: Uuid,
        mut dag: TaskDag,
        intent: Option<String>,
        mut command_rx: mpsc::UnboundedReceiver<Dispatched>,
        state: Arc<Mutex<ControlState>>,
        cancellation: CancellationToken,
    ) {
        *state.lock().await = ControlState::Running;
        self.publish(Event::DagStart { dag_run_id, task_count: dag.tasks.len() });

        let mut trace = ExecutionTrace::new(dag_run_id, intent);
        if let Err(err) = self.traces.create(&trace).await {
            tracing::error!(%dag_run_id, %err, "failed to persist execution trace");
        }

        let mut outputs: HashMap<Uuid, serde_json::Value> = HashMap::new();
        let mut done: HashSet<Uuid> = HashSet::new();
        let mut aborted = false;
        let mut layer_index = 0usize;

        'outer: loop {
            let waves = match dag.execution_waves() {
                Ok(w) => w,
                Err(err) => {
                    self.publish(Event::Error { dag_run_id, task_id: None, message: err.to_string(), retryable: false });
                    *state.lock().await = ControlState::Failed;
                    break 'outer;
                }
            };
            let groups = find_fusable_groups(&dag);
            let chain_of: HashMap<Uuid, usize> =
                groups.iter().enumerate().flat_map(|(i, g)| g.members.iter().map(move |m| (*m, i))).collect();

            let mut replanned = false;

            for wave in &waves {
                let pending: Vec<Uuid> = wave.iter().copied().filter(|id| !done.contains(id)).collect();
                if pending.is_empty() {
                    continue;
                }

                if cancellation.is_cancelled() {
                    aborted = true;
                    break 'outer;
                }

                // Commands are only honored between layers.
                if let Some(outcome) =
                    self.drain_commands(dag_run_id, &mut command_rx, &state, &mut dag, &done).await
                {
                    match outcome {
                        DrainOutcome::Abort => {
                            aborted = true;
                            break 'outer;
                        }
                        DrainOutcome::Replanned => {
                            replanned = true;
                        }
                    }
                }
                if replanned {
                    break;
                }

                if *state.lock().await == ControlState::Paused {
                    match self.wait_for_resume(dag_run_id, &mut command_rx, &state).await {
                        DrainOutcome::Abort => {
                            aborted = true;
                            break 'outer;
                        }
                        DrainOutcome::Resumed => {
                            // Re-derive waves from the top so a task that
                            // became ready while paused is picked up.
                            replanned = true;
                            break;
                        }
                    }
                }

                // Gated tasks run serially so HIL/AIL waits never overlap.
                let mut ungated = Vec::new();
                for task_id in &pending {
                    let Some(task) = dag.tasks.get(task_id).cloned() else { continue };
                    if task.hil || task.ail {
                        let gate_outcome = self
                            .run_gate(dag_run_id, &task, &mut command_rx, &state, &mut dag, &done)
                            .await;
                        match gate_outcome {
                            GateOutcome::Proceed => ungated.push(task.id),
                            GateOutcome::Skip => {
                                done.insert(task.id);
                                let entry = skipped_entry(task.id);
                                let _ = self.traces.append_entry(dag_run_id, &entry).await;
                                trace.record(entry);
                                if task.required {
                                    self.publish(Event::Error {
                                        dag_run_id,
                                        task_id: Some(task.id),
                                        message: "required task rejected at gate".to_string(),
                                        retryable: false,
                                    });
                                    *state.lock().await = ControlState::Failed;
                                    break 'outer;
                                }
                            }
                            GateOutcome::Abort => {
                                aborted = true;
                                break 'outer;
                            }
                            GateOutcome::Replanned => {
                                replanned = true;
                            }
                        }
                    } else {
                        ungated.push(task.id);
                    }
                }
                if replanned {
                    break;
                }

                // Collapse fused chains: only the chain head is dispatched;
                // its members are consumed as part of the same call.
                let mut dispatch_ids = Vec::new();
                let mut seen_groups = HashSet::new();
                for id in &ungated {
                    if let Some(&group_idx) = chain_of.get(id) {
                        if groups[group_idx].members[0] == *id && seen_groups.insert(group_idx) {
                            dispatch_ids.push((Some(group_idx), *id));
                        }
                    } else {
                        dispatch_ids.push((None, *id));
                    }
                }

                let permits = self.config.max_parallel_tasks_per_dag.max(1);
                let semaphore = Arc::new(Semaphore::new(permits));
                let mut handles = Vec::new();

                for (group_idx, id) in dispatch_ids {
                    let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                    let executor = self.clone();
                    let dag_snapshot = dag.clone();
                    let group = group_idx.map(|i| groups[i].clone());
                    let task_outputs = outputs.clone();
                    handles.push(tokio::spawn(async move {
                        let _permit = permit;
                        executor.execute_one(dag_run_id, id, &dag_snapshot, group.as_ref(), &task_outputs).await
                    }));
                }

                for handle in handles {
                    let outcome = handle.await.unwrap_or_else(|join_err| {
                        vec![ExecOutcome {
                            task_id: Uuid::nil(),
                            ok: false,
                            output: None,
                            error: Some(join_err.to_string()),
                            latency_ms: 0,
                            fused: false,
                        }]
                    });
                    for entry in outcome {
                        if entry.task_id == Uuid::nil() {
                            continue;
                        }
                        let Some(task) = dag.tasks.get(&entry.task_id) else { continue };
                        let required = task.required;
                        done.insert(entry.task_id);
                        if entry.ok {
                            if let Some(value) = entry.output.clone() {
                                outputs.insert(entry.task_id, value);
                            }
                            self.record_edges(&dag, entry.task_id).await;
                        } else if required {
                            self.publish(Event::Error {
                                dag_run_id,
                                task_id: Some(entry.task_id),
                                message: entry.error.clone().unwrap_or_default(),
                                retryable: false,
                            });
                        }
                        self.publish(Event::TaskEnd {
                            dag_run_id,
                            task_id: entry.task_id,
                            success: entry.ok,
                            latency_ms: entry.latency_ms,
                            source: None,
                        });
                        let trace_entry = TaskTraceEntry {
                            task_id: entry.task_id,
                            outcome: if entry.ok { TaskOutcome::Success } else { TaskOutcome::Failure },
                            output: entry.output,
                            error: entry.error,
                            latency_ms: entry.latency_ms,
                            started_at: chrono::Utc::now(),
                            completed_at: chrono::Utc::now(),
                            fused: entry.fused,
                        };
                        let _ = self.traces.append_entry(dag_run_id, &trace_entry).await;
                        trace.record(trace_entry);
                        if !entry.ok && required {
                            *state.lock().await = ControlState::Failed;
                            self.publish(Event::DagEnd { dag_run_id, success: false });
                            let _ = self.traces.mark_completed(dag_run_id).await;
                            return;
                        }
                    }
                }

                self.publish(Event::LayerComplete { dag_run_id, layer_index, task_ids: pending.clone() });
                layer_index += 1;

                let remaining_tasks: Vec<Task> =
                    dag.tasks.values().filter(|t| !done.contains(&t.id)).cloned().collect();
                let checkpoint = Checkpoint::new(dag_run_id, *state.lock().await, remaining_tasks, outputs.clone());
                if self.checkpoints.save(&checkpoint).await.is_ok() {
                    self.publish(Event::CheckpointSaved { dag_run_id, checkpoint_id: checkpoint.id });
                }
            }

            if replanned {
                continue 'outer;
            }

            if done.len() >= dag.tasks.len() {
                break 'outer;
            }
            // No wave made progress and no replan happened: nothing left
            // reachable (e.g. every remaining task's required dependency
            // was skipped) - stop rather than spin.
            break 'outer;
        }

        if aborted {
            *state.lock().await = ControlState::Aborting;
            *state.lock().await = ControlState::Failed;
            self.publish(Event::DagEnd { dag_run_id, success: false });
        } else {
            let mut guard = state.lock().await;
            if *guard == ControlState::Running {
                *guard = ControlState::Completed;
                drop(guard);
                self.publish(Event::DagEnd { dag_run_id, success: true });
            } else {
                drop(guard);
            }
        }
        let _ = self.traces.mark_completed(dag_run_id).await;
    }

    /// Drains any commands already queued without blocking, applying
    /// pause/replan/abort. Returns `None` if nothing actionable arrived.
    async fn drain_commands(
        &self,
        dag_run_id: Uuid,
        command_rx: &mut mpsc::UnboundedReceiver<Dispatched>,
        state: &Arc<Mutex<ControlState>>,
        dag: &mut TaskDag,
        done: &HashSet<Uuid>,
    ) -> Option<DrainOutcome> {
        let mut result = None;
        while let Ok(dispatched) = command_rx.try_recv() {
            let outcome = self.apply_command(dag_run_id, dispatched, state, dag, done).await;
            if matches!(outcome, Some(DrainOutcome::Abort)) {
                return Some(DrainOutcome::Abort);
            }
            if outcome.is_some() {
                result = outcome;
            }
        }
        result
    }

    async fn wait_for_resume(
        &self,
        dag_run_id: Uuid,
        command_rx: &mut mpsc::UnboundedReceiver<Dispatched>,
        state: &Arc<Mutex<ControlState>>,
    ) -> DrainOutcome {
        loop {
            let Some(dispatched) = command_rx.recv().await else { return DrainOutcome::Abort };
            match dispatched.command {
                ControlCommand::Resume | ControlCommand::Continue => {
                    *state.lock().await = ControlState::Running;
                    let _ = dispatched.ack.send(Ok(()));
                    return DrainOutcome::Resumed;
                }
                ControlCommand::Abort => {
                    let _ = dispatched.ack.send(Ok(()));
                    return DrainOutcome::Abort;
                }
                _ => {
                    let _ = dispatched.ack.send(Err(MediatorError::InvalidDagSpec(
                        "run is paused: only resume/continue/abort are accepted".to_string(),
                    )));
                }
            }
            self.publish(Event::Error {
                dag_run_id,
                task_id: None,
                message: "ignored command while paused".to_string(),
                retryable: false,
            });
        }
    }

    async fn apply_command(
        &self,
        _dag_run_id: Uuid,
        dispatched: Dispatched,
        state: &Arc<Mutex<ControlState>>,
        dag: &mut TaskDag,
        done: &HashSet<Uuid>,
    ) -> Option<DrainOutcome> {
        match dispatched.command {
            ControlCommand::Pause => {
                *state.lock().await = ControlState::Paused;
                let _ = dispatched.ack.send(Ok(()));
                None
            }
            ControlCommand::Resume | ControlCommand::Continue => {
                let mut guard = state.lock().await;
                if *guard == ControlState::Paused {
                    *guard = ControlState::Running;
                }
                let _ = dispatched.ack.send(Ok(()));
                None
            }
            ControlCommand::Abort => {
                let _ = dispatched.ack.send(Ok(()));
                Some(DrainOutcome::Abort)
            }
            ControlCommand::ApprovalResponse { .. } => {
                let _ = dispatched
                    .ack
                    .send(Err(MediatorError::InvalidDagSpec("no pending approval".to_string())));
                None
            }
            ControlCommand::Replan { replacement_tasks } => {
                for task in &replacement_tasks {
                    if done.contains(&task.id) {
                        let _ = dispatched.ack.send(Err(MediatorError::ReplanConflict(task.id)));
                        return None;
                    }
                }
                let mut tasks: Vec<Task> = dag.tasks.values().filter(|t| !done.contains(&t.id)).cloned().collect();
                tasks.extend(replacement_tasks);
                *dag = TaskDag::from_tasks(tasks);
                let _ = dispatched.ack.send(Ok(()));
                Some(DrainOutcome::Replanned)
            }
        }
    }

    /// Runs a HIL or AIL gate for `task`, blocking until approved,
    /// rejected, replanned, or (AIL only) the auto-continue timeout fires.
    async fn run_gate(
        &self,
        dag_run_id: Uuid,
        task: &Task,
        command_rx: &mut mpsc::UnboundedReceiver<Dispatched>,
        state: &Arc<Mutex<ControlState>>,
        dag: &mut TaskDag,
        done: &HashSet<Uuid>,
    ) -> GateOutcome {
        if task.hil {
            *state.lock().await = ControlState::AwaitingHil;
            self.publish(Event::HilRequest {
                dag_run_id,
                task_id: task.id,
                prompt: format!("approve invocation of {:?}?", task.invocation),
            });
        } else {
            *state.lock().await = ControlState::AwaitingAil;
            self.publish(Event::AilGate {
                dag_run_id,
                task_id: task.id,
                rationale: format!("agent-in-the-loop review of {:?}", task.invocation),
            });
        }

        let wait = async {
            loop {
                let Some(dispatched) = command_rx.recv().await else { return GateOutcome::Abort };
                match dispatched.command {
                    ControlCommand::ApprovalResponse { task_id, approved } if task_id == task.id => {
                        let _ = dispatched.ack.send(Ok(()));
                        *state.lock().await = ControlState::Running;
                        return if approved { GateOutcome::Proceed } else { GateOutcome::Skip };
                    }
                    ControlCommand::Abort => {
                        let _ = dispatched.ack.send(Ok(()));
                        return GateOutcome::Abort;
                    }
                    ControlCommand::Replan { replacement_tasks } => {
                        for t in &replacement_tasks {
                            if done.contains(&t.id) {
                                let _ = dispatched.ack.send(Err(MediatorError::ReplanConflict(t.id)));
                                continue;
                            }
                        }
                        let mut tasks: Vec<Task> =
                            dag.tasks.values().filter(|t| !done.contains(&t.id)).cloned().collect();
                        tasks.extend(replacement_tasks);
                        *dag = TaskDag::from_tasks(tasks);
                        let _ = dispatched.ack.send(Ok(()));
                        *state.lock().await = ControlState::Running;
                        return GateOutcome::Replanned;
                    }
                    _ => {
                        let _ = dispatched.ack.send(Err(MediatorError::InvalidDagSpec(
                            "awaiting an approval response for this task".to_string(),
                        )));
                    }
                }
            }
        };

        if task.ail {
            match tokio::time::timeout(AIL_AUTO_CONTINUE, wait).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    *state.lock().await = ControlState::Running;
                    GateOutcome::Proceed
                }
            }
        } else {
            wait.await
        }
    }

    async fn execute_one(
        self: Arc<Self>,
        dag_run_id: Uuid,
        task_id: Uuid,
        dag: &TaskDag,
        group: Option<&crate::services::fusion::FusedGroup>,
        prior_outputs: &HashMap<Uuid, serde_json::Value>,
    ) -> Vec<ExecOutcome> {
        self.publish(Event::TaskStart { dag_run_id, task_id });
        let started = std::time::Instant::now();

        if let Some(group) = group {
            return self.execute_fused(dag_run_id, dag, group, prior_outputs, started).await;
        }

        let Some(task) = dag.tasks.get(&task_id) else {
            return vec![ExecOutcome { task_id, ok: false, output: None, error: Some("task vanished".into()), latency_ms: 0, fused: false }];
        };

        let arguments = match resolve(&task.arguments, prior_outputs) {
            Ok(v) => v,
            Err(err) => {
                return vec![ExecOutcome {
                    task_id,
                    ok: false,
                    output: None,
                    error: Some(err.to_string()),
                    latency_ms: started.elapsed().as_millis() as u64,
                    fused: false,
                }]
            }
        };

        let result = match &task.invocation {
            Invocation::Tool(tool_id) => self.invoke_tool(tool_id, arguments).await,
            Invocation::Capability(fqdn) => self.invoke_capability(fqdn, arguments).await,
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(value) => vec![ExecOutcome { task_id, ok: true, output: Some(value), error: None, latency_ms, fused: false }],
            Err(err) => vec![ExecOutcome { task_id, ok: false, output: None, error: Some(err.to_string()), latency_ms, fused: false }],
        }
    }

    async fn invoke_tool(&self, tool_id: &ToolId, arguments: serde_json::Value) -> MediatorResult<serde_json::Value> {
        let idempotent = self
            .tool_repository
            .get(tool_id)
            .await
            .ok()
            .flatten()
            .is_some_and(|tool| tool.idempotent);
        if idempotent {
            let max_retries = self.config.retry_max;
            let id = tool_id.clone();
            let endpoints = self.endpoints.clone();
            retry_idempotent(max_retries, move || {
                let id = id.clone();
                let endpoints = endpoints.clone();
                let arguments = arguments.clone();
                async move { endpoints.invoke(&id, arguments).await }
            })
            .await
        } else {
            self.endpoints.invoke(tool_id, arguments).await
        }
    }

    async fn invoke_capability(&self, fqdn: &crate::domain::models::Fqdn, arguments: serde_json::Value) -> MediatorResult<serde_json::Value> {
        let capability = self.capability_store.lookup(fqdn).await?;
        let started = std::time::Instant::now();
        let available_tools = capability_tool_ids(&capability);
        let outcome = self
            .sandbox
            .run(capability.code.clone(), arguments, &self.endpoints.as_map(), available_tools, self.sandbox_limits())
            .await;

        match outcome {
            Ok(result) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                let _ = self
                    .capability_store
                    .crystallize(
                        &capability.code,
                        capability.static_dag.clone(),
                        capability.intent_embedding.clone(),
                        "",
                        capability.pure,
                        capability.dependencies.clone(),
                        latency_ms,
                    )
                    .await;
                Ok(result.value.unwrap_or(serde_json::Value::Null))
            }
            Err(err) => {
                let _ = self.capability_store.record_failure(&capability.fqdn).await;
                Err(err)
            }
        }
    }

    async fn execute_fused(
        &self,
        dag_run_id: Uuid,
        dag: &TaskDag,
        group: &crate::services::fusion::FusedGroup,
        prior_outputs: &HashMap<Uuid, serde_json::Value>,
        started: std::time::Instant,
    ) -> Vec<ExecOutcome> {
        // The caller already published TaskStart for the chain head; the
        // rest of the chain runs as part of the same sandboxed call.
        for &member in &group.members[1..] {
            self.publish(Event::TaskStart { dag_run_id, task_id: member });
        }
        let program = group.program(dag);
        let available_tools: Vec<String> = program.steps.iter().map(|s| s.tool_id.clone()).collect();

        // Resolve the head step's arguments against already-known outputs
        // up front; intra-chain references resolve inside the sandbox
        // worker as each step completes.
        let mut program = program;
        if let Some(first) = program.steps.first_mut() {
            if let Ok(resolved) = resolve(&first.arguments, prior_outputs) {
                first.arguments = resolved;
            }
        }

        let result = self
            .sandbox
            .run(program.encode(), serde_json::Value::Null, &self.endpoints.as_map(), available_tools, self.sandbox_limits())
            .await;

        let latency_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(outcome) => {
                let mut entries: Vec<ExecOutcome> = group.members[..group.members.len() - 1]
                    .iter()
                    .map(|&id| ExecOutcome { task_id: id, ok: true, output: None, error: None, latency_ms: 0, fused: true })
                    .collect();
                if let Some(&last) = group.members.last() {
                    entries.push(ExecOutcome { task_id: last, ok: true, output: outcome.value, error: None, latency_ms, fused: true });
                }
                entries
            }
            Err(err) => group
                .members
                .iter()
                .map(|&id| ExecOutcome { task_id: id, ok: false, output: None, error: Some(err.to_string()), latency_ms, fused: true })
                .collect(),
        }
    }

    fn sandbox_limits(&self) -> crate::domain::models::SandboxLimits {
        crate::domain::models::SandboxLimits {
            max_wall_time_ms: self.config.default_task_timeout_ms,
            ..Default::default()
        }
    }

    /// Records a learned dependency edge from each of `task_id`'s
    /// dependencies to itself, for the hybrid-search hypergraph
    /// (`spec.md` §4.1).
    async fn record_edges(&self, dag: &TaskDag, task_id: Uuid) {
        let Some(task) = dag.tasks.get(&task_id) else { return };
        let Some(to) = search_target_of(task) else { return };
        for dep_id in &task.depends_on {
            let Some(dep) = dag.tasks.get(dep_id) else { continue };
            let Some(from) = search_target_of(dep) else { continue };
            let _ = self.edges.record_transition(from, to.clone()).await;
        }
    }
}

fn search_target_of(task: &Task) -> Option<SearchTarget> {
    match &task.invocation {
        Invocation::Tool(id) => Some(SearchTarget::Tool(id.to_string())),
        Invocation::Capability(fqdn) => Some(SearchTarget::Capability(fqdn.0.clone())),
    }
}

fn capability_tool_ids(capability: &Capability) -> Vec<String> {
    capability
        .static_dag
        .nodes
        .iter()
        .filter_map(|n| match &n.invocation {
            Invocation::Tool(id) => Some(id.to_string()),
            Invocation::Capability(_) => None,
        })
        .collect()
}

fn skipped_entry(task_id: Uuid) -> TaskTraceEntry {
    TaskTraceEntry {
        task_id,
        outcome: TaskOutcome::Skipped,
        output: None,
        error: None,
        latency_ms: 0,
        started_at: chrono::Utc::now(),
        completed_at: chrono::Utc::now(),
        fused: false,
    }
}

#[derive(Debug, Clone)]
struct ExecOutcome {
    task_id: Uuid,
    ok: bool,
    output: Option<serde_json::Value>,
    error: Option<String>,
    latency_ms: u64,
    fused: bool,
}

enum DrainOutcome {
    Abort,
    Replanned,
    Resumed,
}

enum GateOutcome {
    Proceed,
    Skip,
    Abort,
    Replanned,
}
