//! Gateway Facade (`spec.md` §6): the eight meta-operations an agent
//! drives the mediator through. Thin orchestration over the Hybrid
//! Search Engine, Planner, Controlled Executor, Capability Store,
//! Speculative Executor, and Sandbox Worker — this module owns no state
//! of its own beyond the handles to those services, mirroring the
//! teacher's `services::command_bus::CommandBus` role of routing a
//! request to the one service that actually knows how to handle it.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::{MediatorError, MediatorResult};
use crate::domain::models::{
    Checkpoint, Config, ControlState, Embedding, Event, Fqdn, SandboxLimits, Task, TaskDag,
};
use crate::domain::ports::{CheckpointRepository, EmbeddingProvider, TraceRepository};
use crate::infrastructure::sandbox::host::SandboxHost;
use crate::services::capability_store::CapabilityStore;
use crate::services::endpoint_pool::EndpointClientPool;
use crate::services::event_bus::EventBus;
use crate::services::executor::ControlledExecutor;
use crate::services::hybrid_search::HybridSearchEngine;
use crate::services::planner::{ExplicitTaskSpec, Plan, PlanOrigin, Planner, PlannerInput};
use crate::services::speculative_executor::SpeculativeExecutor;

const DEFAULT_SEARCH_K: usize = 10;
const DEFAULT_MIN_SCORE: f64 = 0.0;

/// `search_tools`/`search_capabilities` input (`spec.md` §6).
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub intent: String,
    pub k: Option<usize>,
    pub min_score: Option<f64>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolSearchHit {
    pub tool_id: String,
    pub score: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CapabilitySearchHit {
    pub fqdn: String,
    pub score: f64,
    pub reliability: f64,
}

/// What kind of DAG to run, and the gating options layered on top of it
/// (`spec.md` §6: `{ail_after_layer?, hil_tasks?, checkpoint?}`).
pub enum ExecuteDagRequest {
    Intent { text: String, k: Option<usize>, min_score: Option<f64> },
    Explicit { tasks: Vec<ExplicitTaskSpec> },
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteDagOptions {
    /// Ids of explicit-spec tasks to flag as requiring human approval.
    /// Meaningless (and ignored) for an intent-derived DAG, whose task
    /// ids aren't known to the caller ahead of planning.
    pub hil_tasks: Vec<Uuid>,
    /// Gate every task in this layer index behind agent-in-the-loop
    /// review once the layer is reached.
    pub ail_after_layer: Option<usize>,
    /// Accepted for API symmetry with `spec.md` §6; the executor always
    /// checkpoints after every layer regardless of this flag.
    pub checkpoint: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecuteDagOutcome {
    pub dag_run_id: Uuid,
    /// Set when the whole run was already resolved from the speculation
    /// cache and no executor run was started (`spec.md` §8 scenario 5).
    pub from_speculation_cache: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecuteCodeOutcome {
    pub result: Value,
    pub logs: Vec<String>,
    pub trace_id: Uuid,
    pub metrics: ExecuteCodeMetrics,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecuteCodeMetrics {
    pub wall_time_ms: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunStateSnapshot {
    pub dag_run_id: Uuid,
    pub control_state: ControlState,
}

pub struct Gateway {
    search: Arc<HybridSearchEngine>,
    planner: Arc<Planner>,
    executor: Arc<ControlledExecutor>,
    capability_store: Arc<CapabilityStore>,
    speculative: Arc<SpeculativeExecutor>,
    sandbox: Arc<SandboxHost>,
    endpoints: Arc<EndpointClientPool>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    checkpoints: Arc<dyn CheckpointRepository>,
    traces: Arc<dyn TraceRepository>,
    events: Arc<EventBus>,
    config: Config,
}

impl Gateway {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        search: Arc<HybridSearchEngine>,
        planner: Arc<Planner>,
        executor: Arc<ControlledExecutor>,
        capability_store: Arc<CapabilityStore>,
        speculative: Arc<SpeculativeExecutor>,
        sandbox: Arc<SandboxHost>,
        endpoints: Arc<EndpointClientPool>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        checkpoints: Arc<dyn CheckpointRepository>,
        traces: Arc<dyn TraceRepository>,
        events: Arc<EventBus>,
        config: Config,
    ) -> Self {
        Self {
            search,
            planner,
            executor,
            capability_store,
            speculative,
            sandbox,
            endpoints,
            embedding_provider,
            checkpoints,
            traces,
            events,
            config,
        }
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// `search_tools` (`spec.md` §6).
    pub async fn search_tools(&self, request: SearchRequest) -> MediatorResult<Vec<ToolSearchHit>> {
        let (k, min_score) = defaults(&request);
        let results = self.search.search(&request.intent, k, min_score).await?;
        Ok(results
            .into_iter()
            .filter_map(|r| match r.target {
                crate::domain::models::SearchTarget::Tool(tool_id) => {
                    Some(ToolSearchHit { tool_id, score: r.score, rationale: r.explanation })
                }
                crate::domain::models::SearchTarget::Capability(_) => None,
            })
            .collect())
    }

    /// `search_capabilities` (`spec.md` §6).
    pub async fn search_capabilities(&self, request: SearchRequest) -> MediatorResult<Vec<CapabilitySearchHit>> {
        let (k, min_score) = defaults(&request);
        let results = self.search.search(&request.intent, k, min_score).await?;
        let mut hits = Vec::new();
        for r in results {
            let crate::domain::models::SearchTarget::Capability(fqdn_str) = r.target else { continue };
            let fqdn = Fqdn(fqdn_str.clone());
            let reliability = self.capability_store.stats(&fqdn).await?.reliability_factor();
            hits.push(CapabilitySearchHit { fqdn: fqdn_str, score: r.score, reliability });
        }
        Ok(hits)
    }

    /// `execute_dag` (`spec.md` §6). Plans the requested DAG, applies the
    /// caller's gating options, and either serves it straight from the
    /// speculation cache (single pure-capability intent match, already
    /// primed by a previous identical call) or hands it to the
    /// [`ControlledExecutor`]. Either way a background speculative run is
    /// kicked off for next time.
    pub async fn execute_dag(&self, request: ExecuteDagRequest, options: ExecuteDagOptions) -> MediatorResult<ExecuteDagOutcome> {
        let plan = self.plan_for(request).await?;

        if let Some(outcome) = self.try_serve_from_cache(&plan).await? {
            return Ok(outcome);
        }

        self.prime_speculation(&plan).await;

        let dag = apply_gates(plan.dag, &plan.layers, &options);
        let dag_run_id = self.executor.execute_dag(dag, plan.intent).await?;
        Ok(ExecuteDagOutcome { dag_run_id, from_speculation_cache: false })
    }

    async fn plan_for(&self, request: ExecuteDagRequest) -> MediatorResult<Plan> {
        match request {
            ExecuteDagRequest::Intent { text, k, min_score } => {
                let k = k.unwrap_or(DEFAULT_SEARCH_K);
                let min_score = min_score.unwrap_or(DEFAULT_MIN_SCORE);
                let intent_vector = self.embedding_provider.embed(&text).await?;
                let intent_embedding = Embedding::new(intent_vector);
                let capability_match =
                    self.capability_store.try_match(&intent_embedding, self.config.search.capability_match_threshold).await?;
                self.planner.plan(PlannerInput::Intent { text, capability_match, k, min_score }).await
            }
            ExecuteDagRequest::Explicit { tasks } => self.planner.plan(PlannerInput::Explicit { tasks }).await,
        }
    }

    /// If `plan` is a single-task capability match and that capability is
    /// pure, checks whether the speculative executor already has a fresh
    /// result cached for it, returning it as a fully-resolved run with no
    /// executor work started (`spec.md` §8 scenario 5).
    async fn try_serve_from_cache(&self, plan: &Plan) -> MediatorResult<Option<ExecuteDagOutcome>> {
        if plan.origin != PlanOrigin::Capability || plan.dag.tasks.len() != 1 {
            return Ok(None);
        }
        let Some(task) = plan.dag.tasks.values().next() else { return Ok(None) };
        let crate::domain::models::Invocation::Capability(fqdn) = &task.invocation else { return Ok(None) };
        let capability = self.capability_store.lookup(fqdn).await?;
        if !capability.pure {
            return Ok(None);
        }

        let dag_run_id = Uuid::new_v4();
        if let Some(value) = self.speculative.take_cached(dag_run_id, task.id, fqdn, &task.arguments).await {
            self.events.publish(Event::DagStart { dag_run_id, task_count: 1 });
            self.events.publish(Event::TaskStart { dag_run_id, task_id: task.id });
            // take_cached has already published TaskEnd{source:"speculation_hit"}.
            let _ = value;
            self.events.publish(Event::DagEnd { dag_run_id, success: true });
            return Ok(Some(ExecuteDagOutcome { dag_run_id, from_speculation_cache: true }));
        }
        Ok(None)
    }

    /// Primes the speculation cache for a pure single-capability plan so a
    /// subsequent identical call can be served from cache.
    async fn prime_speculation(&self, plan: &Plan) {
        if plan.origin != PlanOrigin::Capability || plan.dag.tasks.len() != 1 {
            return;
        }
        let Some(task) = plan.dag.tasks.values().next() else { return };
        let crate::domain::models::Invocation::Capability(fqdn) = &task.invocation else { return };
        let Ok(capability) = self.capability_store.lookup(fqdn).await else { return };
        if !capability.pure {
            return;
        }
        self.speculative.speculate(fqdn.clone(), task.arguments.clone());
    }

    /// `execute_code` (`spec.md` §6). Runs `code` directly in the sandbox
    /// against `injected_tools`, then crystallizes it as a capability if
    /// it succeeds — the emergence path `spec.md` §8 scenario 4 exercises.
    pub async fn execute_code(
        &self,
        code: String,
        intent: Option<String>,
        injected_tools: Vec<String>,
    ) -> MediatorResult<ExecuteCodeOutcome> {
        let trace_id = Uuid::new_v4();
        let started = Instant::now();

        let outcome = self
            .sandbox
            .run(code.clone(), Value::Null, &self.endpoints.as_map(), injected_tools.clone(), SandboxLimits::default())
            .await?;

        let wall_time_ms = started.elapsed().as_millis() as u64;
        let result = outcome.value.clone().unwrap_or(Value::Null);

        let intent_text = intent.unwrap_or_default();
        let intent_vector = self.embedding_provider.embed(&intent_text).await?;

        // Ad-hoc code with no injected tools reaches no external resource
        // and so has no observable side effect — the same notion of
        // "pure" the speculative executor gates on.
        let pure = injected_tools.is_empty();
        let _ = self
            .capability_store
            .crystallize(
                &code,
                crate::domain::models::StaticDag::default(),
                Embedding::new(intent_vector),
                &intent_text,
                pure,
                vec![],
                wall_time_ms,
            )
            .await;

        Ok(ExecuteCodeOutcome {
            result,
            logs: outcome.logs,
            trace_id,
            metrics: ExecuteCodeMetrics { wall_time_ms },
        })
    }

    /// `continue` (`spec.md` §6).
    pub async fn continue_run(&self, dag_run_id: Uuid) -> MediatorResult<RunStateSnapshot> {
        self.executor.continue_run(dag_run_id).await?;
        self.snapshot(dag_run_id).await
    }

    /// `abort` (`spec.md` §6).
    pub async fn abort_run(&self, dag_run_id: Uuid) -> MediatorResult<RunStateSnapshot> {
        self.executor.abort_run(dag_run_id).await?;
        self.snapshot(dag_run_id).await
    }

    /// `replan` (`spec.md` §6).
    pub async fn replan(&self, dag_run_id: Uuid, amendment: Vec<Task>) -> MediatorResult<RunStateSnapshot> {
        self.executor.replan(dag_run_id, amendment).await?;
        self.snapshot(dag_run_id).await
    }

    /// `approval_response` (`spec.md` §6).
    pub async fn approval_response(&self, dag_run_id: Uuid, task_id: Uuid, approved: bool) -> MediatorResult<RunStateSnapshot> {
        self.executor.approval_response(dag_run_id, task_id, approved).await?;
        self.snapshot(dag_run_id).await
    }

    /// Read-only control-state lookup for a DAG run — unlike
    /// `continue_run`/`abort_run`/`replan`/`approval_response`, this
    /// dispatches no command to the executor, so it can be polled from
    /// any state (including `awaiting_hil` and after the run has
    /// terminated) without racing the executor's command channel.
    pub async fn snapshot(&self, dag_run_id: Uuid) -> MediatorResult<RunStateSnapshot> {
        let control_state = self
            .executor
            .control_state(dag_run_id)
            .await
            .ok_or_else(|| MediatorError::NotFound(format!("dag run {dag_run_id}")))?;
        Ok(RunStateSnapshot { dag_run_id, control_state })
    }

    /// Loads the most recent checkpoint for a DAG run — used by an
    /// operator-facing resume flow outside the eight meta-operations
    /// proper.
    pub async fn load_checkpoint(&self, dag_run_id: Uuid) -> MediatorResult<Option<Checkpoint>> {
        self.checkpoints.latest(dag_run_id).await
    }
}

fn defaults(request: &SearchRequest) -> (usize, f64) {
    (request.k.unwrap_or(DEFAULT_SEARCH_K), request.min_score.unwrap_or(DEFAULT_MIN_SCORE))
}

/// Applies `options`' `hil_tasks` and `ail_after_layer` onto `dag`'s
/// tasks, rebuilding it so the executor sees the gates from the start.
fn apply_gates(dag: TaskDag, layers: &[Vec<Uuid>], options: &ExecuteDagOptions) -> TaskDag {
    if options.hil_tasks.is_empty() && options.ail_after_layer.is_none() {
        return dag;
    }

    let ail_layer_tasks: std::collections::HashSet<Uuid> = options
        .ail_after_layer
        .and_then(|idx| layers.get(idx))
        .map(|layer| layer.iter().copied().collect())
        .unwrap_or_default();

    let tasks: Vec<Task> = dag
        .tasks
        .into_values()
        .map(|mut task| {
            if options.hil_tasks.contains(&task.id) {
                task.hil = true;
            }
            if ail_layer_tasks.contains(&task.id) {
                task.ail = true;
            }
            task
        })
        .collect();
    TaskDag::from_tasks(tasks)
}
