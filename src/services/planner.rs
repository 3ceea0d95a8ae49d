//! DAG Planner (`spec.md` §4.3, "Planner").
//!
//! Builds a runtime [`TaskDag`] either from an intent — hybrid search
//! selects tools and capabilities, and a pre-resolved capability match
//! short-circuits straight to instantiating that capability's static DAG
//! — or from an explicit spec, validated for acyclicity the way the
//! teacher's `services::dag_builder::DAGBuilder::add_edge` rejects an
//! edge that would close a cycle. The greedy argument-inference step and
//! the lowest-support cycle-edge drop have no teacher counterpart (the
//! teacher's DAGs are human-authored, not schema-matched), so both are
//! built fresh against the domain model already in place.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::errors::{MediatorError, MediatorResult};
use crate::domain::models::{Capability, Invocation, SearchTarget, Task, TaskDag};
use crate::domain::ports::{DependencyEdgeRepository, ToolRepository};
use crate::services::hybrid_search::HybridSearchEngine;

/// Where a [`Plan`]'s DAG came from (`spec.md` §3 DAG metadata).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOrigin {
    Suggested,
    Explicit,
    Capability,
}

/// One task of an explicit DAG spec, before ids are assigned.
#[derive(Debug, Clone)]
pub struct ExplicitTaskSpec {
    /// Caller-supplied id, so other tasks in the same spec can reference
    /// it in `depends_on`; a fresh id is minted if omitted.
    pub id: Option<Uuid>,
    pub invocation: Invocation,
    pub arguments: Value,
    pub depends_on: Vec<Uuid>,
    pub required: bool,
    pub hil: bool,
    pub ail: bool,
    pub timeout_ms: Option<u64>,
}

/// Planner input: an intent to search and greedily assemble, or a fully
/// explicit task graph (`spec.md` §4.3 "Inputs").
pub enum PlannerInput {
    Intent {
        text: String,
        /// A capability already matched against the intent (e.g. by the
        /// Gateway calling `CapabilityStore::try_match` up front). When
        /// present the planner skips hybrid search entirely.
        capability_match: Option<Capability>,
        k: usize,
        min_score: f64,
    },
    Explicit {
        tasks: Vec<ExplicitTaskSpec>,
    },
}

/// The planner's output: a runtime DAG plus its topological layering
/// (`spec.md` §4.3 "Output" — "Layer k contains all tasks whose deepest
/// dependency lives in layer k-1", exactly what [`TaskDag::execution_waves`]
/// already computes).
#[derive(Debug, Clone)]
pub struct Plan {
    pub dag: TaskDag,
    pub origin: PlanOrigin,
    pub intent: Option<String>,
    pub layers: Vec<Vec<Uuid>>,
}

pub struct Planner {
    search: Arc<HybridSearchEngine>,
    tool_repository: Arc<dyn ToolRepository>,
    edge_repository: Arc<dyn DependencyEdgeRepository>,
}

impl Planner {
    #[must_use]
    pub fn new(
        search: Arc<HybridSearchEngine>,
        tool_repository: Arc<dyn ToolRepository>,
        edge_repository: Arc<dyn DependencyEdgeRepository>,
    ) -> Self {
        Self { search, tool_repository, edge_repository }
    }

    pub async fn plan(&self, input: PlannerInput) -> MediatorResult<Plan> {
        match input {
            PlannerInput::Explicit { tasks } => self.plan_explicit(tasks),
            PlannerInput::Intent { text, capability_match, k, min_score } => {
                self.plan_intent(text, capability_match, k, min_score).await
            }
        }
    }

    /// Validates an explicit spec: every `depends_on` id must resolve
    /// within the same spec, and the resulting graph must be acyclic
    /// (Kahn's algorithm, via [`TaskDag::topological_sort`]).
    fn plan_explicit(&self, specs: Vec<ExplicitTaskSpec>) -> MediatorResult<Plan> {
        if specs.is_empty() {
            return Err(MediatorError::InvalidDagSpec("explicit DAG spec must contain at least one task".to_string()));
        }

        let ids: Vec<Uuid> = specs.iter().map(|s| s.id.unwrap_or_else(Uuid::new_v4)).collect();
        let known: HashSet<Uuid> = ids.iter().copied().collect();

        let mut tasks = Vec::with_capacity(specs.len());
        for (spec, id) in specs.into_iter().zip(ids) {
            for dep in &spec.depends_on {
                if !known.contains(dep) {
                    return Err(MediatorError::InvalidDagSpec(format!(
                        "task {id} depends on unknown task {dep}"
                    )));
                }
            }
            tasks.push(Task {
                id,
                invocation: spec.invocation,
                arguments: spec.arguments,
                depends_on: spec.depends_on,
                required: spec.required,
                hil: spec.hil,
                ail: spec.ail,
                timeout_ms: spec.timeout_ms,
            });
        }

        let dag = TaskDag::from_tasks(tasks);
        if dag.has_cycle() {
            return Err(MediatorError::CyclicDag("explicit DAG spec contains a cycle".to_string()));
        }
        let layers = dag.execution_waves().map_err(|e| MediatorError::CyclicDag(e.to_string()))?;
        Ok(Plan { dag, origin: PlanOrigin::Explicit, intent: None, layers })
    }

    async fn plan_intent(
        &self,
        text: String,
        capability_match: Option<Capability>,
        k: usize,
        min_score: f64,
    ) -> MediatorResult<Plan> {
        if let Some(capability) = capability_match {
            let tasks = capability.static_dag.instantiate();
            let dag = TaskDag::from_tasks(tasks);
            let layers = dag.execution_waves().map_err(|e| MediatorError::CyclicDag(e.to_string()))?;
            return Ok(Plan { dag, origin: PlanOrigin::Capability, intent: Some(text), layers });
        }

        let results = self.search.search(&text, k, min_score).await?;

        // Greedily build one task per result, inferring an argument
        // template by matching a later tool's input-schema property names
        // against an earlier tool's declared output-schema property names
        // (`spec.md` §4.3: "infer argument template by matching prior task
        // outputs' declared schemas against the tool's input schema").
        let mut tasks: Vec<Task> = Vec::with_capacity(results.len());
        let mut upstream_outputs: Vec<(Uuid, Value)> = Vec::new();

        for result in &results {
            match &result.target {
                SearchTarget::Tool(tool_id_str) => {
                    let tool_id = crate::domain::models::ToolId(tool_id_str.clone());
                    let Some(tool) = self.tool_repository.get(&tool_id).await? else { continue };

                    let arguments = infer_arguments(&tool.input_schema, &upstream_outputs);
                    let task = Task::new(Invocation::Tool(tool_id), arguments);
                    upstream_outputs.push((task.id, tool.output_schema.clone()));
                    tasks.push(task);
                }
                SearchTarget::Capability(fqdn_str) => {
                    let fqdn = crate::domain::models::Fqdn(fqdn_str.clone());
                    let task = Task::new(Invocation::Capability(fqdn), json!({}));
                    tasks.push(task);
                }
            }
        }

        let mut dag = TaskDag::from_tasks(tasks);
        self.break_cycles(&mut dag).await?;
        let layers = dag.execution_waves().map_err(|e| MediatorError::CyclicDag(e.to_string()))?;
        Ok(Plan { dag, origin: PlanOrigin::Suggested, intent: Some(text), layers })
    }

    /// Repeatedly finds a cycle and drops the lowest-prior-support edge
    /// along it, until the graph is acyclic (`spec.md` §4.3 "Detect
    /// cycles; if found, drop the edge with lowest prior-success support").
    async fn break_cycles(&self, dag: &mut TaskDag) -> MediatorResult<()> {
        let edges = self.edge_repository.all_edges().await?;
        let support_between = |upstream: &SearchTarget, downstream: &SearchTarget| -> u32 {
            edges.iter().find(|e| &e.from == upstream && &e.to == downstream).map_or(0, |e| e.support)
        };

        let mut guard = 0usize;
        while dag.has_cycle() {
            guard += 1;
            if guard > dag.tasks.len() + 1 {
                return Err(MediatorError::CyclicDag(
                    "could not resolve cycle by dropping lowest-support edges".to_string(),
                ));
            }

            let Some(cycle) = find_cycle(&dag.tasks) else { break };

            // cycle[i] depends_on cycle[i + 1]; find the weakest such pair.
            let mut weakest: Option<(Uuid, Uuid, u32)> = None;
            for pair in cycle.windows(2) {
                let (dependent, dependency) = (pair[0], pair[1]);
                let Some(dependent_task) = dag.tasks.get(&dependent) else { continue };
                let Some(dependency_task) = dag.tasks.get(&dependency) else { continue };
                let support =
                    support_between(&target_of(dependency_task), &target_of(dependent_task));
                if weakest.is_none_or(|(_, _, best)| support < best) {
                    weakest = Some((dependent, dependency, support));
                }
            }

            let Some((dependent, dependency, _)) = weakest else { break };
            let mut tasks: Vec<Task> = dag.tasks.values().cloned().collect();
            if let Some(task) = tasks.iter_mut().find(|t| t.id == dependent) {
                task.depends_on.retain(|&d| d != dependency);
            }
            *dag = TaskDag::from_tasks(tasks);
        }

        Ok(())
    }
}

fn target_of(task: &Task) -> SearchTarget {
    match &task.invocation {
        Invocation::Tool(id) => SearchTarget::Tool(id.0.clone()),
        Invocation::Capability(fqdn) => SearchTarget::Capability(fqdn.0.clone()),
    }
}

/// Builds an argument template for `input_schema` by pointing each
/// property at the most recently produced upstream output declaring the
/// same property name, via an `$OUTPUT[task_id].field` reference.
fn infer_arguments(input_schema: &Value, upstream_outputs: &[(Uuid, Value)]) -> Value {
    let mut arguments = serde_json::Map::new();
    let Some(properties) = input_schema.get("properties").and_then(Value::as_object) else {
        return Value::Object(arguments);
    };

    for property_name in properties.keys() {
        let matched = upstream_outputs.iter().rev().find(|(_, schema)| {
            schema
                .get("properties")
                .and_then(Value::as_object)
                .is_some_and(|props| props.contains_key(property_name))
        });
        if let Some((task_id, _)) = matched {
            arguments.insert(property_name.clone(), Value::String(format!("$OUTPUT[{task_id}].{property_name}")));
        }
    }

    Value::Object(arguments)
}

/// DFS cycle finder returning one full cycle as a sequence of task ids
/// `[a, b, ..., a]` where each task depends on the next, or `None` if the
/// graph is acyclic.
fn find_cycle(tasks: &HashMap<Uuid, Task>) -> Option<Vec<Uuid>> {
    let mut color: HashMap<Uuid, u8> = HashMap::new();
    let mut stack: Vec<Uuid> = Vec::new();
    let mut result: Option<Vec<Uuid>> = None;

    for &start in tasks.keys() {
        if result.is_some() {
            break;
        }
        if color.get(&start).copied().unwrap_or(0) == 0 {
            visit(start, tasks, &mut color, &mut stack, &mut result);
        }
    }

    result
}

fn visit(
    id: Uuid,
    tasks: &HashMap<Uuid, Task>,
    color: &mut HashMap<Uuid, u8>,
    stack: &mut Vec<Uuid>,
    result: &mut Option<Vec<Uuid>>,
) {
    if result.is_some() {
        return;
    }
    color.insert(id, 1);
    stack.push(id);

    if let Some(task) = tasks.get(&id) {
        for &dep in &task.depends_on {
            if result.is_some() {
                return;
            }
            match color.get(&dep).copied().unwrap_or(0) {
                1 => {
                    let start_idx = stack.iter().position(|&x| x == dep).unwrap_or(0);
                    let mut cycle = stack[start_idx..].to_vec();
                    cycle.push(dep);
                    *result = Some(cycle);
                    return;
                }
                0 => visit(dep, tasks, color, stack, result),
                _ => {}
            }
        }
    }

    stack.pop();
    color.insert(id, 2);
}
