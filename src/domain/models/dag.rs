//! DAG domain models: runtime task graphs and the statically-extracted
//! graphs stored alongside a crystallized capability.
//!
//! Topological sort, cycle detection, execution-wave layering and
//! critical-path computation are graph-agnostic, so the shape of this
//! module follows the teacher's task DAG closely; only the node payload
//! changes, from swarm tasks to tool/capability invocations with
//! argument templates (`spec.md` §3, §4.3).

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::argument_template::find_refs;
use super::capability::Fqdn;
use super::tool::ToolId;

/// What a single DAG node invokes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Invocation {
    Tool(ToolId),
    Capability(Fqdn),
}

/// One node of a runtime execution DAG: a single tool or capability
/// invocation with its (possibly unresolved) argument template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub invocation: Invocation,
    /// Argument JSON, whose strings may contain `$OUTPUT[...]` references.
    pub arguments: Value,
    pub depends_on: Vec<Uuid>,
    /// If true, the whole DAG fails when this task fails; if false, the
    /// task is best-effort and failure does not abort the run (`spec.md` §4.3).
    pub required: bool,
    /// Requires a human-in-the-loop approval gate before execution.
    pub hil: bool,
    /// Requires an agent-in-the-loop approval gate before execution.
    pub ail: bool,
    pub timeout_ms: Option<u64>,
}

impl Task {
    #[must_use]
    pub fn new(invocation: Invocation, arguments: Value) -> Self {
        let depends_on = find_refs(&arguments)
            .into_iter()
            .map(|r| r.task_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        Self {
            id: Uuid::new_v4(),
            invocation,
            arguments,
            depends_on,
            required: true,
            hil: false,
            ail: false,
            timeout_ms: None,
        }
    }
}

/// A node in the DAG adjacency structure.
#[derive(Debug, Clone)]
pub struct DagNode {
    pub task_id: Uuid,
    pub dependencies: Vec<Uuid>,
    pub dependents: Vec<Uuid>,
}

impl DagNode {
    fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            dependencies: task.depends_on.clone(),
            dependents: vec![],
        }
    }

    fn is_ready(&self, completed: &HashSet<Uuid>) -> bool {
        self.dependencies.iter().all(|dep| completed.contains(dep))
    }
}

/// A runtime execution DAG: the set of tasks belonging to one `execute_dag`
/// invocation, plus the adjacency structure derived from their argument
/// templates.
#[derive(Debug, Clone)]
pub struct TaskDag {
    pub tasks: HashMap<Uuid, Task>,
    nodes: HashMap<Uuid, DagNode>,
    pub roots: Vec<Uuid>,
    pub leaves: Vec<Uuid>,
}

impl TaskDag {
    #[must_use]
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        let mut nodes: HashMap<Uuid, DagNode> = HashMap::new();
        let mut has_dependents: HashSet<Uuid> = HashSet::new();

        for task in &tasks {
            nodes.insert(task.id, DagNode::from_task(task));
        }

        for task in &tasks {
            for dep_id in &task.depends_on {
                if let Some(dep_node) = nodes.get_mut(dep_id) {
                    dep_node.dependents.push(task.id);
                    has_dependents.insert(*dep_id);
                }
            }
        }

        let roots: Vec<Uuid> = nodes
            .iter()
            .filter(|(_, node)| {
                node.dependencies.is_empty() || node.dependencies.iter().all(|d| !nodes.contains_key(d))
            })
            .map(|(id, _)| *id)
            .collect();

        let leaves: Vec<Uuid> = nodes
            .iter()
            .filter(|(id, _)| !has_dependents.contains(id))
            .map(|(id, _)| *id)
            .collect();

        let tasks_by_id = tasks.into_iter().map(|t| (t.id, t)).collect();

        Self { tasks: tasks_by_id, nodes, roots, leaves }
    }

    #[must_use]
    pub fn has_cycle(&self) -> bool {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        self.nodes
            .keys()
            .any(|&id| self.detect_cycle_dfs(id, &mut visited, &mut rec_stack))
    }

    fn detect_cycle_dfs(&self, node_id: Uuid, visited: &mut HashSet<Uuid>, rec_stack: &mut HashSet<Uuid>) -> bool {
        if rec_stack.contains(&node_id) {
            return true;
        }
        if visited.contains(&node_id) {
            return false;
        }

        visited.insert(node_id);
        rec_stack.insert(node_id);

        if let Some(node) = self.nodes.get(&node_id) {
            for &dep in &node.dependents {
                if self.detect_cycle_dfs(dep, visited, rec_stack) {
                    return true;
                }
            }
        }

        rec_stack.remove(&node_id);
        false
    }

    pub fn topological_sort(&self) -> Result<Vec<Uuid>, DagError> {
        if self.has_cycle() {
            return Err(DagError::CycleDetected);
        }

        let mut result = Vec::new();
        let mut in_degree: HashMap<Uuid, usize> = HashMap::new();
        let mut queue = VecDeque::new();

        for (id, node) in &self.nodes {
            let deps_in_dag = node.dependencies.iter().filter(|d| self.nodes.contains_key(d)).count();
            in_degree.insert(*id, deps_in_dag);
        }

        for (&id, &degree) in &in_degree {
            if degree == 0 {
                queue.push_back(id);
            }
        }

        while let Some(node_id) = queue.pop_front() {
            result.push(node_id);
            if let Some(node) = self.nodes.get(&node_id) {
                for &dependent in &node.dependents {
                    if let Some(degree) = in_degree.get_mut(&dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(dependent);
                        }
                    }
                }
            }
        }

        if result.len() != self.nodes.len() {
            return Err(DagError::CycleDetected);
        }

        Ok(result)
    }

    /// Groups tasks into waves of mutually-independent work for parallel
    /// dispatch (`spec.md` §4.3 "execution waves").
    pub fn execution_waves(&self) -> Result<Vec<Vec<Uuid>>, DagError> {
        if self.has_cycle() {
            return Err(DagError::CycleDetected);
        }

        let mut waves = Vec::new();
        let mut remaining: HashSet<Uuid> = self.nodes.keys().copied().collect();
        let mut completed: HashSet<Uuid> = HashSet::new();

        while !remaining.is_empty() {
            let wave: Vec<Uuid> = remaining
                .iter()
                .filter(|id| self.nodes.get(id).is_some_and(|n| n.is_ready(&completed)))
                .copied()
                .collect();

            if wave.is_empty() {
                return Err(DagError::CycleDetected);
            }

            for id in &wave {
                remaining.remove(id);
                completed.insert(*id);
            }

            waves.push(wave);
        }

        Ok(waves)
    }

    pub fn critical_path(&self) -> Result<Vec<Uuid>, DagError> {
        let sorted = self.topological_sort()?;
        let mut distances: HashMap<Uuid, usize> = HashMap::new();
        let mut predecessors: HashMap<Uuid, Option<Uuid>> = HashMap::new();

        for &id in &sorted {
            distances.insert(id, 0);
            predecessors.insert(id, None);
        }

        for &node_id in &sorted {
            if let Some(node) = self.nodes.get(&node_id) {
                let current_dist = *distances.get(&node_id).unwrap_or(&0);
                for &dependent in &node.dependents {
                    let new_dist = current_dist + 1;
                    if new_dist > *distances.get(&dependent).unwrap_or(&0) {
                        distances.insert(dependent, new_dist);
                        predecessors.insert(dependent, Some(node_id));
                    }
                }
            }
        }

        let end_node = distances.iter().max_by_key(|&(_, &dist)| dist).map(|(&id, _)| id);

        if let Some(mut current) = end_node {
            let mut path = vec![current];
            while let Some(&Some(pred)) = predecessors.get(&current) {
                path.push(pred);
                current = pred;
            }
            path.reverse();
            Ok(path)
        } else {
            Ok(vec![])
        }
    }

    #[must_use]
    pub fn stats(&self) -> DagStats {
        let waves = self.execution_waves().unwrap_or_default();
        let critical = self.critical_path().unwrap_or_default();
        DagStats {
            total_nodes: self.nodes.len(),
            root_count: self.roots.len(),
            leaf_count: self.leaves.len(),
            wave_count: waves.len(),
            max_parallelism: waves.iter().map(Vec::len).max().unwrap_or(0),
            critical_path_length: critical.len(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DagStats {
    pub total_nodes: usize,
    pub root_count: usize,
    pub leaf_count: usize,
    pub wave_count: usize,
    pub max_parallelism: usize,
    pub critical_path_length: usize,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DagError {
    #[error("cycle detected in task dependencies")]
    CycleDetected,
    #[error("missing dependency: {0}")]
    MissingDependency(Uuid),
}

/// A single node of a capability's statically-extracted DAG: no
/// concrete task id, just the invocation shape and an index-based
/// dependency list, so the same [`StaticDag`] can be instantiated into
/// fresh [`Task`]s (with fresh UUIDs) on every invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticTaskNode {
    pub invocation: Invocation,
    pub argument_template: Value,
    /// Indices into the owning `StaticDag::nodes` vec.
    pub depends_on: Vec<usize>,
    pub required: bool,
}

/// The DAG extracted by static analysis of a capability's code at
/// crystallization time (`spec.md` §4.2), stored alongside the
/// capability so `execute_dag` can replay it without re-deriving
/// structure from the sandboxed code on every call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticDag {
    pub nodes: Vec<StaticTaskNode>,
}

impl StaticDag {
    /// Instantiates fresh [`Task`]s (with new UUIDs) from this static
    /// shape, for execution as part of a concrete run.
    #[must_use]
    pub fn instantiate(&self) -> Vec<Task> {
        let ids: Vec<Uuid> = self.nodes.iter().map(|_| Uuid::new_v4()).collect();
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| Task {
                id: ids[i],
                invocation: node.invocation.clone(),
                arguments: node.argument_template.clone(),
                depends_on: node.depends_on.iter().map(|&dep_idx| ids[dep_idx]).collect(),
                required: node.required,
                hil: false,
                ail: false,
                timeout_ms: None,
            })
            .collect()
    }
}
