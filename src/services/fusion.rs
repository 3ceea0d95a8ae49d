//! Task Fusion (`spec.md` §4.3): collapsing a maximal run of same-endpoint
//! tasks into one sandboxed invocation instead of one bridge round trip
//! per task, the way the teacher's planner collapses adjacent
//! `DagNode`s that share a substrate into a single batched call before
//! handing the DAG to `DagExecutor`.
//!
//! A run of tasks `t1 -> t2 -> ... -> tn` fuses when all of the
//! following hold:
//!
//! - every task invokes a [`Invocation::Tool`] against the *same*
//!   endpoint (`ToolId::server`);
//! - every task after `t1` depends on exactly one task, and that task
//!   is its immediate predecessor in the run;
//! - no task in the run has `hil` or `ail` set;
//! - no task's output is referenced by more than one downstream
//!   reference anywhere in the *whole* DAG (fusing a fan-out source
//!   would hide its other consumers from the checkpoint/trace layer).

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::domain::models::{find_refs, FusionProgram, FusionStep, Invocation, Task, TaskDag};

/// A maximal same-endpoint chain eligible to run as one sandboxed
/// invocation instead of `members.len()` separate ones.
#[derive(Debug, Clone)]
pub struct FusedGroup {
    pub endpoint: String,
    /// Task ids in execution order, first to last.
    pub members: Vec<Uuid>,
}

impl FusedGroup {
    #[must_use]
    pub fn program(&self, dag: &TaskDag) -> FusionProgram {
        let steps = self
            .members
            .iter()
            .filter_map(|id| {
                let task = dag.tasks.get(id)?;
                let Invocation::Tool(tool_id) = &task.invocation else { return None };
                Some(FusionStep { task_id: task.id, tool_id: tool_id.to_string(), arguments: task.arguments.clone() })
            })
            .collect();
        FusionProgram { steps }
    }
}

/// Counts, across the whole DAG, how many distinct downstream tasks
/// reference each task's output (a task referenced twice by the same
/// downstream task's arguments still counts once: fusion cares whether
/// more than one *consumer* exists, not how many references it makes).
fn reference_counts(dag: &TaskDag) -> HashMap<Uuid, usize> {
    let mut referenced_by: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
    for task in dag.tasks.values() {
        for reference in find_refs(&task.arguments) {
            referenced_by.entry(reference.task_id).or_default().insert(task.id);
        }
    }
    referenced_by.into_iter().map(|(id, consumers)| (id, consumers.len())).collect()
}

fn endpoint_of(task: &Task) -> Option<&str> {
    match &task.invocation {
        Invocation::Tool(tool_id) => Some(tool_id.server()),
        Invocation::Capability(_) => None,
    }
}

/// Finds every maximal fusable chain in `dag`. Singleton tasks (chains
/// of length 1) are never returned — fusion only matters for runs of
/// two or more, where it actually removes a bridge round trip.
#[must_use]
pub fn find_fusable_groups(dag: &TaskDag) -> Vec<FusedGroup> {
    let ref_counts = reference_counts(dag);
    let mut fused: HashSet<Uuid> = HashSet::new();
    let mut groups = Vec::new();

    let Ok(order) = dag.topological_sort() else { return Vec::new() };

    for &start_id in &order {
        if fused.contains(&start_id) {
            continue;
        }
        let Some(start_task) = dag.tasks.get(&start_id) else { continue };
        let Some(endpoint) = endpoint_of(start_task) else { continue };
        if start_task.hil || start_task.ail {
            continue;
        }

        let mut chain = vec![start_id];
        let mut current = start_id;

        loop {
            let dependents: Vec<Uuid> = dag
                .tasks
                .values()
                .filter(|t| t.depends_on == vec![current])
                .map(|t| t.id)
                .collect();

            // A branch point (more than one single-dependency follower)
            // cannot be extended unambiguously; stop the chain here.
            let [next_id] = dependents[..] else { break };

            let Some(next_task) = dag.tasks.get(&next_id) else { break };
            if next_task.hil || next_task.ail {
                break;
            }
            if endpoint_of(next_task) != Some(endpoint) {
                break;
            }
            if fused.contains(&next_id) {
                break;
            }
            if ref_counts.get(&current).copied().unwrap_or(0) > 1 {
                break;
            }

            chain.push(next_id);
            current = next_id;
        }

        if chain.len() > 1 {
            // The last member's output may still be read by more than
            // one downstream consumer outside the chain; that's fine,
            // it just means the chain can't extend further — already
            // enforced by the loop condition for every link *inside*
            // the chain.
            for id in &chain {
                fused.insert(*id);
            }
            groups.push(FusedGroup { endpoint: endpoint.to_string(), members: chain });
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ToolId;
    use serde_json::json;

    fn tool_task(server: &str, name: &str, depends_on: Vec<Uuid>) -> Task {
        Task {
            id: Uuid::new_v4(),
            invocation: Invocation::Tool(ToolId::new(server, name)),
            arguments: json!({}),
            depends_on,
            required: true,
            hil: false,
            ail: false,
            timeout_ms: None,
        }
    }

    #[test]
    fn linear_same_endpoint_chain_fuses() {
        let t1 = tool_task("files", "list", vec![]);
        let t2 = tool_task("files", "read", vec![t1.id]);
        let t3 = tool_task("files", "grep", vec![t2.id]);
        let dag = TaskDag::from_tasks(vec![t1.clone(), t2.clone(), t3.clone()]);

        let groups = find_fusable_groups(&dag);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members, vec![t1.id, t2.id, t3.id]);
        assert_eq!(groups[0].endpoint, "files");
    }

    #[test]
    fn different_endpoints_do_not_fuse() {
        let t1 = tool_task("files", "list", vec![]);
        let t2 = tool_task("github", "open_issue", vec![t1.id]);
        let dag = TaskDag::from_tasks(vec![t1, t2]);

        assert!(find_fusable_groups(&dag).is_empty());
    }

    #[test]
    fn hil_gated_task_breaks_the_chain() {
        let t1 = tool_task("files", "list", vec![]);
        let mut t2 = tool_task("files", "delete", vec![t1.id]);
        t2.hil = true;
        let t3 = tool_task("files", "report", vec![t2.id]);
        let dag = TaskDag::from_tasks(vec![t1, t2, t3]);

        assert!(find_fusable_groups(&dag).is_empty());
    }

    #[test]
    fn fan_out_source_does_not_fuse_past_its_first_consumer() {
        let t1 = tool_task("files", "list", vec![]);
        let t2 = tool_task("files", "read_a", vec![t1.id]);
        let t3 = tool_task("files", "read_b", vec![t1.id]);
        let dag = TaskDag::from_tasks(vec![t1, t2, t3]);

        // t1 has two single-dependency followers, so it is a branch
        // point: no chain extends past it.
        assert!(find_fusable_groups(&dag).is_empty());
    }

    #[test]
    fn multi_consumer_output_stops_the_chain_before_it() {
        let t1 = tool_task("files", "list", vec![]);
        let mut t2 = tool_task("files", "read", vec![t1.id]);
        t2.arguments = json!({ "path": format!("$OUTPUT[{}].path", t1.id) });
        // A third, unrelated task also reads t1's output, so t1 must
        // not be folded silently into a t1->t2 fusion.
        let mut t3 = tool_task("github", "open_issue", vec![]);
        t3.arguments = json!({ "title": format!("$OUTPUT[{}]", t1.id) });
        let dag = TaskDag::from_tasks(vec![t1, t2, t3]);

        assert!(find_fusable_groups(&dag).is_empty());
    }

    #[test]
    fn program_preserves_argument_templates() {
        let t1 = tool_task("files", "list", vec![]);
        let mut t2 = tool_task("files", "read", vec![t1.id]);
        t2.arguments = json!({ "path": format!("$OUTPUT[{}].path", t1.id) });
        let dag = TaskDag::from_tasks(vec![t1.clone(), t2.clone()]);

        let groups = find_fusable_groups(&dag);
        let program = groups[0].program(&dag);
        assert_eq!(program.steps.len(), 2);
        assert_eq!(program.steps[1].arguments, t2.arguments);
    }
}
