//! DAG execution-wave layering benchmarks.
//!
//! Run with: cargo bench --bench dag_layering

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use uuid::Uuid;

use casys_pml::domain::models::{Invocation, Task, TaskDag, ToolId};

/// Builds a DAG of `width` independent fan-out chains, each `depth` tasks
/// long, the shape `execution_waves` has to flatten into layers.
fn build_dag(width: usize, depth: usize) -> TaskDag {
    let mut tasks = Vec::with_capacity(width * depth);
    for chain in 0..width {
        let mut previous: Option<Uuid> = None;
        for level in 0..depth {
            let mut task = Task::new(
                Invocation::Tool(ToolId::new("bench", &format!("op_{chain}_{level}"))),
                json!({"chain": chain, "level": level}),
            );
            if let Some(dep) = previous {
                task.depends_on = vec![dep];
            }
            previous = Some(task.id);
            tasks.push(task);
        }
    }
    TaskDag::from_tasks(tasks)
}

fn bench_execution_waves(c: &mut Criterion) {
    let mut group = c.benchmark_group("dag_layering");

    for (width, depth) in [(4, 10), (16, 50), (64, 100)] {
        let dag = build_dag(width, depth);
        group.bench_with_input(BenchmarkId::from_parameter(format!("{width}x{depth}")), &dag, |b, dag| {
            b.iter(|| dag.execution_waves().unwrap());
        });
    }

    group.finish();
}

fn bench_critical_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("dag_critical_path");

    for (width, depth) in [(4, 10), (16, 50)] {
        let dag = build_dag(width, depth);
        group.bench_with_input(BenchmarkId::from_parameter(format!("{width}x{depth}")), &dag, |b, dag| {
            b.iter(|| dag.critical_path().unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_execution_waves, bench_critical_path);
criterion_main!(benches);
