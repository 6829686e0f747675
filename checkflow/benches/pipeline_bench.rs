//! Benchmarks for recovery planning and in-memory execution.

use checkflow::core::StageResult;
use checkflow::pipeline::{ForceRerun, Pipeline, PipelineBuilder, RecoveryPlanner, StageGraph};
use checkflow::stages::NoOpStage;
use checkflow::store::{ArtifactStore, InMemoryArtifactStore};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A layered graph: each stage depends on every stage of the previous layer.
fn layered_graph(layers: usize, width: usize) -> StageGraph {
    let mut builder = PipelineBuilder::new("bench");
    for layer in 0..layers {
        for i in 0..width {
            let deps: Vec<String> = if layer == 0 {
                Vec::new()
            } else {
                (0..width).map(|j| format!("s{}_{j}", layer - 1)).collect()
            };
            let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
            builder = builder
                .stage(format!("s{layer}_{i}"), Arc::new(NoOpStage), &deps)
                .unwrap();
        }
    }
    builder.build().unwrap()
}

fn planning_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let graph = layered_graph(10, 10);
    let store = Arc::new(InMemoryArtifactStore::new());
    runtime.block_on(async {
        for name in graph.stage_names().iter().take(50) {
            store.put(&StageResult::success("r1", name, serde_json::Value::Null)).await.unwrap();
        }
    });
    let planner = RecoveryPlanner::new(store);

    c.bench_function("plan_100_stages_half_checkpointed", |b| {
        b.iter(|| {
            runtime
                .block_on(planner.plan("r1", black_box(&graph), &ForceRerun::None))
                .unwrap()
        });
    });

    c.bench_function("topological_order_100_stages", |b| {
        b.iter(|| black_box(&graph).topological_order().unwrap());
    });
}

fn execution_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("run_25_noop_stages_in_memory", |b| {
        b.iter(|| {
            let pipeline = Pipeline::new(layered_graph(5, 5), Arc::new(InMemoryArtifactStore::new()));
            runtime.block_on(pipeline.run("bench-run", BTreeMap::new())).unwrap()
        });
    });
}

criterion_group!(benches, planning_benchmark, execution_benchmark);
criterion_main!(benches);
