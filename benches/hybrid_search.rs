//! Hybrid Search Engine benchmarks.
//!
//! Run with: cargo bench --bench hybrid_search

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

use casys_pml::domain::models::{Embedding, Tool, ToolEmbedding};
use casys_pml::domain::ports::{EmbeddingProvider, ToolRepository};
use casys_pml::infrastructure::embedding::NullEmbeddingProvider;
use casys_pml::infrastructure::storage::{
    create_test_pool, SqliteCapabilityRepository, SqliteDependencyEdgeRepository, SqliteToolRepository,
};
use casys_pml::services::hybrid_search::HybridSearchEngine;

async fn seeded_engine(tool_count: usize) -> HybridSearchEngine {
    let pool = create_test_pool().await.unwrap();
    let tool_repository = Arc::new(SqliteToolRepository::new(pool.clone()));
    let capability_repository = Arc::new(SqliteCapabilityRepository::new(pool.clone()));
    let edge_repository = Arc::new(SqliteDependencyEdgeRepository::new(pool));
    let provider = Arc::new(NullEmbeddingProvider::new(128));

    for i in 0..tool_count {
        let tool = Tool::new(
            "bench",
            &format!("tool_{i}"),
            &format!("benchmark tool number {i} performing a synthetic operation"),
            json!({"properties": {"input": {"type": "string"}}}),
            json!({"type": "string"}),
        );
        tool_repository.upsert(&tool).await.unwrap();
        let vector = provider.embed(&tool.embedding_text()).await.unwrap();
        tool_repository
            .upsert_embedding(&ToolEmbedding {
                tool_id: tool.id.to_string(),
                vector: Embedding::new(vector),
                source_text_hash: i as u64,
            })
            .await
            .unwrap();
    }

    HybridSearchEngine::new(provider, tool_repository, capability_repository, edge_repository)
}

fn bench_search(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("hybrid_search");

    for tool_count in [10, 100, 1000] {
        let engine = rt.block_on(seeded_engine(tool_count));
        group.bench_with_input(BenchmarkId::from_parameter(tool_count), &engine, |b, engine| {
            b.to_async(&rt).iter(|| async { engine.search("benchmark tool for a synthetic operation", 10, 0.0).await.unwrap() });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_search);
criterion_main!(benches);
