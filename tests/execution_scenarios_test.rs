//! End-to-end execution scenarios driven through the [`Gateway`] facade
//! against in-memory storage and mock tool endpoints — no sandbox worker
//! process is spawned here (that bridge protocol is covered at the unit
//! level in `infrastructure::sandbox::host`'s own tests).

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use casys_pml::domain::models::{
    Config, ControlState, Embedding, Invocation, StaticDag, Tool, ToolId,
};
use casys_pml::infrastructure::embedding::NullEmbeddingProvider;
use casys_pml::infrastructure::endpoints::MockEndpointClient;
use casys_pml::infrastructure::sandbox::SandboxHost;
use casys_pml::infrastructure::storage::{
    create_test_pool, SqliteCapabilityRepository, SqliteCheckpointRepository, SqliteDependencyEdgeRepository,
    SqliteToolRepository, SqliteTraceRepository,
};
use casys_pml::services::gateway::{ExecuteDagOptions, ExecuteDagRequest, SearchRequest};
use casys_pml::services::planner::ExplicitTaskSpec;
use casys_pml::services::{
    CapabilityStore, ControlledExecutor, EndpointClientPool, EndpointPoolConfig, EventBus, EventBusConfig, FqdnPrefix,
    Gateway, HybridSearchEngine, Planner, SpeculativeExecutor, SpeculativeExecutorConfig,
};

mod harness {
    use super::*;

    pub struct Fixture {
        pub gateway: Arc<Gateway>,
        pub capability_store: Arc<CapabilityStore>,
        pub files: Arc<MockEndpointClient>,
    }

    /// Assembles a full `Gateway` against an in-memory database and a
    /// single `files` mock endpoint, mirroring the wiring `main.rs` does
    /// against real adapters.
    pub async fn build() -> Fixture {
        let pool = create_test_pool().await.unwrap();
        let tool_repository = Arc::new(SqliteToolRepository::new(pool.clone()));
        let capability_repository = Arc::new(SqliteCapabilityRepository::new(pool.clone()));
        let edge_repository = Arc::new(SqliteDependencyEdgeRepository::new(pool.clone()));
        let checkpoint_repository = Arc::new(SqliteCheckpointRepository::new(pool.clone()));
        let trace_repository = Arc::new(SqliteTraceRepository::new(pool));

        let embedding_provider = Arc::new(NullEmbeddingProvider::new(64));

        let files = Arc::new(MockEndpointClient::new(
            "files",
            vec![
                Tool::new("files", "read", "reads a file from disk", json!({}), json!({})),
                Tool::new("files", "write", "writes a file to disk", json!({}), json!({})),
            ],
        ));
        let mut endpoint_pool = EndpointClientPool::new(EndpointPoolConfig::default());
        endpoint_pool.register(files.clone());
        let endpoint_pool = Arc::new(endpoint_pool);

        let search = Arc::new(HybridSearchEngine::new(
            embedding_provider.clone(),
            tool_repository.clone(),
            capability_repository.clone(),
            edge_repository.clone(),
        ));
        let planner = Arc::new(Planner::new(search.clone(), tool_repository.clone(), edge_repository.clone()));

        let capability_store = Arc::new(CapabilityStore::new(
            capability_repository,
            FqdnPrefix { org: "casys".to_string(), project: "pml".to_string() },
        ));

        // Never actually spawned in these tests: every scenario here only
        // exercises tool invocations, not `execute_code`.
        let sandbox = Arc::new(SandboxHost::new("casys-pml-sandbox-worker-not-used-in-tests"));

        let events = Arc::new(EventBus::new(EventBusConfig::default()));

        let speculative = Arc::new(SpeculativeExecutor::new(
            capability_store.clone(),
            sandbox.clone(),
            endpoint_pool.clone(),
            events.clone(),
            SpeculativeExecutorConfig::default(),
        ));

        let config = Config::default();
        let executor = Arc::new(ControlledExecutor::new(
            tool_repository,
            capability_store.clone(),
            endpoint_pool.clone(),
            sandbox.clone(),
            checkpoint_repository.clone(),
            trace_repository.clone(),
            edge_repository,
            events.clone(),
            config.execution.clone(),
        ));

        let gateway = Arc::new(Gateway::new(
            search,
            planner,
            executor,
            capability_store.clone(),
            speculative,
            sandbox,
            endpoint_pool,
            embedding_provider,
            checkpoint_repository,
            trace_repository,
            events,
            config,
        ));

        Fixture { gateway, capability_store, files }
    }

    pub fn tool_task(server: &str, name: &str, depends_on: Vec<Uuid>) -> (Uuid, ExplicitTaskSpec) {
        let id = Uuid::new_v4();
        let spec = ExplicitTaskSpec {
            id: Some(id),
            invocation: Invocation::Tool(ToolId::new(server, name)),
            arguments: json!({}),
            depends_on,
            required: true,
            hil: false,
            ail: false,
            timeout_ms: None,
        };
        (id, spec)
    }

    /// Polls `dag_run_id`'s control state until it matches `target` or
    /// `timeout` elapses, panicking on the latter — these runs have no
    /// external I/O slower than an in-memory SQLite call, so a few
    /// hundred milliseconds is generous.
    pub async fn wait_for_state(gateway: &Gateway, dag_run_id: Uuid, target: ControlState, timeout: Duration) -> ControlState {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let snapshot = gateway.snapshot(dag_run_id).await;
            let state = match snapshot {
                Ok(s) => s.control_state,
                Err(_) => ControlState::Idle,
            };
            if state == target || tokio::time::Instant::now() >= deadline {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

use harness::{build, tool_task, wait_for_state};

#[tokio::test]
async fn sequential_chain_completes_in_dependency_order() {
    let fixture = build().await;
    fixture.files.set_response("read", casys_pml::infrastructure::endpoints::MockInvocationResult::success(json!({"content": "hi"}))).await;
    fixture.files.set_response("write", casys_pml::infrastructure::endpoints::MockInvocationResult::success(json!({"written": true}))).await;

    let (read_id, read_spec) = tool_task("files", "read", vec![]);
    let (_write_id, write_spec) = tool_task("files", "write", vec![read_id]);

    let outcome = fixture
        .gateway
        .execute_dag(ExecuteDagRequest::Explicit { tasks: vec![read_spec, write_spec] }, ExecuteDagOptions::default())
        .await
        .unwrap();

    let state = wait_for_state(&fixture.gateway, outcome.dag_run_id, ControlState::Completed, Duration::from_secs(5)).await;
    assert_eq!(state, ControlState::Completed);
}

#[tokio::test]
async fn fan_out_fan_in_joins_after_every_branch_completes() {
    let fixture = build().await;

    let (root_id, root_spec) = tool_task("files", "read", vec![]);
    let (branch_a, spec_a) = tool_task("files", "read", vec![root_id]);
    let (branch_b, spec_b) = tool_task("files", "read", vec![root_id]);
    let (_join_id, join_spec) = tool_task("files", "write", vec![branch_a, branch_b]);

    let outcome = fixture
        .gateway
        .execute_dag(
            ExecuteDagRequest::Explicit { tasks: vec![root_spec, spec_a, spec_b, join_spec] },
            ExecuteDagOptions::default(),
        )
        .await
        .unwrap();

    let state = wait_for_state(&fixture.gateway, outcome.dag_run_id, ControlState::Completed, Duration::from_secs(5)).await;
    assert_eq!(state, ControlState::Completed);
}

#[tokio::test]
async fn rejected_optional_hil_task_is_skipped_without_failing_the_run() {
    let fixture = build().await;

    let (gated_id, mut gated_spec) = tool_task("files", "write", vec![]);
    gated_spec.required = false;

    let outcome = fixture
        .gateway
        .execute_dag(ExecuteDagRequest::Explicit { tasks: vec![gated_spec] }, ExecuteDagOptions { hil_tasks: vec![gated_id], ..Default::default() })
        .await
        .unwrap();

    let awaiting =
        wait_for_state(&fixture.gateway, outcome.dag_run_id, ControlState::AwaitingHil, Duration::from_secs(5)).await;
    assert_eq!(awaiting, ControlState::AwaitingHil);

    fixture.gateway.approval_response(outcome.dag_run_id, gated_id, false).await.unwrap();

    let state = wait_for_state(&fixture.gateway, outcome.dag_run_id, ControlState::Completed, Duration::from_secs(5)).await;
    assert_eq!(state, ControlState::Completed);
}

#[tokio::test]
async fn required_hil_rejection_fails_the_whole_run() {
    let fixture = build().await;

    let (gated_id, gated_spec) = tool_task("files", "write", vec![]);

    let outcome = fixture
        .gateway
        .execute_dag(ExecuteDagRequest::Explicit { tasks: vec![gated_spec] }, ExecuteDagOptions { hil_tasks: vec![gated_id], ..Default::default() })
        .await
        .unwrap();

    wait_for_state(&fixture.gateway, outcome.dag_run_id, ControlState::AwaitingHil, Duration::from_secs(5)).await;
    fixture.gateway.approval_response(outcome.dag_run_id, gated_id, false).await.unwrap();

    let state = wait_for_state(&fixture.gateway, outcome.dag_run_id, ControlState::Failed, Duration::from_secs(5)).await;
    assert_eq!(state, ControlState::Failed);
}

#[tokio::test]
async fn crystallized_capability_is_found_by_a_matching_intent_search() {
    let fixture = build().await;
    let intent = "summarize the quarterly report";

    let embedding = Embedding::new(vec![0.42; 64]);
    fixture
        .capability_store
        .crystallize(
            "fn run(args) { return args.len(); }",
            StaticDag::default(),
            embedding,
            intent,
            true,
            vec![],
            12,
        )
        .await
        .unwrap();

    let hits = fixture
        .gateway
        .search_capabilities(SearchRequest { intent: intent.to_string(), k: Some(5), min_score: Some(0.0) })
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert!(hits[0].score > 0.0);
}
