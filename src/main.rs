//! Casys PML mediator entry point.
//!
//! Composition root: load config, stand up logging and storage, wire
//! every service onto the repositories and adapters it needs, run the
//! startup tool-discovery pass, then hand the assembled [`Gateway`] to
//! the stdio MCP transport. Sequenced the way the teacher's own
//! `main.rs` does it — config, then database (open + migrate), then
//! repositories, then services, then transport — generalized from the
//! CLI's subcommand dispatch down to this mediator's single stdio
//! server.

use std::sync::Arc;

use anyhow::{Context, Result};

use casys_pml::adapters::mcp::StdioServer;
use casys_pml::domain::models::Config as MediatorConfig;
use casys_pml::domain::ports::EmbeddingProvider;
use casys_pml::infrastructure::config::ConfigLoader;
use casys_pml::infrastructure::embedding::{HttpEmbeddingConfig, HttpEmbeddingProvider, NullEmbeddingProvider};
use casys_pml::infrastructure::endpoints::{HttpEndpointClient, HttpEndpointConfig};
use casys_pml::infrastructure::logging::{LogConfig, LogFormat, LoggerImpl};
use casys_pml::infrastructure::sandbox::SandboxHost;
use casys_pml::infrastructure::storage::{
    create_pool, SqliteCapabilityRepository, SqliteCheckpointRepository, SqliteDependencyEdgeRepository,
    SqliteToolRepository, SqliteTraceRepository,
};
use casys_pml::services::{
    CapabilityStore, ControlledExecutor, EmbeddingService, EndpointClientPool, EndpointPoolConfig, EventBus,
    EventBusConfig, FqdnPrefix, Gateway, HybridSearchEngine, Planner, SpeculativeExecutor, SpeculativeExecutorConfig,
    ToolRegistry,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ConfigLoader::load().context("failed to load configuration")?;

    let _logger = LoggerImpl::init(&log_config(&config)).context("failed to initialize logging")?;
    tracing::info!(db_path = %config.db_path, "starting casys-pml mediator");

    let pool = create_pool(&config.db_path, None).await.context("failed to open database pool")?;

    let tool_repository = Arc::new(SqliteToolRepository::new(pool.clone()));
    let capability_repository = Arc::new(SqliteCapabilityRepository::new(pool.clone()));
    let edge_repository = Arc::new(SqliteDependencyEdgeRepository::new(pool.clone()));
    let checkpoint_repository = Arc::new(SqliteCheckpointRepository::new(pool.clone()));
    let trace_repository = Arc::new(SqliteTraceRepository::new(pool));

    let embedding_provider = build_embedding_provider(&config);
    let embedding_service = Arc::new(EmbeddingService::with_defaults(embedding_provider.clone()));

    let mut endpoint_pool = EndpointClientPool::new(EndpointPoolConfig {
        per_endpoint_inflight_cap: config.execution.per_endpoint_inflight_cap,
        ..EndpointPoolConfig::default()
    });
    for endpoint in &config.endpoints {
        endpoint_pool.register(Arc::new(HttpEndpointClient::new(HttpEndpointConfig {
            server_id: endpoint.server_id.clone(),
            base_url: endpoint.base_url.clone(),
            timeout_secs: endpoint.timeout_secs,
        })));
    }
    let endpoint_pool = Arc::new(endpoint_pool);

    let tool_registry = ToolRegistry::new(tool_repository.clone(), embedding_service.clone());
    let refresh = tool_registry
        .refresh(&endpoint_pool)
        .await
        .context("initial tool discovery pass failed")?;
    tracing::info!(
        discovered = refresh.discovered,
        embedded = refresh.embedded,
        removed_servers = refresh.removed_servers,
        "tool registry refreshed at startup"
    );

    let search = Arc::new(HybridSearchEngine::new(
        embedding_provider.clone(),
        tool_repository.clone(),
        capability_repository.clone(),
        edge_repository.clone(),
    ));
    let planner = Arc::new(Planner::new(search.clone(), tool_repository.clone(), edge_repository.clone()));

    let capability_store = Arc::new(CapabilityStore::new(
        capability_repository,
        FqdnPrefix { org: config.sandbox.org.clone(), project: config.sandbox.project.clone() },
    ));

    let sandbox = Arc::new(SandboxHost::new(config.sandbox.worker_binary.clone()));

    let events = Arc::new(EventBus::new(EventBusConfig::default()));

    let speculative = Arc::new(SpeculativeExecutor::new(
        capability_store.clone(),
        sandbox.clone(),
        endpoint_pool.clone(),
        events.clone(),
        SpeculativeExecutorConfig::from(&config.speculation),
    ));

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
        capability_store,
        speculative,
        sandbox,
        endpoint_pool,
        embedding_provider,
        checkpoint_repository,
        trace_repository,
        events,
        config,
    ));

    tracing::info!("mediator ready, starting stdio transport");
    let server = Arc::new(StdioServer::new(gateway));
    server.run().await.context("stdio server terminated unexpectedly")
}

fn build_embedding_provider(config: &MediatorConfig) -> Arc<dyn EmbeddingProvider> {
    match std::env::var("CASYS_PML_EMBEDDING_API_KEY") {
        Ok(api_key) if !api_key.is_empty() => Arc::new(HttpEmbeddingProvider::new(HttpEmbeddingConfig {
            api_key: Some(api_key),
            dimension: config.embedding.dim,
            ..HttpEmbeddingConfig::default()
        })),
        _ => {
            tracing::warn!("no embedding API key configured, falling back to the offline null embedding provider");
            Arc::new(NullEmbeddingProvider::new(config.embedding.dim))
        }
    }
}

fn log_config(config: &MediatorConfig) -> LogConfig {
    LogConfig {
        level: config.logging.level.clone(),
        format: if config.logging.json { LogFormat::Json } else { LogFormat::Pretty },
        log_dir: config.logging.directory.clone().map(std::path::PathBuf::from),
        ..LogConfig::default()
    }
}
