//! Domain ports: the interfaces adapters implement and services depend on.

pub mod capability_repository;
pub mod checkpoint_repository;
pub mod embedding;
pub mod endpoint_client;
pub mod tool_edge_repository;
pub mod tool_repository;
pub mod trace_repository;

pub use capability_repository::CapabilityRepository;
pub use checkpoint_repository::CheckpointRepository;
pub use embedding::{EmbeddingInput, EmbeddingOutput, EmbeddingProvider};
pub use endpoint_client::EndpointClient;
pub use tool_edge_repository::DependencyEdgeRepository;
pub use tool_repository::ToolRepository;
pub use trace_repository::TraceRepository;
