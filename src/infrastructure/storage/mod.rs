//! SQLite storage adapters for every repository port the domain layer
//! defines, plus connection pooling and embedded migrations.

pub mod connection;
pub mod sqlite_capability_repository;
pub mod sqlite_checkpoint_repository;
pub mod sqlite_dependency_edge_repository;
pub mod sqlite_tool_repository;
pub mod sqlite_trace_repository;

pub use connection::{create_pool, create_test_pool, verify_connection, ConnectionError, PoolConfig};
pub use sqlite_capability_repository::SqliteCapabilityRepository;
pub use sqlite_checkpoint_repository::SqliteCheckpointRepository;
pub use sqlite_dependency_edge_repository::SqliteDependencyEdgeRepository;
pub use sqlite_tool_repository::SqliteToolRepository;
pub use sqlite_trace_repository::SqliteTraceRepository;
