//! Casys PML mediator.
//!
//! A task-DAG execution mediator sitting between an agent and a pool of
//! tool endpoints: plans and runs DAGs of tool/capability invocations,
//! gates tasks behind human- or agent-in-the-loop review, checkpoints
//! progress, and crystallizes successful ad-hoc code into reusable,
//! searchable capabilities.
//!
//! - `domain` — pure models and port traits, no infrastructure concerns.
//! - `infrastructure` — concrete adapters: SQLite storage, HTTP
//!   endpoints, the wasmtime sandbox, config loading, logging.
//! - `services` — orchestration logic built only on `domain` ports: the
//!   hybrid search engine, planner, controlled executor, capability
//!   store, speculative executor, and the Gateway Facade.
//! - `adapters` — transport: the stdio MCP server exposing the Gateway
//!   Facade's meta-operations as tools.

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{MediatorError, MediatorResult};
pub use services::gateway::Gateway;
