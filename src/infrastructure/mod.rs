//! Infrastructure layer: adapters for everything the domain layer only
//! knows through a port trait.
//!
//! Nothing in `domain` or `services` depends on `sqlx`, `reqwest`, or
//! `wasmtime` directly — those crates live here, behind `ToolRepository`,
//! `EmbeddingProvider`, `EndpointClient`, and the sandbox host.

pub mod config;
pub mod embedding;
pub mod endpoints;
pub mod logging;
pub mod sandbox;
pub mod storage;
