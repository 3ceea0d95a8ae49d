//! Domain layer: the mediator's core business logic.
//!
//! Contains framework-agnostic models and the port traits storage/endpoint
//! adapters implement. Nothing here depends on `sqlx`, `reqwest`, or
//! `wasmtime` directly.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{MediatorError, MediatorResult};
