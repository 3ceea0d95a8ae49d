//! Embedding provider adapters: a real HTTP-backed provider and a
//! deterministic offline stand-in for tests.

pub mod null;
pub mod openai;

pub use null::NullEmbeddingProvider;
pub use openai::{HttpEmbeddingConfig, HttpEmbeddingProvider};
