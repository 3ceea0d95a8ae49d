//! Sandbox worker process management: spawning, bridging, and resource
//! enforcement for the zero-ambient-permission capability runtime
//! (`spec.md` §4.5).

pub mod host;

pub use host::{SandboxHost, SandboxOutcome};
