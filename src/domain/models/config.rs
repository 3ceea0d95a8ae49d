//! Mediator configuration (`spec.md` §6 configuration table).
//!
//! Follows the teacher's `services::config::Config` shape: one struct
//! per concern, `#[serde(default)]` throughout so a partial TOML file or
//! partial env overrides still produce a valid config, loaded by
//! `infrastructure::config::loader` via `figment`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: String,
    pub embedding: EmbeddingConfig,
    pub execution: ExecutionConfig,
    pub speculation: SpeculationConfig,
    pub search: SearchConfig,
    pub sandbox: SandboxConfig,
    pub redaction: RedactionConfig,
    pub logging: LoggingConfig,
    /// Tool-providing servers to register with the endpoint pool at
    /// startup. Empty by default — a deployment with no configured
    /// endpoints still works for capability-only / sandbox-only intents.
    pub endpoints: Vec<EndpointConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "casys-pml.db".to_string(),
            embedding: EmbeddingConfig::default(),
            execution: ExecutionConfig::default(),
            speculation: SpeculationConfig::default(),
            search: SearchConfig::default(),
            sandbox: SandboxConfig::default(),
            redaction: RedactionConfig::default(),
            logging: LoggingConfig::default(),
            endpoints: Vec::new(),
        }
    }
}

/// One tool-providing HTTP server to register at startup (`spec.md` §2
/// "Endpoint Client Pool"). Not itself part of the distilled spec's
/// configuration table, which only names pool-wide caps — but the pool
/// needs to learn about endpoints from somewhere, and a config list is
/// the teacher's own pattern for registering static backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub server_id: String,
    pub base_url: String,
    #[serde(default = "default_endpoint_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub dim: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { dim: 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_parallel_tasks_per_dag: usize,
    pub default_task_timeout_ms: u64,
    pub retry_max: u32,
    pub per_endpoint_inflight_cap: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks_per_dag: 16,
            default_task_timeout_ms: 30_000,
            retry_max: 3,
            per_endpoint_inflight_cap: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeculationConfig {
    pub cap: usize,
    pub ttl_ms: u64,
    /// Maximum number of cached speculative results kept at once, evicted
    /// least-recently-used.
    pub cache_capacity: usize,
}

impl Default for SpeculationConfig {
    fn default() -> Self {
        Self { cap: 4, ttl_ms: 300_000, cache_capacity: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub hybrid_alpha_default: f32,
    pub capability_match_threshold: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { hybrid_alpha_default: 0.6, capability_match_threshold: 0.85 }
    }
}

/// Capability crystallization identity fields, used to build each
/// capability's `org.project.namespace.action.hash8` FQDN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub org: String,
    pub project: String,
    pub worker_binary: String,
    pub max_memory_bytes: u64,
    pub max_fuel: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            org: "casys".to_string(),
            project: "pml".to_string(),
            worker_binary: "casys-pml-sandbox-worker".to_string(),
            max_memory_bytes: 256 * 1024 * 1024,
            max_fuel: 10_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionConfig {
    pub pii_redaction: bool,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self { pii_redaction: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false, directory: None }
    }
}
