//! Capability domain model.
//!
//! A [`Capability`] is a crystallized, reusable workflow (`spec.md` §3,
//! §4.2): sandbox-executable code, its statically-extracted DAG, the
//! intent embedding it was learned from, and running success/failure
//! counters. Capabilities are immutable once written; only the counters
//! row is updated, via a compare-and-update step (`spec.md` §9) rather
//! than a read-modify-write on the capability itself — the same
//! separation the teacher keeps between `capability` and
//! `capability_stats` tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::dag::StaticDag;
use super::embedding::Embedding;

/// `org.project.namespace.action.hash8` capability identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fqdn(pub String);

impl Fqdn {
    #[must_use]
    pub fn build(org: &str, project: &str, namespace: &str, action: &str, code_hash_hex: &str) -> Self {
        let hash8: String = code_hash_hex.chars().take(8).collect();
        Self(format!("{org}.{project}.{namespace}.{action}.{hash8}"))
    }
}

impl std::fmt::Display for Fqdn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A crystallized, reusable workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub fqdn: Fqdn,
    /// Hex-encoded SHA-256 hash of the normalized code.
    pub code_hash: String,
    /// Base64-encoded sandbox-executable code (a wasm component module).
    pub code: String,
    pub static_dag: StaticDag,
    pub intent_embedding: Embedding,
    pub created_at: DateTime<Utc>,
    /// Whether this capability has zero externally-observable side
    /// effects, and is therefore eligible for speculative execution
    /// (`spec.md` §4.4).
    pub pure: bool,
    /// Other capabilities this one depends on (by fqdn), forming
    /// capability-to-capability hyperedges for hybrid search.
    pub dependencies: Vec<Fqdn>,
}

/// Mutable counters for a capability, updated independently of the
/// immutable `Capability` row (`spec.md` §3 ownership note).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CapabilityStats {
    pub successes: u64,
    pub failures: u64,
    pub avg_latency_ms: f64,
    pub last_used: Option<DateTime<Utc>>,
}

impl CapabilityStats {
    /// Reliability factor used by hybrid search (`spec.md` §4.1 step 4):
    /// `(successes + 1) / (successes + failures + 2)`.
    #[must_use]
    pub fn reliability_factor(&self) -> f64 {
        (self.successes as f64 + 1.0) / (self.successes as f64 + self.failures as f64 + 2.0)
    }

    /// Beta-distribution parameters for Thompson-sampled threshold
    /// adaptation (`spec.md` §4.2): `Beta(successes + 1, failures + 1)`.
    #[must_use]
    pub fn beta_params(&self) -> (f64, f64) {
        (self.successes as f64 + 1.0, self.failures as f64 + 1.0)
    }

    /// Records a new latency sample into the running mean, incrementally.
    fn fold_latency(&mut self, latency_ms: u64, prior_count: u64) {
        let n = prior_count as f64;
        self.avg_latency_ms = (self.avg_latency_ms * n + latency_ms as f64) / (n + 1.0);
    }

    #[must_use]
    pub fn with_success(mut self, latency_ms: u64) -> Self {
        self.fold_latency(latency_ms, self.successes + self.failures);
        self.successes += 1;
        self.last_used = Some(Utc::now());
        self
    }

    #[must_use]
    pub fn with_failure(mut self) -> Self {
        self.failures += 1;
        self.last_used = Some(Utc::now());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reliability_factor_matches_spec_formula() {
        let stats = CapabilityStats { successes: 1, failures: 0, avg_latency_ms: 0.0, last_used: None };
        assert!((stats.reliability_factor() - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn counters_are_monotonic_non_decreasing() {
        let stats = CapabilityStats::default();
        let after_success = stats.with_success(100);
        assert_eq!(after_success.successes, 1);
        assert_eq!(after_success.failures, 0);
        let after_failure = after_success.with_failure();
        assert_eq!(after_failure.successes, 1);
        assert_eq!(after_failure.failures, 1);
    }

    #[test]
    fn fqdn_uses_first_eight_hash_chars() {
        let fqdn = Fqdn::build("casys", "pml", "files", "summarize", "abcdef0123456789");
        assert_eq!(fqdn.0, "casys.pml.files.summarize.abcdef01");
    }
}
