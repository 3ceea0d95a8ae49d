//! Capability repository port.
//!
//! Capabilities are immutable once written; only [`CapabilityStats`] is
//! mutated, and it is mutated via a compare-and-update rather than a
//! read-modify-write to avoid losing concurrent updates (`spec.md` §9).

use async_trait::async_trait;

use crate::domain::errors::MediatorResult;
use crate::domain::models::{Capability, CapabilityStats, Fqdn};

#[async_trait]
pub trait CapabilityRepository: Send + Sync {
    /// Inserts a new capability row. Capabilities are never updated once
    /// written, only superseded by a new fqdn (a new code hash).
    async fn insert(&self, capability: &Capability) -> MediatorResult<()>;

    async fn get(&self, fqdn: &Fqdn) -> MediatorResult<Option<Capability>>;

    async fn get_by_code_hash(&self, code_hash: &str) -> MediatorResult<Option<Capability>>;

    async fn list(&self) -> MediatorResult<Vec<Capability>>;

    async fn get_stats(&self, fqdn: &Fqdn) -> MediatorResult<CapabilityStats>;

    /// Applies `update` to the stats row currently stored for `fqdn`,
    /// atomically from the caller's perspective (the adapter serializes
    /// concurrent updates to the same row).
    async fn update_stats(
        &self,
        fqdn: &Fqdn,
        update: Box<dyn FnOnce(CapabilityStats) -> CapabilityStats + Send>,
    ) -> MediatorResult<()>;
}
