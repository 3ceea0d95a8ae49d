//! Dependency-edge repository port: the learned tool/capability
//! hypergraph that backs hybrid search's Adamic-Adar term (`spec.md` §4.1).

use async_trait::async_trait;

use crate::domain::errors::MediatorResult;
use crate::domain::models::{DependencyEdge, SearchTarget};

#[async_trait]
pub trait DependencyEdgeRepository: Send + Sync {
    /// Records that `to` followed `from` in a successful execution,
    /// incrementing support and re-weighting the edge if it already exists.
    async fn record_transition(&self, from: SearchTarget, to: SearchTarget) -> MediatorResult<()>;

    async fn all_edges(&self) -> MediatorResult<Vec<DependencyEdge>>;
}
