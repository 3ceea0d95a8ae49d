//! Dependency-edge models for the hybrid search hypergraph.
//!
//! `spec.md` §4.1 scores candidates over "the dependency hypergraph." We
//! realize that hypergraph as two adjacency tables — tool-to-tool edges
//! learned online from successful executions, and capability-to-capability
//! edges derived from a capability's recorded dependency set — unified
//! behind [`SearchTarget`] so Adamic-Adar scoring treats both uniformly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Either side of the hypergraph hybrid search ranks over.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchTarget {
    Tool(String),
    Capability(String),
}

impl SearchTarget {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Tool(id) | Self::Capability(id) => id,
        }
    }
}

/// A directed, weighted edge `A -> B` meaning "B frequently follows A in
/// successful workflows" (`spec.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: SearchTarget,
    pub to: SearchTarget,
    pub weight: f32,
    /// Number of executions that contributed to this edge's weight.
    pub support: u32,
}

/// In-memory adjacency view over a snapshot of dependency edges, used by
/// the hybrid search engine to compute Adamic-Adar relatedness without
/// re-querying storage per candidate.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// target -> set of neighbors (both directions, since "common neighbor"
    /// relatedness is direction-agnostic).
    neighbors: HashMap<SearchTarget, Vec<SearchTarget>>,
}

impl DependencyGraph {
    #[must_use]
    pub fn from_edges(edges: &[DependencyEdge]) -> Self {
        let mut neighbors: HashMap<SearchTarget, Vec<SearchTarget>> = HashMap::new();
        for edge in edges {
            neighbors
                .entry(edge.from.clone())
                .or_default()
                .push(edge.to.clone());
            neighbors
                .entry(edge.to.clone())
                .or_default()
                .push(edge.from.clone());
        }
        Self { neighbors }
    }

    #[must_use]
    pub fn degree(&self, target: &SearchTarget) -> usize {
        self.neighbors.get(target).map_or(0, Vec::len)
    }

    /// Adamic-Adar relatedness between two targets: sum over common
    /// neighbors `c` of `1 / ln(1 + degree(c))` (`spec.md` §4.1 step 3).
    #[must_use]
    pub fn adamic_adar(&self, a: &SearchTarget, b: &SearchTarget) -> f32 {
        let Some(neighbors_a) = self.neighbors.get(a) else {
            return 0.0;
        };
        let Some(neighbors_b) = self.neighbors.get(b) else {
            return 0.0;
        };
        let set_b: std::collections::HashSet<_> = neighbors_b.iter().collect();
        neighbors_a
            .iter()
            .filter(|c| set_b.contains(c))
            .map(|c| {
                let deg = self.degree(c) as f32;
                1.0 / (1.0 + deg).ln().max(f32::MIN_POSITIVE)
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> SearchTarget {
        SearchTarget::Tool(name.to_string())
    }

    #[test]
    fn common_neighbor_increases_adamic_adar() {
        let edges = vec![
            DependencyEdge { from: tool("a"), to: tool("c"), weight: 0.5, support: 3 },
            DependencyEdge { from: tool("b"), to: tool("c"), weight: 0.5, support: 3 },
        ];
        let graph = DependencyGraph::from_edges(&edges);
        let score = graph.adamic_adar(&tool("a"), &tool("b"));
        assert!(score > 0.0);
    }

    #[test]
    fn disconnected_targets_score_zero() {
        let edges = vec![DependencyEdge { from: tool("a"), to: tool("c"), weight: 0.5, support: 1 }];
        let graph = DependencyGraph::from_edges(&edges);
        assert_eq!(graph.adamic_adar(&tool("a"), &tool("zzz")), 0.0);
    }
}
