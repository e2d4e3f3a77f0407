//! Subgraph merge into one canonical map graph.

use thiserror::Error;

use super::graph::{MapGraph, MapSubgraph, NodeId};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MergeError {
    #[error("no subgraphs contained any nodes")]
    Empty,
    #[error("edge {from}-{to} references missing node {missing}")]
    DanglingEdge {
        from: NodeId,
        to: NodeId,
        missing: NodeId,
    },
    #[error("edge connects node {0} to itself")]
    SelfLoop(NodeId),
    #[error("node {0} has a non-finite pose")]
    NonFinitePose(NodeId),
    #[error("edge {0}-{1} has a non-finite confidence")]
    NonFiniteConfidence(NodeId, NodeId),
}

/// Merge every subgraph of one finalized map into a single canonical graph.
///
/// The result does not depend on the order of `subgraphs`: nodes sharing an
/// id collapse to the highest revision (ties go to the lower pose, then the
/// lower payload), and edges sharing endpoints keep the highest confidence.
pub fn merge(subgraphs: &[MapSubgraph]) -> Result<MapGraph, MergeError> {
    if subgraphs.iter().all(|s| s.nodes.is_empty()) {
        return Err(MergeError::Empty);
    }

    let nodes = subgraphs.iter().flat_map(|s| s.nodes.iter().cloned());
    let edges = subgraphs.iter().flat_map(|s| s.edges.iter().copied());
    let merged = MapGraph::from_parts(nodes, edges)?;

    tracing::debug!(
        subgraphs = subgraphs.len(),
        nodes = merged.node_count(),
        edges = merged.edge_count(),
        "Merged map subgraphs"
    );
    Ok(merged)
}
