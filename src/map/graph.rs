//! Map graph model: anchor nodes plus undirected traversable edges.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::merge::MergeError;

/// Identifier of a map node, stable across subgraphs of one mapping run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Node pose in the map frame: translation plus unit quaternion (x, y, z, w).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub translation: [f32; 3],
    pub rotation: [f32; 4],
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        translation: [0.0, 0.0, 0.0],
        rotation: [0.0, 0.0, 0.0, 1.0],
    };

    pub fn at(x: f32, y: f32, z: f32) -> Self {
        Self {
            translation: [x, y, z],
            ..Self::IDENTITY
        }
    }

    pub fn is_finite(&self) -> bool {
        self.translation.iter().all(|v| v.is_finite()) && self.rotation.iter().all(|v| v.is_finite())
    }

    /// Components as raw bits, giving a total order independent of float semantics
    pub(crate) fn bits(&self) -> [u32; 7] {
        let t = &self.translation;
        let r = &self.rotation;
        [
            t[0].to_bits(),
            t[1].to_bits(),
            t[2].to_bits(),
            r[0].to_bits(),
            r[1].to_bits(),
            r[2].to_bits(),
            r[3].to_bits(),
        ]
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// One map node as produced by the mapping engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapNode {
    pub id: NodeId,
    /// Engine revision of this node; higher revisions supersede lower ones
    pub revision: u32,
    pub pose: Pose,
    /// Opaque engine payload (feature descriptors etc.)
    pub data: Vec<u8>,
}

impl MapNode {
    pub fn new(id: u64, pose: Pose) -> Self {
        Self {
            id: NodeId(id),
            revision: 0,
            pose,
            data: Vec::new(),
        }
    }

    pub fn with_revision(mut self, revision: u32) -> Self {
        self.revision = revision;
        self
    }

    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    /// Order deciding which of two nodes with the same id survives a merge.
    /// `Greater` means `self` wins.
    pub(crate) fn precedence(&self, other: &MapNode) -> Ordering {
        self.revision
            .cmp(&other.revision)
            // lower pose/payload wins on equal revision
            .then_with(|| other.pose.bits().cmp(&self.pose.bits()))
            .then_with(|| other.data.cmp(&self.data))
    }
}

/// Undirected traversable connection between two nodes.
/// Endpoints are stored with `a <= b`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapEdge {
    pub a: NodeId,
    pub b: NodeId,
    pub confidence: f32,
}

impl MapEdge {
    pub fn new(from: u64, to: u64, confidence: f32) -> Self {
        let (a, b) = if from <= to { (from, to) } else { (to, from) };
        Self {
            a: NodeId(a),
            b: NodeId(b),
            confidence,
        }
    }

    pub fn endpoints(&self) -> (NodeId, NodeId) {
        if self.a <= self.b {
            (self.a, self.b)
        } else {
            (self.b, self.a)
        }
    }
}

/// A fragment of a map as reported by the engine. Edges may reference nodes
/// held by sibling subgraphs, so fragments are only checked once merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapSubgraph {
    pub nodes: Vec<MapNode>,
    pub edges: Vec<MapEdge>,
}

impl MapSubgraph {
    pub fn new(nodes: Vec<MapNode>, edges: Vec<MapEdge>) -> Self {
        Self { nodes, edges }
    }
}

/// Canonical map graph: nodes sorted by id with no duplicates, edges sorted
/// by endpoints with no duplicates, and every edge between existing nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapGraph {
    nodes: Vec<MapNode>,
    edges: Vec<MapEdge>,
}

impl MapGraph {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the canonical graph from arbitrary parts.
    ///
    /// Duplicate nodes are resolved by [`MapNode::precedence`]; duplicate
    /// edges keep the highest confidence.
    pub fn from_parts(
        nodes: impl IntoIterator<Item = MapNode>,
        edges: impl IntoIterator<Item = MapEdge>,
    ) -> Result<Self, MergeError> {
        let mut by_id: BTreeMap<NodeId, MapNode> = BTreeMap::new();
        for node in nodes {
            if !node.pose.is_finite() {
                return Err(MergeError::NonFinitePose(node.id));
            }
            match by_id.get(&node.id) {
                Some(existing) if existing.precedence(&node) != Ordering::Less => {}
                _ => {
                    by_id.insert(node.id, node);
                }
            }
        }

        let mut by_endpoints: BTreeMap<(NodeId, NodeId), f32> = BTreeMap::new();
        for edge in edges {
            let (a, b) = edge.endpoints();
            if a == b {
                return Err(MergeError::SelfLoop(a));
            }
            if !edge.confidence.is_finite() {
                return Err(MergeError::NonFiniteConfidence(a, b));
            }
            for end in [a, b] {
                if !by_id.contains_key(&end) {
                    return Err(MergeError::DanglingEdge { from: a, to: b, missing: end });
                }
            }
            by_endpoints
                .entry((a, b))
                .and_modify(|c| *c = c.max(edge.confidence))
                .or_insert(edge.confidence);
        }

        Ok(Self {
            nodes: by_id.into_values().collect(),
            edges: by_endpoints
                .into_iter()
                .map(|((a, b), confidence)| MapEdge { a, b, confidence })
                .collect(),
        })
    }

    pub fn nodes(&self) -> &[MapNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[MapEdge] {
        &self.edges
    }

    pub fn node(&self, id: NodeId) -> Option<&MapNode> {
        self.nodes
            .binary_search_by_key(&id, |n| n.id)
            .ok()
            .map(|idx| &self.nodes[idx])
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// A map may become "the current map" only with at least one node and one edge
    pub fn is_valid(&self) -> bool {
        !self.nodes.is_empty() && !self.edges.is_empty()
    }

    /// Split back into a single subgraph (used when handing the map to an engine)
    pub fn to_subgraph(&self) -> MapSubgraph {
        MapSubgraph::new(self.nodes.clone(), self.edges.clone())
    }
}
