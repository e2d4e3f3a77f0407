//! Map artifact codec: graph model, subgraph merge, and the binary blob format.

pub mod codec;
pub mod graph;
pub mod merge;

pub use codec::{deserialize, serialize, validate, CodecError};
pub use graph::{MapEdge, MapGraph, MapNode, MapSubgraph, NodeId, Pose};
pub use merge::{merge, MergeError};
