//! Binary map artifact format.
//!
//! Layout (all integers little-endian):
//! - Header (8 bytes): magic `AKMAP` (5), version u8, reserved (2)
//! - Counts: node count u32, edge count u32
//! - Nodes: id u64, revision u32, pose 7 x f32, payload length u32, payload
//! - Edges: a u64, b u64, confidence f32
//! - Trailer: SHA-256 of every preceding byte (32)

use sha2::{Digest, Sha256};
use thiserror::Error;

use super::graph::{MapEdge, MapGraph, MapNode, NodeId, Pose};
use super::merge::MergeError;

/// Magic bytes for map artifacts
const MAGIC: &[u8; 5] = b"AKMAP";

/// Current format version
const VERSION: u8 = 1;

const HEADER_SIZE: usize = 8;
const COUNTS_SIZE: usize = 8;
const CHECKSUM_SIZE: usize = 32;
const NODE_FIXED_SIZE: usize = 8 + 4 + 7 * 4 + 4;
const EDGE_SIZE: usize = 8 + 8 + 4;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("artifact is truncated")]
    Truncated,
    #[error("invalid magic bytes")]
    BadMagic,
    #[error("unsupported artifact version {found} (expected {expected})")]
    VersionMismatch { expected: u8, found: u8 },
    #[error("artifact checksum mismatch")]
    ChecksumMismatch,
    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),
    #[error("map content is not mergeable: {0}")]
    Unmergeable(#[from] MergeError),
    #[error("map is not valid: {0}")]
    InvalidMap(&'static str),
}

/// Check the validity predicate: at least one node and one traversable edge
pub fn validate(graph: &MapGraph) -> Result<(), CodecError> {
    if graph.is_empty() {
        return Err(CodecError::InvalidMap("map has no nodes"));
    }
    if graph.edges().is_empty() {
        return Err(CodecError::InvalidMap("map has no edges"));
    }
    Ok(())
}

/// Serialize a canonical graph to bytes
pub fn serialize(graph: &MapGraph) -> Vec<u8> {
    let payload: usize = graph.nodes().iter().map(|n| NODE_FIXED_SIZE + n.data.len()).sum();
    let mut out = Vec::with_capacity(
        HEADER_SIZE + COUNTS_SIZE + payload + graph.edge_count() * EDGE_SIZE + CHECKSUM_SIZE,
    );

    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    out.extend_from_slice(&[0u8; 2]);

    out.extend_from_slice(&(graph.node_count() as u32).to_le_bytes());
    out.extend_from_slice(&(graph.edge_count() as u32).to_le_bytes());

    for node in graph.nodes() {
        out.extend_from_slice(&node.id.0.to_le_bytes());
        out.extend_from_slice(&node.revision.to_le_bytes());
        for v in node.pose.translation.iter().chain(node.pose.rotation.iter()) {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&(node.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&node.data);
    }

    for edge in graph.edges() {
        out.extend_from_slice(&edge.a.0.to_le_bytes());
        out.extend_from_slice(&edge.b.0.to_le_bytes());
        out.extend_from_slice(&edge.confidence.to_le_bytes());
    }

    let digest = Sha256::digest(&out);
    out.extend_from_slice(&digest);
    out
}

/// Deserialize bytes produced by [`serialize`].
///
/// This checks framing and integrity only; callers decide separately
/// whether the map passes [`validate`].
pub fn deserialize(bytes: &[u8]) -> Result<MapGraph, CodecError> {
    if bytes.len() < HEADER_SIZE + COUNTS_SIZE + CHECKSUM_SIZE {
        return Err(CodecError::Truncated);
    }
    if &bytes[0..5] != MAGIC {
        return Err(CodecError::BadMagic);
    }
    if bytes[5] != VERSION {
        return Err(CodecError::VersionMismatch {
            expected: VERSION,
            found: bytes[5],
        });
    }

    let (body, checksum) = bytes.split_at(bytes.len() - CHECKSUM_SIZE);
    if Sha256::digest(body).as_slice() != checksum {
        return Err(CodecError::ChecksumMismatch);
    }

    let mut reader = Reader::new(&body[HEADER_SIZE..]);
    let node_count = reader.u32()? as usize;
    let edge_count = reader.u32()? as usize;

    let mut nodes = Vec::with_capacity(node_count.min(reader.remaining() / NODE_FIXED_SIZE));
    for _ in 0..node_count {
        let id = NodeId(reader.u64()?);
        let revision = reader.u32()?;
        let mut pose = Pose::IDENTITY;
        for v in pose.translation.iter_mut() {
            *v = reader.f32()?;
        }
        for v in pose.rotation.iter_mut() {
            *v = reader.f32()?;
        }
        let len = reader.u32()? as usize;
        let data = reader.bytes(len)?.to_vec();
        nodes.push(MapNode {
            id,
            revision,
            pose,
            data,
        });
    }

    let mut edges = Vec::with_capacity(edge_count.min(reader.remaining() / EDGE_SIZE));
    for _ in 0..edge_count {
        let a = NodeId(reader.u64()?);
        let b = NodeId(reader.u64()?);
        let confidence = reader.f32()?;
        edges.push(MapEdge { a, b, confidence });
    }

    if reader.remaining() > 0 {
        return Err(CodecError::TrailingBytes(reader.remaining()));
    }

    Ok(MapGraph::from_parts(nodes, edges)?)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_le_bytes(self.array()?))
    }
}
