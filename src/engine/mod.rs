//! External mapping and tracking collaborators.
//!
//! The session manager drives a [`MappingEngine`] and a [`Tracker`] through
//! these traits. Completion is reported asynchronously: engines push
//! [`EngineEvent`]s into the channel created by [`engine_channel`], tagged
//! with the [`RunId`] they were started with.

pub mod mock;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::ledger::Position;
use crate::map::{MapGraph, MapSubgraph};

pub use mock::{EngineCall, MockMappingEngine, MockTracker, TrackerCall};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Engine unavailable: {0}")]
    Unavailable(String),
    #[error("Engine rejected command {command}: {reason}")]
    Rejected {
        command: &'static str,
        reason: String,
    },
}

/// Identifies one mapping or tracking run; events from other runs are stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Which edges the engine emits when it finalizes a map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeOutput {
    #[default]
    All,
    Spanning,
}

/// Engine-side mapping parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MappingSettings {
    /// Distance after which the engine starts a new subgraph
    pub splitter_max_distance_m: f32,
    /// Duration after which the engine starts a new subgraph
    pub splitter_max_duration_s: f32,
    pub edge_output: EdgeOutput,
}

impl Default for MappingSettings {
    fn default() -> Self {
        Self {
            splitter_max_distance_m: 350.0,
            splitter_max_duration_s: 1000.0,
            edge_output: EdgeOutput::All,
        }
    }
}

/// What the engine produced at the end of a mapping run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinalizedMap {
    pub subgraphs: Vec<MapSubgraph>,
}

impl FinalizedMap {
    pub fn new(subgraphs: Vec<MapSubgraph>) -> Self {
        Self { subgraphs }
    }

    /// Whether the engine reported anything usable at all
    pub fn has_content(&self) -> bool {
        self.subgraphs.iter().any(|s| !s.nodes.is_empty())
    }
}

/// Localization progress reported by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    /// Still searching; more progress events follow
    Searching,
    /// Localized against the map
    Localized,
    /// Terminal failure
    Lost,
}

impl TrackingStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TrackingStatus::Searching)
    }
}

/// Asynchronous completion events pushed by collaborators
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Fired exactly once per mapping run; `None` when no map was produced
    MapFinalized {
        run: RunId,
        map: Option<FinalizedMap>,
    },
    /// Fired one or more times per tracking run
    TrackingProgress { run: RunId, status: TrackingStatus },
}

impl EngineEvent {
    pub fn run(&self) -> RunId {
        match self {
            EngineEvent::MapFinalized { run, .. } | EngineEvent::TrackingProgress { run, .. } => {
                *run
            }
        }
    }

    pub fn event_type_name(&self) -> &'static str {
        match self {
            EngineEvent::MapFinalized { .. } => "MapFinalized",
            EngineEvent::TrackingProgress { .. } => "TrackingProgress",
        }
    }
}

/// Sending half handed to collaborators
#[derive(Debug, Clone)]
pub struct EngineEventSender {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineEventSender {
    /// Push an event; returns false if the session manager is gone
    pub fn send(&self, event: EngineEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Receiving half owned by the session manager
pub type EngineEventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Create the channel collaborators use to report completions
pub fn engine_channel() -> (EngineEventSender, EngineEventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EngineEventSender { tx }, rx)
}

/// On-device mapping engine
#[async_trait]
pub trait MappingEngine: Send + Sync {
    /// Apply mapping parameters; they take effect after the next reset
    async fn configure(&self, settings: MappingSettings) -> Result<(), EngineError>;

    /// Enable or disable the engine. Disable followed by enable resets it.
    async fn set_enabled(&self, enabled: bool) -> Result<(), EngineError>;

    /// Seed the engine with a previously persisted map, or an empty one
    async fn set_map(&self, map: Option<MapGraph>) -> Result<(), EngineError>;

    /// Start mapping; the engine later reports `MapFinalized` for `run`
    async fn start_mapping(&self, run: RunId) -> Result<(), EngineError>;

    /// Stop mapping. The engine finalizes whatever it has mapped so far.
    async fn stop_mapping(&self) -> Result<(), EngineError>;

    /// Drop the engine's on-device map
    async fn clear_device_map(&self) -> Result<(), EngineError>;
}

/// Localization tracker that owns the map anchor
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Start localizing against `map`; progress is reported for `run`
    async fn start_tracking(&self, run: RunId, map: MapGraph) -> Result<(), EngineError>;

    /// Stop tracking and drop all tracker state, including attached objects
    async fn clear_all_state(&self) -> Result<(), EngineError>;

    /// Attach a live object to the anchor at an anchor-relative position
    async fn attach_object(&self, position: Position) -> Result<(), EngineError>;

    /// Destroy every live object attached to the anchor
    async fn detach_all_objects(&self) -> Result<(), EngineError>;
}
