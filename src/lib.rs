pub mod config;
pub mod data;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod map;
pub mod session;
pub mod storage;
pub mod util;

pub use config::Config;
pub use data::{AppStateStore, Database, MapSessionRecord, MapSessionStore};
pub use dispatch::{Delivery, EventDispatcher, OutcomeCancelled, PendingOutcome, SubscriptionToken};
pub use engine::{
    engine_channel, EngineError, EngineEvent, FinalizedMap, MappingEngine, MappingSettings, RunId,
    Tracker, TrackingStatus,
};
pub use error::SessionError;
pub use ledger::{LedgerLoad, MalformedRecordPolicy, ObjectLedger, Position};
pub use map::{MapEdge, MapGraph, MapNode, MapSubgraph, NodeId, Pose};
pub use session::{
    Engines, FailureReason, LocalizeOutcome, MappingOutcome, SessionContext, SessionEvent,
    SessionManager, SessionState,
};
pub use storage::{ArtifactKind, BlobStore, StorageError};
pub use util::{MapSignature, SignatureGenerator};
