//! Outcomes delivered once per scan or localization.

use std::fmt;
use std::path::PathBuf;

use crate::ledger::Position;
use crate::util::MapSignature;

/// Why a scan or localization did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The engine finalized without producing a map
    NoMapProduced,
    /// The finalized map could not be merged or is not valid
    InvalidMap(String),
    /// Writing the map or the session context failed
    Persistence(String),
    /// A collaborator rejected a command mid-operation
    Engine(String),
    /// The tracker gave up localizing
    TrackingLost,
    /// Placed objects for the map could not be restored
    ObjectRestore(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NoMapProduced => write!(f, "engine produced no map"),
            FailureReason::InvalidMap(e) => write!(f, "invalid map: {}", e),
            FailureReason::Persistence(e) => write!(f, "persistence failed: {}", e),
            FailureReason::Engine(e) => write!(f, "engine failure: {}", e),
            FailureReason::TrackingLost => write!(f, "tracking lost"),
            FailureReason::ObjectRestore(e) => write!(f, "object restore failed: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MappingOutcome {
    Succeeded {
        signature: MapSignature,
        map_path: PathBuf,
    },
    Failed(FailureReason),
}

impl MappingOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, MappingOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocalizeOutcome {
    Localized {
        signature: MapSignature,
        /// Objects re-attached from the ledger, in append order
        restored: Vec<Position>,
        /// Ledger records skipped as malformed
        rejected: usize,
    },
    Failed(FailureReason),
}

impl LocalizeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LocalizeOutcome::Localized { .. })
    }
}
