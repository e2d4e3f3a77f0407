use thiserror::Error;

use crate::data::DatabaseError;
use crate::dispatch::DispatchError;
use crate::engine::EngineError;
use crate::ledger::{LedgerError, ParseError, Position};
use crate::map::{CodecError, MergeError};
use crate::session::{Command, SessionState};
use crate::storage::StorageError;
use crate::util::InvalidSignature;

/// Errors returned synchronously by session commands
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{command} is not allowed while {state}")]
    ProtocolViolation {
        command: Command,
        state: SessionState,
    },

    #[error("No saved map to localize against")]
    NoSavedMap,

    #[error("Position {0} is not finite")]
    NonFinitePosition(Position),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Signature(#[from] InvalidSignature),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl From<LedgerError> for SessionError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Storage(e) => SessionError::Storage(e),
            LedgerError::Parse(e) => SessionError::Parse(e),
            LedgerError::NonFinite(p) => SessionError::NonFinitePosition(p),
        }
    }
}

impl SessionError {
    pub fn protocol(command: Command, state: SessionState) -> Self {
        SessionError::ProtocolViolation { command, state }
    }

    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, SessionError::ProtocolViolation { .. })
    }
}
