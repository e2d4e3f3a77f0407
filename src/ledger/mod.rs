//! Object ledger: append-only record of placed-object positions per map.
//!
//! Each record is one line `(x, y, z)` holding an anchor-relative position.
//! What happens to a malformed line is decided by [`MalformedRecordPolicy`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::{blob_name, ArtifactKind, BlobStore, StorageError};
use crate::util::MapSignature;

/// Position relative to the map's anchor frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<(f32, f32, f32)> for Position {
    fn from((x, y, z): (f32, f32, f32)) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Why a ledger line could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFault {
    FieldCount(usize),
    NotNumeric(String),
    NonFinite(String),
}

impl fmt::Display for RecordFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordFault::FieldCount(n) => write!(f, "expected 3 fields, found {}", n),
            RecordFault::NotNumeric(field) => write!(f, "field {:?} is not a number", field),
            RecordFault::NonFinite(field) => write!(f, "field {:?} is not finite", field),
        }
    }
}

impl FromStr for Position {
    type Err = RecordFault;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(trimmed);

        let fields: Vec<&str> = inner.split(',').map(str::trim).collect();
        if fields.len() != 3 {
            return Err(RecordFault::FieldCount(fields.len()));
        }

        let mut values = [0f32; 3];
        for (slot, field) in values.iter_mut().zip(&fields) {
            let value: f32 = field
                .parse()
                .map_err(|_| RecordFault::NotNumeric(field.to_string()))?;
            if !value.is_finite() {
                return Err(RecordFault::NonFinite(field.to_string()));
            }
            *slot = value;
        }
        Ok(Position::new(values[0], values[1], values[2]))
    }
}

/// A malformed ledger record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{blob} line {line}: {fault} in record {record:?}")]
pub struct ParseError {
    pub blob: String,
    /// 1-based line number
    pub line: usize,
    pub record: String,
    pub fault: RecordFault,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("position {0} is not finite")]
    NonFinite(Position),
}

/// What to do with a malformed record while loading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MalformedRecordPolicy {
    /// Keep loading; report the rejected records alongside the good ones
    #[default]
    Skip,
    /// Fail the whole load on the first malformed record
    Abort,
}

/// Result of loading a ledger
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerLoad {
    /// Decoded positions in append order
    pub positions: Vec<Position>,
    /// Records rejected under [`MalformedRecordPolicy::Skip`]
    pub rejected: Vec<ParseError>,
}

/// Durable placed-object ledger. Owns only on-disk state; live object
/// representations belong to the caller.
#[derive(Debug, Clone)]
pub struct ObjectLedger {
    store: BlobStore,
    policy: MalformedRecordPolicy,
}

impl ObjectLedger {
    pub fn new(store: BlobStore, policy: MalformedRecordPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> MalformedRecordPolicy {
        self.policy
    }

    fn blob(signature: &MapSignature) -> String {
        blob_name(signature, ArtifactKind::Objects)
    }

    /// Append one position record for `signature`
    pub fn append(&self, signature: &MapSignature, position: Position) -> Result<(), LedgerError> {
        if !position.is_finite() {
            return Err(LedgerError::NonFinite(position));
        }
        self.store
            .append_record(&Self::blob(signature), &position.to_string())?;
        tracing::debug!(signature = %signature, position = %position, "Appended object record");
        Ok(())
    }

    /// Load every record for `signature` in append order
    pub fn load_all(&self, signature: &MapSignature) -> Result<LedgerLoad, LedgerError> {
        let blob = Self::blob(signature);
        let records = self.store.read_all_records(&blob)?;

        let mut load = LedgerLoad::default();
        for (idx, record) in records.into_iter().enumerate() {
            match record.parse::<Position>() {
                Ok(position) => load.positions.push(position),
                Err(fault) => {
                    let err = ParseError {
                        blob: blob.clone(),
                        line: idx + 1,
                        record,
                        fault,
                    };
                    match self.policy {
                        MalformedRecordPolicy::Abort => return Err(err.into()),
                        MalformedRecordPolicy::Skip => {
                            tracing::warn!(error = %err, "Skipping malformed object record");
                            load.rejected.push(err);
                        }
                    }
                }
            }
        }
        Ok(load)
    }

    /// Delete the ledger for `signature`
    pub fn clear_all(&self, signature: &MapSignature) -> Result<(), LedgerError> {
        self.store.delete_blob(&Self::blob(signature))?;
        tracing::info!(signature = %signature, "Cleared object ledger");
        Ok(())
    }

    pub fn exists(&self, signature: &MapSignature) -> bool {
        self.store.exists(&Self::blob(signature))
    }

    /// Raw ledger bytes for `signature`, `None` if it has no ledger
    pub fn snapshot(&self, signature: &MapSignature) -> Result<Option<Vec<u8>>, LedgerError> {
        match self.store.read_blob(&Self::blob(signature)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Put back a ledger taken with [`ObjectLedger::snapshot`]
    pub fn restore(
        &self,
        signature: &MapSignature,
        snapshot: Option<Vec<u8>>,
    ) -> Result<(), LedgerError> {
        let blob = Self::blob(signature);
        match snapshot {
            Some(bytes) => {
                self.store.write_blob(&blob, &bytes)?;
            }
            None => self.store.delete_blob(&blob)?,
        }
        tracing::info!(signature = %signature, "Restored object ledger");
        Ok(())
    }
}
