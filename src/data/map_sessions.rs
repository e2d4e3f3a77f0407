//! History of persisted maps, one row per successful scan

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use super::database::DatabaseError;
use crate::util::MapSignature;

/// A map that was finalized and written to storage
#[derive(Debug, Clone, PartialEq)]
pub struct MapSessionRecord {
    pub signature: MapSignature,
    pub map_path: PathBuf,
    pub node_count: usize,
    pub edge_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Data access object for the map session history
#[derive(Clone)]
pub struct MapSessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl MapSessionStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    /// Insert or replace the record for a signature
    pub fn record(&self, record: &MapSessionRecord) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO map_sessions (signature, map_path, node_count, edge_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(signature) DO UPDATE SET
                map_path = ?2, node_count = ?3, edge_count = ?4, created_at = ?5",
            params![
                record.signature.as_str(),
                record.map_path.to_string_lossy().to_string(),
                record.node_count as i64,
                record.edge_count as i64,
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, signature: &MapSignature) -> Result<Option<MapSessionRecord>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT signature, map_path, node_count, edge_count, created_at
             FROM map_sessions WHERE signature = ?1",
        )?;
        let mut rows = stmt.query(params![signature.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Self::row_to_record(row)?),
            None => Ok(None),
        }
    }

    /// All recorded maps, most recent first. Rows with an invalid signature are skipped.
    pub fn list(&self) -> Result<Vec<MapSessionRecord>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT signature, map_path, node_count, edge_count, created_at
             FROM map_sessions ORDER BY created_at DESC, signature DESC",
        )?;
        let records = stmt
            .query_map([], Self::row_to_record)?
            .filter_map(|r| r.ok().flatten())
            .collect();
        Ok(records)
    }

    pub fn delete(&self, signature: &MapSignature) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM map_sessions WHERE signature = ?1",
            params![signature.as_str()],
        )?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<Option<MapSessionRecord>> {
        let signature: String = row.get(0)?;
        let map_path: String = row.get(1)?;
        let node_count: i64 = row.get(2)?;
        let edge_count: i64 = row.get(3)?;
        let created_at: String = row.get(4)?;

        let Ok(signature) = MapSignature::parse(signature) else {
            return Ok(None);
        };

        Ok(Some(MapSessionRecord {
            signature,
            map_path: PathBuf::from(map_path),
            node_count: usize::try_from(node_count).unwrap_or(0),
            edge_count: usize::try_from(edge_count).unwrap_or(0),
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }))
    }
}
