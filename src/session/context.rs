//! Durable session context: the last map signature and where its map lives.

use std::path::PathBuf;

use crate::data::{AppStateStore, DatabaseError};
use crate::util::MapSignature;

/// Key holding the most recent map signature
pub const KEY_LAST_SIGNATURE: &str = "last_map_signature";
/// Key holding the path of the most recent map blob
pub const KEY_CURRENT_MAP_PATH: &str = "current_map_path";

/// Lifecycle state that outlives the process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub last_signature: Option<MapSignature>,
    pub current_map_path: Option<PathBuf>,
}

impl SessionContext {
    pub fn new(signature: MapSignature, map_path: PathBuf) -> Self {
        Self {
            last_signature: Some(signature),
            current_map_path: Some(map_path),
        }
    }

    /// Read the context back at process start. A stored signature that does
    /// not validate is treated as absent.
    pub fn restore(store: &AppStateStore) -> Result<Self, DatabaseError> {
        let last_signature = match store.get(KEY_LAST_SIGNATURE)? {
            Some(raw) => match MapSignature::parse(raw) {
                Ok(signature) => Some(signature),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring stored map signature");
                    None
                }
            },
            None => None,
        };
        let current_map_path = store
            .get(KEY_CURRENT_MAP_PATH)?
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            last_signature,
            current_map_path,
        })
    }

    /// Write both keys in one transaction; absent values are deleted
    pub fn persist(&self, store: &AppStateStore) -> Result<(), DatabaseError> {
        let path = self
            .current_map_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());

        let mut entries: Vec<(&str, &str)> = Vec::with_capacity(2);
        if let Some(signature) = &self.last_signature {
            entries.push((KEY_LAST_SIGNATURE, signature.as_str()));
        } else {
            store.delete(KEY_LAST_SIGNATURE)?;
        }
        if let Some(path) = &path {
            entries.push((KEY_CURRENT_MAP_PATH, path.as_str()));
        } else {
            store.delete(KEY_CURRENT_MAP_PATH)?;
        }
        store.set_many(&entries)
    }

    /// Drop both keys from durable state
    pub fn forget(store: &AppStateStore) -> Result<(), DatabaseError> {
        store.delete(KEY_LAST_SIGNATURE)?;
        store.delete(KEY_CURRENT_MAP_PATH)
    }
}
