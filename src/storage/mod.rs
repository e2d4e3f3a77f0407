//! Local blob storage for map artifacts and object records.
//!
//! Every file lives directly under one root directory and is named
//! `{signature}_{kind}`. Map blobs are replaced whole through a temporary
//! file and an atomic rename, so readers see either the old or the new blob.
//! Record files are append-only with one record per line; an unterminated
//! trailing line is treated as a torn append and never returned.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::util::MapSignature;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),
    #[error("Record for {name} contains a line break")]
    InvalidRecord { name: String },
    #[error("Record file {name} is not valid UTF-8")]
    Encoding { name: String },
    #[error("I/O error on {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    fn io(name: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(name.to_string())
        } else {
            StorageError::Io {
                name: name.to_string(),
                source,
            }
        }
    }
}

/// Kind of artifact stored for one map signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Serialized map graph (binary, replaced whole)
    Map,
    /// Placed-object ledger (text, append-only)
    Objects,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Map => "map",
            ArtifactKind::Objects => "objects",
        }
    }
}

/// Name of the blob holding `kind` for `signature`
pub fn blob_name(signature: &MapSignature, kind: ArtifactKind) -> String {
    format!("{}_{}", signature, kind.as_str())
}

/// Directory-backed blob store
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StorageError::Io {
            name: root.display().to_string(),
            source: e,
        })?;
        Ok(Self { root })
    }

    /// Open the store in the default location (~/.anchorkeep/artifacts)
    pub fn open_default() -> Result<Self, StorageError> {
        Self::open(crate::util::artifacts_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a named blob
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Replace the blob `name` with `bytes`. Readers never observe a partial write.
    pub fn write_blob(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        let path = self.path_of(name);
        let mut tmp = NamedTempFile::new_in(&self.root).map_err(|e| StorageError::io(name, e))?;
        tmp.write_all(bytes)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| StorageError::io(name, e))?;
        tmp.persist(&path)
            .map_err(|e| StorageError::io(name, e.error))?;

        tracing::debug!(name, bytes = bytes.len(), "Wrote blob");
        Ok(path)
    }

    pub fn read_blob(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        fs::read(self.path_of(name)).map_err(|e| StorageError::io(name, e))
    }

    /// Read a blob by absolute path (used for the persisted current-map path)
    pub fn read_path(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
        let name = path.display().to_string();
        fs::read(path).map_err(|e| StorageError::io(&name, e))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_of(name).is_file()
    }

    /// Delete a blob. Deleting a missing blob is not an error.
    pub fn delete_blob(&self, name: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_of(name)) {
            Ok(()) => {
                tracing::debug!(name, "Deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(name, e)),
        }
    }

    /// Append one record line to `name`, creating the file if needed.
    pub fn append_record(&self, name: &str, record: &str) -> Result<(), StorageError> {
        if record.contains(['\n', '\r']) {
            return Err(StorageError::InvalidRecord {
                name: name.to_string(),
            });
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(self.path_of(name))
            .map_err(|e| StorageError::io(name, e))?;

        let mut line = String::with_capacity(record.len() + 2);
        if ends_with_torn_line(&mut file).map_err(|e| StorageError::io(name, e))? {
            tracing::warn!(name, "Terminating torn record before append");
            line.push('\n');
        }
        line.push_str(record);
        line.push('\n');

        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| StorageError::io(name, e))
    }

    /// Read every complete record of `name`, in append order.
    /// A missing file yields no records.
    pub fn read_all_records(&self, name: &str) -> Result<Vec<String>, StorageError> {
        let bytes = match fs::read(self.path_of(name)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(name, e)),
        };
        let text = String::from_utf8(bytes).map_err(|_| StorageError::Encoding {
            name: name.to_string(),
        })?;

        let complete = match text.rfind('\n') {
            Some(idx) => {
                if idx + 1 < text.len() {
                    tracing::warn!(name, "Ignoring torn trailing record");
                }
                &text[..idx + 1]
            }
            None => {
                if !text.is_empty() {
                    tracing::warn!(name, "Ignoring torn trailing record");
                }
                ""
            }
        };

        Ok(complete
            .lines()
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect())
    }
}

/// Whether the file is non-empty and its last byte is not a newline
fn ends_with_torn_line(file: &mut File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
