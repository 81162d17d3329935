//! Atomic JSON snapshots on disk.
//!
//! Caches and job state are small JSON documents rewritten as a whole. A
//! snapshot is written to a sibling temp file, synced, then renamed over the
//! target so a crash never leaves a half-written file behind.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

/// Errors from reading or writing a JSON snapshot.
#[derive(Debug, Error)]
pub enum PersistError {
    /// File system failure.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file being read or written.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The snapshot could not be encoded or decoded.
    #[error("invalid JSON in {path}: {source}")]
    Json {
        /// The file being read or written.
        path: PathBuf,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

impl PersistError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Reads a snapshot. Returns `Ok(None)` when the file does not exist.
///
/// # Errors
///
/// Returns [`PersistError`] when the file cannot be read or does not decode.
#[instrument(skip_all, fields(path = %path.display()))]
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PersistError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| PersistError::json(path, e))
}

/// Writes a snapshot atomically (temp file, fsync, rename).
///
/// # Errors
///
/// Returns [`PersistError`] when encoding or any file operation fails.
#[instrument(skip_all, fields(path = %path.display()))]
pub async fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), PersistError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| PersistError::json(path, e))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PersistError::io(parent, e))?;
    }

    let tmp = temp_path(path);
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| PersistError::io(&tmp, e))?;
    file.write_all(&bytes)
        .await
        .map_err(|e| PersistError::io(&tmp, e))?;
    file.sync_all().await.map_err(|e| PersistError::io(&tmp, e))?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| PersistError::io(path, e))?;

    debug!(bytes = bytes.len(), "snapshot written");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
