//! Artifact stores.
//!
//! A store maps `(stage, item)` to a materialized location and its
//! modification time. Timestamps are the only staleness signal; stores never
//! hash content.

mod fs;
mod memory;

pub use fs::FsArtifactStore;
pub use memory::InMemoryArtifactStore;

use std::path::{Path, PathBuf};

use crate::core::{Artifact, ItemKey};
use crate::errors::StoreError;
use crate::utils::{from_system_time, Timestamp};

/// Persistent per-stage, per-item output cache.
///
/// Implementations must make `write` atomic with respect to concurrent reads:
/// a reader sees either the previous artifact or the new one, never a torn
/// file.
#[cfg_attr(test, mockall::automock)]
pub trait ArtifactStore: Send + Sync {
    /// Where the artifact for `(stage, key)` lives (or would live).
    fn location(&self, stage: &str, key: &ItemKey) -> PathBuf;

    /// Modification time of an existing artifact.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if nothing has been written.
    fn mod_time(&self, stage: &str, key: &ItemKey) -> Result<Timestamp, StoreError>;

    /// Writes (or overwrites) an artifact.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the data could not be persisted.
    fn write(&self, stage: &str, key: &ItemKey, data: &[u8]) -> Result<Artifact, StoreError>;

    /// Reads an artifact's data.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if nothing has been written.
    fn read(&self, stage: &str, key: &ItemKey) -> Result<Vec<u8>, StoreError>;

    /// Records the input keys an aggregate artifact (fan-in output or
    /// summary) was built from.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the record could not be persisted.
    fn write_members(&self, stage: &str, key: &ItemKey, members: &[ItemKey]) -> Result<(), StoreError>;

    /// The members recorded for an artifact, `None` if none were recorded.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` or `StoreError::Serialization` if an existing
    /// record cannot be read.
    fn members(&self, stage: &str, key: &ItemKey) -> Result<Option<Vec<ItemKey>>, StoreError>;

    /// Returns true if an artifact exists.
    fn exists(&self, stage: &str, key: &ItemKey) -> bool {
        self.mod_time(stage, key).is_ok()
    }

    /// Looks up an artifact, mapping "not found" to `None`.
    ///
    /// # Errors
    ///
    /// Propagates every store error except "not found".
    fn artifact(&self, stage: &str, key: &ItemKey) -> Result<Option<Artifact>, StoreError> {
        lookup_artifact(self, stage, key)
    }

    /// Modification time of a discovered source file.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::SourceNotFound` if the file is gone.
    fn source_mod_time(&self, path: &Path) -> Result<Timestamp, StoreError> {
        file_mod_time(path).map_err(|err| match err {
            StoreError::NotFound { .. } => StoreError::SourceNotFound {
                path: path.to_path_buf(),
            },
            other => other,
        })
    }

    /// Reads a discovered source file.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::SourceNotFound` if the file is gone.
    fn read_source(&self, path: &Path) -> Result<Vec<u8>, StoreError> {
        std::fs::read(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                StoreError::SourceNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                StoreError::io(path, err)
            }
        })
    }
}

/// Builds an [`Artifact`] from a store's `mod_time` and `location`.
///
/// # Errors
///
/// Propagates every store error except "not found".
pub fn lookup_artifact<S: ArtifactStore + ?Sized>(
    store: &S,
    stage: &str,
    key: &ItemKey,
) -> Result<Option<Artifact>, StoreError> {
    match store.mod_time(stage, key) {
        Ok(modified) => Ok(Some(Artifact {
            stage: stage.to_string(),
            key: key.clone(),
            location: store.location(stage, key),
            modified,
        })),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Returns true if `recorded` and `current` name the same keys, in any order.
#[must_use]
pub fn same_members(recorded: &[ItemKey], current: &[ItemKey]) -> bool {
    let mut recorded = recorded.to_vec();
    let mut current = current.to_vec();
    recorded.sort();
    recorded.dedup();
    current.sort();
    current.dedup();
    recorded == current
}

/// Reads a file's mtime, mapping a missing file to `StoreError::NotFound`.
pub(crate) fn file_mod_time(path: &Path) -> Result<Timestamp, StoreError> {
    let not_found = || StoreError::NotFound {
        stage: path
            .parent()
            .and_then(Path::file_name)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        key: path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };

    let metadata = std::fs::metadata(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            not_found()
        } else {
            StoreError::io(path, err)
        }
    })?;

    metadata
        .modified()
        .map(from_system_time)
        .map_err(|err| StoreError::io(path, err))
}
