//! In-memory artifact store.

use chrono::Duration;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use super::ArtifactStore;
use crate::core::{Artifact, ItemKey};
use crate::errors::StoreError;
use crate::utils::{now_utc, Timestamp};

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    modified: Timestamp,
}

/// A concurrent in-memory store with a logical clock.
///
/// Every write (and every [`Self::touch`]) is stamped one millisecond after
/// the previous one, so ordering never depends on filesystem resolution.
/// Sources can be registered with [`Self::add_source`].
#[derive(Debug)]
pub struct InMemoryArtifactStore {
    artifacts: DashMap<(String, ItemKey), Entry>,
    members: DashMap<(String, ItemKey), Vec<ItemKey>>,
    sources: DashMap<PathBuf, Entry>,
    epoch: Timestamp,
    clock: AtomicI64,
}

impl Default for InMemoryArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryArtifactStore {
    /// Creates an empty store whose clock starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            artifacts: DashMap::new(),
            members: DashMap::new(),
            sources: DashMap::new(),
            epoch: now_utc(),
            clock: AtomicI64::new(0),
        }
    }

    /// Advances the logical clock and returns the new time.
    pub fn tick(&self) -> Timestamp {
        let step = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        self.epoch + Duration::milliseconds(step)
    }

    /// Registers a source file and stamps it with the next tick.
    pub fn add_source(&self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) -> Timestamp {
        let modified = self.tick();
        self.sources.insert(
            path.into(),
            Entry {
                data: data.into(),
                modified,
            },
        );
        modified
    }

    /// Re-stamps a source file without changing its data.
    pub fn touch_source(&self, path: &Path) -> Option<Timestamp> {
        let modified = self.tick();
        self.sources.get_mut(path).map(|mut entry| {
            entry.modified = modified;
            modified
        })
    }

    /// Re-stamps an artifact without changing its data.
    pub fn touch(&self, stage: &str, key: &ItemKey) -> Option<Timestamp> {
        let modified = self.tick();
        self.set_mod_time(stage, key, modified).then_some(modified)
    }

    /// Overrides an artifact's modification time. Returns false if absent.
    pub fn set_mod_time(&self, stage: &str, key: &ItemKey, modified: Timestamp) -> bool {
        self.artifacts
            .get_mut(&(stage.to_string(), key.clone()))
            .map(|mut entry| entry.modified = modified)
            .is_some()
    }

    /// Removes an artifact and its member record. Returns true if the
    /// artifact existed.
    pub fn remove(&self, stage: &str, key: &ItemKey) -> bool {
        let id = (stage.to_string(), key.clone());
        self.members.remove(&id);
        self.artifacts.remove(&id).is_some()
    }

    /// Number of artifacts written for a stage.
    #[must_use]
    pub fn count(&self, stage: &str) -> usize {
        self.artifacts.iter().filter(|e| e.key().0 == stage).count()
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn location(&self, stage: &str, key: &ItemKey) -> PathBuf {
        PathBuf::from(format!("mem://{stage}/{key}"))
    }

    fn mod_time(&self, stage: &str, key: &ItemKey) -> Result<Timestamp, StoreError> {
        self.artifacts
            .get(&(stage.to_string(), key.clone()))
            .map(|entry| entry.modified)
            .ok_or_else(|| StoreError::NotFound {
                stage: stage.to_string(),
                key: key.to_string(),
            })
    }

    fn write(&self, stage: &str, key: &ItemKey, data: &[u8]) -> Result<Artifact, StoreError> {
        let modified = self.tick();
        self.artifacts.insert(
            (stage.to_string(), key.clone()),
            Entry {
                data: data.to_vec(),
                modified,
            },
        );

        Ok(Artifact {
            stage: stage.to_string(),
            key: key.clone(),
            location: self.location(stage, key),
            modified,
        })
    }

    fn read(&self, stage: &str, key: &ItemKey) -> Result<Vec<u8>, StoreError> {
        self.artifacts
            .get(&(stage.to_string(), key.clone()))
            .map(|entry| entry.data.clone())
            .ok_or_else(|| StoreError::NotFound {
                stage: stage.to_string(),
                key: key.to_string(),
            })
    }

    fn write_members(&self, stage: &str, key: &ItemKey, members: &[ItemKey]) -> Result<(), StoreError> {
        self.members
            .insert((stage.to_string(), key.clone()), members.to_vec());
        Ok(())
    }

    fn members(&self, stage: &str, key: &ItemKey) -> Result<Option<Vec<ItemKey>>, StoreError> {
        Ok(self
            .members
            .get(&(stage.to_string(), key.clone()))
            .map(|entry| entry.value().clone()))
    }

    fn source_mod_time(&self, path: &Path) -> Result<Timestamp, StoreError> {
        self.sources
            .get(path)
            .map(|entry| entry.modified)
            .ok_or_else(|| StoreError::SourceNotFound {
                path: path.to_path_buf(),
            })
    }

    fn read_source(&self, path: &Path) -> Result<Vec<u8>, StoreError> {
        self.sources
            .get(path)
            .map(|entry| entry.data.clone())
            .ok_or_else(|| StoreError::SourceNotFound {
                path: path.to_path_buf(),
            })
    }
}
