//! Filesystem-backed artifact store.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{file_mod_time, ArtifactStore};
use crate::config::PipelineConfig;
use crate::core::{Artifact, ItemKey};
use crate::errors::StoreError;
use crate::utils::Timestamp;

/// Default artifact file extension.
pub const DEFAULT_EXTENSION: &str = "fits";

/// Sub-directory of a stage directory holding member records.
const MEMBERS_DIR: &str = ".members";

/// Stores artifacts as `<root>/<stage>/<key>.<extension>`.
///
/// A stage's directory can be moved with [`Self::with_stage_dir`], which is
/// how a stage's `output_location` setting is honored.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
    stage_dirs: HashMap<String, PathBuf>,
    extension: String,
}

impl FsArtifactStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            stage_dirs: HashMap::new(),
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    /// Creates a store and applies every configured `output_location`.
    ///
    /// Relative locations are resolved against `root`.
    #[must_use]
    pub fn from_config(root: impl Into<PathBuf>, config: &PipelineConfig) -> Self {
        config
            .stages
            .iter()
            .filter_map(|(name, stage)| stage.output_location.as_ref().map(|dir| (name, dir)))
            .fold(Self::new(root), |store, (name, dir)| {
                let dir = if dir.is_absolute() {
                    dir.clone()
                } else {
                    store.root.join(dir)
                };
                store.with_stage_dir(name.clone(), dir)
            })
    }

    /// Overrides the output directory of one stage.
    #[must_use]
    pub fn with_stage_dir(mut self, stage: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        self.stage_dirs.insert(stage.into(), dir.into());
        self
    }

    /// Sets the artifact file extension.
    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Returns the store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stage_dir(&self, stage: &str) -> PathBuf {
        self.stage_dirs
            .get(stage)
            .cloned()
            .unwrap_or_else(|| self.root.join(stage))
    }

    fn members_location(&self, stage: &str, key: &ItemKey) -> PathBuf {
        self.stage_dir(stage)
            .join(MEMBERS_DIR)
            .join(format!("{}.json", key.as_str()))
    }
}

/// Writes `data` to a temporary file next to `location`, then renames it.
fn write_atomic(location: &Path, data: &[u8]) -> Result<(), StoreError> {
    let dir = location.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|err| StoreError::io(dir, err))?;

    // Temp file in the destination directory so the rename stays on one filesystem.
    let mut tmp = NamedTempFile::new_in(dir).map_err(|err| StoreError::io(dir, err))?;
    tmp.write_all(data)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|err| StoreError::io(tmp.path(), err))?;
    tmp.persist(location)
        .map_err(|err| StoreError::io(location, err.error))?;
    Ok(())
}

impl ArtifactStore for FsArtifactStore {
    fn location(&self, stage: &str, key: &ItemKey) -> PathBuf {
        self.stage_dir(stage)
            .join(format!("{}.{}", key.as_str(), self.extension))
    }

    fn mod_time(&self, stage: &str, key: &ItemKey) -> Result<Timestamp, StoreError> {
        file_mod_time(&self.location(stage, key)).map_err(|err| match err {
            StoreError::NotFound { .. } => StoreError::NotFound {
                stage: stage.to_string(),
                key: key.to_string(),
            },
            other => other,
        })
    }

    fn write(&self, stage: &str, key: &ItemKey, data: &[u8]) -> Result<Artifact, StoreError> {
        let location = self.location(stage, key);
        write_atomic(&location, data)?;

        let modified = file_mod_time(&location)?;
        tracing::trace!(stage, item = %key, location = %location.display(), "Artifact written");

        Ok(Artifact {
            stage: stage.to_string(),
            key: key.clone(),
            location,
            modified,
        })
    }

    fn read(&self, stage: &str, key: &ItemKey) -> Result<Vec<u8>, StoreError> {
        let location = self.location(stage, key);
        std::fs::read(&location).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound {
                    stage: stage.to_string(),
                    key: key.to_string(),
                }
            } else {
                StoreError::io(&location, err)
            }
        })
    }

    fn write_members(&self, stage: &str, key: &ItemKey, members: &[ItemKey]) -> Result<(), StoreError> {
        let data = serde_json::to_vec(members).map_err(|err| StoreError::Serialization(err.to_string()))?;
        write_atomic(&self.members_location(stage, key), &data)
    }

    fn members(&self, stage: &str, key: &ItemKey) -> Result<Option<Vec<ItemKey>>, StoreError> {
        let location = self.members_location(stage, key);
        let data = match std::fs::read(&location) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::io(&location, err)),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|err| StoreError::Serialization(format!("{}: {err}", location.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_location_layout() {
        let store = FsArtifactStore::new("/products").with_stage_dir("register", "/scratch/reg");
        assert_eq!(
            store.location("calibrate", &"exp_0001".into()),
            PathBuf::from("/products/calibrate/exp_0001.fits")
        );
        assert_eq!(
            store.location("register", &"exp_0001".into()),
            PathBuf::from("/scratch/reg/exp_0001.fits")
        );
    }

    #[test]
    fn test_write_read_and_mod_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).with_extension("bin");
        let key = ItemKey::new("exp_0001");

        assert!(!store.exists("calibrate", &key));
        let artifact = store.write("calibrate", &key, b"cube").unwrap();

        assert!(store.exists("calibrate", &key));
        assert_eq!(store.read("calibrate", &key).unwrap(), b"cube".to_vec());
        assert_eq!(store.mod_time("calibrate", &key).unwrap(), artifact.modified);
        assert_eq!(artifact.location, dir.path().join("calibrate/exp_0001.bin"));
    }

    #[test]
    fn test_overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let key = ItemKey::new("exp_0001");

        store.write("calibrate", &key, b"first").unwrap();
        store.write("calibrate", &key, b"second").unwrap();

        assert_eq!(store.read("calibrate", &key).unwrap(), b"second".to_vec());
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("calibrate"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("exp_0001.fits")]);
    }

    #[test]
    fn test_members_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let key = ItemKey::new("all");

        assert_eq!(store.members("combine", &key).unwrap(), None);
        store.write_members("combine", &key, &["a".into(), "c".into()]).unwrap();
        assert_eq!(
            store.members("combine", &key).unwrap(),
            Some(vec![ItemKey::new("a"), ItemKey::new("c")])
        );
        assert!(dir.path().join("combine/.members/all.json").is_file());

        std::fs::write(dir.path().join("combine/.members/all.json"), b"not json").unwrap();
        assert!(matches!(
            store.members("combine", &key),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());

        let err = store.read("calibrate", &"ghost".into()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { ref stage, .. } if stage == "calibrate"));
        assert!(store.artifact("calibrate", &"ghost".into()).unwrap().is_none());
    }

    #[test]
    fn test_from_config_output_locations() {
        let config: PipelineConfig = toml::from_str(
            r#"
            name = "vampires"

            [stages.calibrate]
            output_location = "cal"

            [stages.collapse]
            output_location = "/abs/collapsed"
            "#,
        )
        .unwrap();

        let store = FsArtifactStore::from_config("/products", &config);
        assert_eq!(
            store.location("calibrate", &"a".into()),
            PathBuf::from("/products/cal/a.fits")
        );
        assert_eq!(
            store.location("collapse", &"a".into()),
            PathBuf::from("/abs/collapsed/a.fits")
        );
    }

    #[test]
    fn test_source_access() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("exp_0001.fits");
        std::fs::write(&source, b"raw").unwrap();
        let store = FsArtifactStore::new(dir.path());

        assert_eq!(store.read_source(&source).unwrap(), b"raw".to_vec());
        assert!(store.source_mod_time(&source).is_ok());

        let err = store.source_mod_time(&dir.path().join("missing.fits")).unwrap_err();
        assert!(matches!(err, StoreError::SourceNotFound { .. }));
    }
}
