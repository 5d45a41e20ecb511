//! Item identity and lineage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Suffixes stripped from source file names when deriving keys, longest first.
const DATA_SUFFIXES: &[&str] = &[
    ".fits.fz", ".fits.gz", ".fit.fz", ".fit.gz", ".fts.fz", ".fts.gz", ".fits", ".fit", ".fts",
];

/// Stable identity of one unit of work (one data cube).
///
/// Keys order lexically; every ordered pass in the engine (dispatch at
/// parallelism 1, summary aggregation, report rows) uses this ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemKey(String);

impl ItemKey {
    /// Creates a key from any string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derives a key from a source path: the file name with FITS-style
    /// extensions (including `.fz`/`.gz` compression) removed.
    ///
    /// Returns `None` for paths without a file name.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let lower = name.to_ascii_lowercase();
        let stem = DATA_SUFFIXES
            .iter()
            .find(|suffix| lower.ends_with(*suffix) && lower.len() > suffix.len())
            .map_or_else(
                || path.file_stem().and_then(|s| s.to_str()).unwrap_or(name),
                |suffix| &name[..name.len() - suffix.len()],
            );

        if stem.is_empty() {
            None
        } else {
            Some(Self(stem.to_string()))
        }
    }

    /// Key of a fan-out product, e.g. `exp_0001` + `flc1` -> `exp_0001_flc1`.
    #[must_use]
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self(format!("{}_{}", self.0, suffix))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the key stages store their summary under.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.0 == super::SUMMARY_KEY
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A discovered input: its key and where its raw data lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// The item key.
    pub key: ItemKey,
    /// The source file.
    pub source: PathBuf,
}

impl Item {
    /// Creates an item with an explicit key.
    #[must_use]
    pub fn new(key: impl Into<ItemKey>, source: impl Into<PathBuf>) -> Self {
        Self {
            key: key.into(),
            source: source.into(),
        }
    }

    /// Creates an item whose key is derived from the source path.
    #[must_use]
    pub fn from_path(source: impl Into<PathBuf>) -> Option<Self> {
        let source = source.into();
        let key = ItemKey::from_path(&source)?;
        Some(Self { key, source })
    }
}

impl From<String> for ItemKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Which input keys contributed to each output key, per stage.
///
/// One-to-one stages map a key to itself, fan-out stages map every product
/// to its parent and fan-in stages map the aggregate to all members.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    stages: BTreeMap<String, BTreeMap<ItemKey, Vec<ItemKey>>>,
}

impl Lineage {
    /// Creates an empty lineage graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the parents of an output produced by `stage`.
    pub fn record(&mut self, stage: &str, output: ItemKey, parents: Vec<ItemKey>) {
        self.stages
            .entry(stage.to_string())
            .or_default()
            .insert(output, parents);
    }

    /// Returns the direct parents of an output.
    #[must_use]
    pub fn parents(&self, stage: &str, output: &ItemKey) -> Option<&[ItemKey]> {
        self.stages
            .get(stage)
            .and_then(|outputs| outputs.get(output))
            .map(Vec::as_slice)
    }

    /// Walks back through `stages` (in pipeline order, up to and including the
    /// stage that produced `output`) and returns the original item keys.
    #[must_use]
    pub fn origins(&self, stages: &[String], output: &ItemKey) -> Vec<ItemKey> {
        let mut frontier = vec![output.clone()];
        for stage in stages.iter().rev() {
            let mut next = Vec::new();
            for key in frontier {
                match self.parents(stage, &key) {
                    Some(parents) => next.extend(parents.iter().cloned()),
                    None => next.push(key),
                }
            }
            next.sort();
            next.dedup();
            frontier = next;
        }
        frontier
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_fits_paths() {
        let cases = [
            ("/data/raw/VMPA0001.fits", "VMPA0001"),
            ("/data/raw/VMPA0001.fits.fz", "VMPA0001"),
            ("VMPA0002.FITS", "VMPA0002"),
            ("cube.fts.gz", "cube"),
            ("notes.txt", "notes"),
            ("plain", "plain"),
        ];

        for (path, expected) in cases {
            assert_eq!(
                ItemKey::from_path(Path::new(path)).unwrap().as_str(),
                expected,
                "path {path}"
            );
        }
    }

    #[test]
    fn test_key_from_bare_extension_is_kept() {
        assert_eq!(
            ItemKey::from_path(Path::new(".fits")).unwrap().as_str(),
            ".fits"
        );
        assert!(ItemKey::from_path(Path::new("/")).is_none());
    }

    #[test]
    fn test_with_suffix() {
        let key = ItemKey::new("exp_0001");
        assert_eq!(key.with_suffix("flc1").as_str(), "exp_0001_flc1");
    }

    #[test]
    fn test_summary_key_is_reserved() {
        assert!(ItemKey::new("__summary__").is_reserved());
        assert!(ItemKey::from_path(Path::new("/raw/__summary__.fits")).unwrap().is_reserved());
        assert!(!ItemKey::new("summary").is_reserved());
    }

    #[test]
    fn test_lineage_origins_through_fan_out_and_fan_in() {
        let stages = vec![
            "calibrate".to_string(),
            "deinterleave".to_string(),
            "combine".to_string(),
        ];
        let mut lineage = Lineage::new();
        for key in ["a", "b"] {
            lineage.record("calibrate", key.into(), vec![key.into()]);
            lineage.record(
                "deinterleave",
                ItemKey::new(key).with_suffix("flc1"),
                vec![key.into()],
            );
        }
        lineage.record(
            "combine",
            "all".into(),
            vec![ItemKey::new("a_flc1"), ItemKey::new("b_flc1")],
        );

        assert_eq!(
            lineage.origins(&stages, &"all".into()),
            vec![ItemKey::new("a"), ItemKey::new("b")]
        );
        assert_eq!(
            lineage.parents("combine", &"all".into()).map(<[ItemKey]>::len),
            Some(2)
        );
    }
}
