//! Item discovery.
//!
//! Items are discovered once at run start. Keys are derived from file names
//! (see [`ItemKey::from_path`]) and must be unique; the returned list is
//! ordered by key.

use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::{Item, ItemKey};
use crate::errors::DiscoveryError;

/// Builds the ordered item list from explicit paths.
///
/// # Errors
///
/// Returns `DiscoveryError::DuplicateKey` if two paths map to the same key,
/// `DiscoveryError::ReservedKey` if a path maps to the summary key and
/// `DiscoveryError::InvalidPath` if a key cannot be derived.
pub fn discover_paths<I, P>(paths: I) -> Result<Vec<Item>, DiscoveryError>
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    let mut items: BTreeMap<ItemKey, PathBuf> = BTreeMap::new();

    for path in paths {
        let path = path.into();
        let key = ItemKey::from_path(&path).ok_or_else(|| DiscoveryError::InvalidPath {
            path: path.clone(),
        })?;
        if key.is_reserved() {
            return Err(DiscoveryError::ReservedKey {
                key: key.to_string(),
                path,
            });
        }
        if let Some(first) = items.get(&key) {
            return Err(DiscoveryError::DuplicateKey {
                key: key.to_string(),
                first: first.clone(),
                second: path,
            });
        }
        items.insert(key, path);
    }

    tracing::debug!(count = items.len(), "Discovered items");
    Ok(items
        .into_iter()
        .map(|(key, source)| Item { key, source })
        .collect())
}

/// Reads a text manifest with one path per line.
///
/// Blank lines and lines starting with `#` are ignored. Relative paths are
/// resolved against the manifest's directory.
///
/// # Errors
///
/// Returns `DiscoveryError::Io` if the manifest cannot be read, plus every
/// error of [`discover_paths`].
pub fn read_manifest(manifest: &Path) -> Result<Vec<Item>, DiscoveryError> {
    let text = std::fs::read_to_string(manifest).map_err(|source| DiscoveryError::Io {
        path: manifest.to_path_buf(),
        source,
    })?;
    let base = manifest.parent().unwrap_or_else(|| Path::new(""));

    discover_paths(
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| {
                let path = Path::new(line);
                if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    base.join(path)
                }
            }),
    )
}

/// Lists the files in `dir` whose names match `pattern`.
///
/// Sub-directories are not descended into.
///
/// # Errors
///
/// Returns `DiscoveryError::Io` if the directory cannot be listed, plus every
/// error of [`discover_paths`].
pub fn discover_matching(dir: &Path, pattern: &Regex) -> Result<Vec<Item>, DiscoveryError> {
    let io_error = |source: std::io::Error| DiscoveryError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let entry = entry.map_err(io_error)?;
        if !entry.file_type().map_err(io_error)?.is_file() {
            continue;
        }
        if pattern.is_match(&entry.file_name().to_string_lossy()) {
            paths.push(entry.path());
        }
    }

    discover_paths(paths)
}

/// Compiles a file-name pattern.
///
/// # Errors
///
/// Returns `DiscoveryError::Pattern` for an invalid regular expression.
pub fn compile_pattern(pattern: &str) -> Result<Regex, DiscoveryError> {
    Ok(Regex::new(pattern)?)
}
