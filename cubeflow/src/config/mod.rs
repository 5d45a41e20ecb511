//! Pipeline configuration.
//!
//! A configuration is a TOML document with run-level settings and one
//! `[stages.<name>]` section per stage. A stage without a section (or with
//! `enabled = false`) is skipped and its output set equals its input set.
//!
//! ```toml
//! name = "vampires"
//! version = "1.0"
//! concurrency = 4
//!
//! [stages.calibrate]
//! master_dark = "/cal/dark.fits"
//!
//! [stages.collapse]
//! force = true
//! method = "median"
//! ```

mod loader;
mod options;
mod schema;
mod upgrade;

pub use loader::{load_config, parse_config, parse_version, CURRENT_CONFIG_VERSION};
pub use options::{RunOptions, RunSettings};
pub use schema::ParamSchema;
pub use upgrade::upgrade_config;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::ConfigurationError;

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name, used for report and backup file names.
    pub name: String,

    /// Configuration format version.
    #[serde(default = "default_version")]
    pub version: String,

    /// Worker pool size per stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    /// Per-item timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_timeout_secs: Option<f64>,

    /// Per-stage sections.
    #[serde(default)]
    pub stages: BTreeMap<String, StageConfig>,

    /// Unrecognized top-level keys, reported as warnings.
    #[serde(flatten, skip_serializing)]
    pub extra: toml::Table,
}

fn default_version() -> String {
    CURRENT_CONFIG_VERSION.to_string()
}

impl PipelineConfig {
    /// Creates an empty configuration in which every stage is disabled.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            concurrency: None,
            item_timeout_secs: None,
            stages: BTreeMap::new(),
            extra: toml::Table::new(),
        }
    }

    /// Adds (or replaces) a stage section.
    #[must_use]
    pub fn with_stage(mut self, name: impl Into<String>, stage: StageConfig) -> Self {
        self.stages.insert(name.into(), stage);
        self
    }

    /// Sets the concurrency.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Returns the configuration of an enabled stage.
    ///
    /// `None` means the stage is disabled: it has no section, or its section
    /// says `enabled = false`.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageConfig> {
        self.stages.get(name).filter(|stage| stage.enabled)
    }

    /// Returns true if the stage is enabled.
    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        self.stage(name).is_some()
    }

    /// Names of configured stages with `force = true`.
    pub fn forced_stages(&self) -> impl Iterator<Item = &str> {
        self.stages
            .iter()
            .filter(|(_, stage)| stage.force)
            .map(|(name, _)| name.as_str())
    }

    /// Returns warnings for keys this version does not recognize.
    #[must_use]
    pub fn unknown_keys(&self) -> Vec<String> {
        self.extra.keys().cloned().collect()
    }

    /// Serializes the configuration back to TOML.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::Parse` if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigurationError> {
        toml::to_string_pretty(self).map_err(|err| ConfigurationError::Parse {
            path: None,
            message: err.to_string(),
        })
    }

    /// Writes `<dir>/<name>.bak.toml`, a copy of the effective configuration
    /// kept next to the products it generated.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if the file cannot be written.
    pub fn backup_to(&self, dir: &Path) -> Result<PathBuf, ConfigurationError> {
        let path = dir.join(format!("{}.bak.toml", self.name));
        let text = self.to_toml()?;
        std::fs::create_dir_all(dir).map_err(|source| ConfigurationError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        std::fs::write(&path, text).map_err(|source| ConfigurationError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Configuration backed up");
        Ok(path)
    }
}

/// Configuration of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Whether the stage runs.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Invalidate every cached artifact of this stage for the run.
    #[serde(default)]
    pub force: bool,

    /// Overrides the stage's output directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_location: Option<PathBuf>,

    /// Stage-specific parameters, opaque to the engine.
    #[serde(flatten)]
    pub params: toml::Table,
}

const fn default_enabled() -> bool {
    true
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            force: false,
            output_location: None,
            params: toml::Table::new(),
        }
    }
}

impl StageConfig {
    /// Creates an enabled stage section without parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a disabled stage section.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets `force`.
    #[must_use]
    pub const fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Sets the output location.
    #[must_use]
    pub fn with_output_location(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_location = Some(dir.into());
        self
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Returns a typed view over the parameters.
    #[must_use]
    pub fn params(&self) -> StageParams {
        StageParams::new(self.params.clone())
    }
}

/// Stage parameters handed to a transformation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageParams {
    values: toml::Table,
}

impl StageParams {
    /// Wraps a parameter table.
    #[must_use]
    pub const fn new(values: toml::Table) -> Self {
        Self { values }
    }

    /// Returns the raw value of a parameter.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<&toml::Value> {
        self.values.get(key)
    }

    /// Deserializes a parameter.
    ///
    /// Returns `Ok(None)` if the parameter is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the value has the wrong shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, toml::de::Error> {
        self.values.get(key).cloned().map(toml::Value::try_into).transpose()
    }

    /// Deserializes a parameter or falls back to a default.
    ///
    /// # Errors
    ///
    /// Returns an error if the value has the wrong shape.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, toml::de::Error> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Returns true if the parameter is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Iterates over parameter names.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}
