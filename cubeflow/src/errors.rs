//! Error types for the cubeflow engine.
//!
//! Errors are split by how far they are allowed to travel:
//! - [`ItemError`] never leaves the stage runner; it is recorded in the run report.
//! - [`ConfigurationError`], [`PipelineValidationError`] and report write failures
//!   halt the driver and surface as [`CubeflowError`].
//! - [`StoreError`] is item-level inside the runner and fatal everywhere else.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for cubeflow operations.
#[derive(Debug, Error)]
pub enum CubeflowError {
    /// The pipeline definition is invalid.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// The configuration is unusable for this run.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// An artifact store operation failed outside of a stage runner.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Item discovery failed.
    #[error("{0}")]
    Discovery(#[from] DiscoveryError),

    /// The run report could not be persisted.
    #[error("Failed to persist run report: {0}")]
    Report(#[source] StoreError),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error raised when a pipeline definition fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Hint for fixing the definition.
    pub fix_hint: Option<String>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            fix_hint: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }
}

/// Fatal configuration problems. Any of these halts the driver before the
/// affected stage starts work.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// An enabled stage lacks a parameter it structurally requires.
    #[error("Stage '{stage}' is enabled but missing required parameter '{parameter}'")]
    MissingParameter {
        /// The stage name.
        stage: String,
        /// The missing parameter.
        parameter: String,
    },

    /// A parameter is present but unusable.
    #[error("Stage '{stage}' parameter '{parameter}' is invalid: {message}")]
    InvalidParameter {
        /// The stage name.
        stage: String,
        /// The parameter name.
        parameter: String,
        /// What is wrong with it.
        message: String,
    },

    /// The force-set names a stage the pipeline does not define.
    #[error("Cannot force unknown stage '{stage}'")]
    UnknownForcedStage {
        /// The unknown stage name.
        stage: String,
    },

    /// A run-level setting is out of range.
    #[error("Invalid setting '{setting}': {message}")]
    InvalidSetting {
        /// The setting name.
        setting: String,
        /// What is wrong with it.
        message: String,
    },

    /// The configuration version string could not be parsed.
    #[error("Invalid configuration version '{version}'")]
    InvalidVersion {
        /// The offending version string.
        version: String,
    },

    /// The configuration was written for an incompatible engine version.
    #[error("Configuration version {found} is not compatible with supported version {supported}")]
    IncompatibleVersion {
        /// Version found in the file.
        found: String,
        /// Version supported by this build.
        supported: String,
    },

    /// The configuration text could not be parsed or serialized.
    #[error("Failed to parse configuration{}: {message}", path.as_ref().map(|p| format!(" {}", p.display())).unwrap_or_default())]
    Parse {
        /// The file, when loading from disk.
        path: Option<PathBuf>,
        /// Parser message.
        message: String,
    },

    /// The configuration file could not be read or written.
    #[error("Configuration I/O error at {}: {source}", path.display())]
    Io {
        /// The file path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by artifact stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No artifact exists for the key.
    #[error("Artifact not found: {stage}/{key}")]
    NotFound {
        /// The stage name.
        stage: String,
        /// The item key.
        key: String,
    },

    /// A discovered source file is gone.
    #[error("Source not found: {}", path.display())]
    SourceNotFound {
        /// The source path.
        path: PathBuf,
    },

    /// An I/O operation failed.
    #[error("I/O error at {}: {source}", location.display())]
    Io {
        /// The artifact location.
        location: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Report or metadata serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Creates an I/O error for a location.
    #[must_use]
    pub fn io(location: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            location: location.into(),
            source,
        }
    }

    /// Returns true if the error means "nothing there".
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::SourceNotFound { .. })
    }
}

/// Errors raised while discovering input items.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Two inputs map to the same item key.
    #[error("Duplicate item key '{key}' for {} and {}", first.display(), second.display())]
    DuplicateKey {
        /// The colliding key.
        key: String,
        /// The first path.
        first: PathBuf,
        /// The second path.
        second: PathBuf,
    },

    /// A path maps to a key the engine keeps for its own artifacts.
    #[error("Item key '{key}' of {} is reserved", path.display())]
    ReservedKey {
        /// The reserved key.
        key: String,
        /// The offending path.
        path: PathBuf,
    },

    /// A path has no usable file name.
    #[error("Cannot derive an item key from {}", path.display())]
    InvalidPath {
        /// The path.
        path: PathBuf,
    },

    /// A manifest or directory could not be read.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// The path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file-name pattern is not a valid regular expression.
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Why a single item failed within a stage.
///
/// Recorded in the run report; never propagated past the stage runner.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemError {
    /// The transformation returned an error.
    #[error("Transform failed: {message}")]
    Transform {
        /// The error chain, rendered.
        message: String,
    },

    /// A required upstream artifact is absent for this item.
    #[error("Mandatory input missing: stage '{upstream}' has no valid artifact for '{item}'")]
    MandatoryInputMissing {
        /// The upstream stage.
        upstream: String,
        /// The upstream item key.
        item: String,
    },

    /// Reading an input or writing the output failed.
    #[error("Store I/O failed: {message}")]
    StoreIo {
        /// The store error, rendered.
        message: String,
    },

    /// The item exceeded its deadline.
    #[error("Timed out after {after_ms} ms")]
    Timeout {
        /// The deadline in milliseconds.
        after_ms: u64,
    },

    /// The run was cancelled before the item was dispatched.
    #[error("Cancelled: {reason}")]
    Cancelled {
        /// The cancellation reason.
        reason: String,
    },

    /// The transformation panicked.
    #[error("Transform panicked: {message}")]
    Panicked {
        /// The join error, rendered.
        message: String,
    },

    /// A fixed-size fan-in group could not be filled.
    #[error("Incomplete group: expected {expected} members, found {found}")]
    IncompleteGroup {
        /// Required group size.
        expected: usize,
        /// Members available.
        found: usize,
    },

    /// The unit would write over a stage's summary artifact.
    #[error("Output key '{key}' is reserved")]
    ReservedKey {
        /// The reserved key.
        key: String,
    },

    /// The transformation produced the wrong number of outputs.
    #[error("Expected {expected} outputs, transform produced {produced}")]
    OutputCount {
        /// Outputs the stage cardinality requires.
        expected: usize,
        /// Outputs actually produced.
        produced: usize,
    },
}

impl ItemError {
    /// Wraps a transform error, keeping its full context chain.
    #[must_use]
    pub fn transform(err: &anyhow::Error) -> Self {
        Self::Transform {
            message: format!("{err:#}"),
        }
    }

    /// Wraps a store error.
    #[must_use]
    pub fn store(err: &StoreError) -> Self {
        Self::StoreIo {
            message: err.to_string(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Creates a missing-input error.
    #[must_use]
    pub fn missing_input(upstream: impl Into<String>, item: impl Into<String>) -> Self {
        Self::MandatoryInputMissing {
            upstream: upstream.into(),
            item: item.into(),
        }
    }

    /// Short machine-readable kind, used in events.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transform { .. } => "transform",
            Self::MandatoryInputMissing { .. } => "mandatory_input_missing",
            Self::StoreIo { .. } => "store_io",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled { .. } => "cancelled",
            Self::Panicked { .. } => "panicked",
            Self::IncompleteGroup { .. } => "incomplete_group",
            Self::OutputCount { .. } => "output_count",
            Self::ReservedKey { .. } => "reserved_key",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_builder() {
        let err = PipelineValidationError::new("Stage 'b' depends on unknown stage 'a'")
            .with_stages(vec!["b".to_string(), "a".to_string()])
            .with_fix_hint("Add 'a' before 'b'.");

        assert_eq!(err.stages.len(), 2);
        assert!(err.to_string().contains("unknown stage 'a'"));
        assert_eq!(err.fix_hint.as_deref(), Some("Add 'a' before 'b'."));
    }

    #[test]
    fn test_item_error_transform_keeps_context() {
        let err = anyhow::anyhow!("division by zero").context("normalizing frame 3");
        let item = ItemError::transform(&err);

        assert_eq!(
            item,
            ItemError::Transform {
                message: "normalizing frame 3: division by zero".to_string()
            }
        );
        assert_eq!(item.kind(), "transform");
    }

    #[test]
    fn test_item_error_serializes_with_kind_tag() {
        let err = ItemError::missing_input("register", "exp_0001");
        let json = serde_json::to_value(&err).unwrap();

        assert_eq!(json["kind"], "mandatory_input_missing");
        assert_eq!(json["upstream"], "register");

        let back: ItemError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_timeout_error_millis() {
        let err = ItemError::timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Timed out after 1500 ms");
    }

    #[test]
    fn test_store_error_not_found() {
        let err = StoreError::NotFound {
            stage: "collapse".to_string(),
            key: "exp_0001".to_string(),
        };
        assert!(err.is_not_found());
        assert!(!StoreError::io("/tmp/x", std::io::Error::other("disk full")).is_not_found());
    }

    #[test]
    fn test_configuration_error_converts() {
        let err: CubeflowError = ConfigurationError::UnknownForcedStage {
            stage: "polarimetry".to_string(),
        }
        .into();
        assert!(matches!(err, CubeflowError::Configuration(_)));
        assert_eq!(err.to_string(), "Cannot force unknown stage 'polarimetry'");
    }
}
