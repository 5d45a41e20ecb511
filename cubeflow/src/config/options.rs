//! Per-run options and their resolution against a configuration.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use super::PipelineConfig;
use crate::errors::ConfigurationError;

/// Operator-supplied options for one run, typically parsed by a CLI.
///
/// Values set here override the configuration file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stages whose cached artifacts are invalid for this run.
    pub force: BTreeSet<String>,
    /// Worker pool size per stage.
    pub concurrency: Option<NonZeroUsize>,
    /// Per-item timeout.
    pub item_timeout: Option<Duration>,
    /// Where to persist the run report.
    pub report_path: Option<PathBuf>,
}

impl RunOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a stage to the force-set.
    #[must_use]
    pub fn force(mut self, stage: impl Into<String>) -> Self {
        self.force.insert(stage.into());
        self
    }

    /// Sets the concurrency; zero is treated as one.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(NonZeroUsize::new(concurrency).unwrap_or(NonZeroUsize::MIN));
        self
    }

    /// Sets the per-item timeout.
    #[must_use]
    pub const fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = Some(timeout);
        self
    }

    /// Sets the report path.
    #[must_use]
    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }
}

/// Effective settings of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Union of the options' force list and configured `force = true` stages.
    pub force: BTreeSet<String>,
    /// Worker pool size, default 1.
    pub parallelism: NonZeroUsize,
    /// Per-item timeout, if any.
    pub item_timeout: Option<Duration>,
    /// Where to persist the run report.
    pub report_path: Option<PathBuf>,
}

impl RunSettings {
    /// Merges options over the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::UnknownForcedStage` if the force-set names
    /// a stage outside `known_stages`, and `InvalidSetting` for unusable
    /// configured values.
    pub fn resolve<'a>(
        config: &PipelineConfig,
        options: &RunOptions,
        known_stages: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, ConfigurationError> {
        let known: BTreeSet<&str> = known_stages.into_iter().collect();

        let force: BTreeSet<String> = options
            .force
            .iter()
            .map(String::as_str)
            .chain(config.forced_stages())
            .map(str::to_string)
            .collect();
        if let Some(unknown) = force.iter().find(|name| !known.contains(name.as_str())) {
            return Err(ConfigurationError::UnknownForcedStage {
                stage: unknown.clone(),
            });
        }

        let parallelism = match (options.concurrency, config.concurrency) {
            (Some(n), _) => n,
            (None, Some(n)) => NonZeroUsize::new(n).ok_or_else(|| ConfigurationError::InvalidSetting {
                setting: "concurrency".to_string(),
                message: "must be at least 1".to_string(),
            })?,
            (None, None) => NonZeroUsize::MIN,
        };

        let item_timeout = match (options.item_timeout, config.item_timeout_secs) {
            (Some(timeout), _) => Some(timeout),
            (None, Some(secs)) => Some(Duration::try_from_secs_f64(secs).map_err(|err| {
                ConfigurationError::InvalidSetting {
                    setting: "item_timeout_secs".to_string(),
                    message: err.to_string(),
                }
            })?),
            (None, None) => None,
        };

        Ok(Self {
            force,
            parallelism,
            item_timeout,
            report_path: options.report_path.clone(),
        })
    }
}
