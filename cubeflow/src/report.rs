//! The run report: one row per (stage, item) plus per-stage aggregates.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::core::{ItemKey, Lineage, Outcome, RecomputeReason, StageStatus};
use crate::errors::{ItemError, StoreError};
use crate::utils::{now_utc, Timestamp};

/// What happened to one item in one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRow {
    /// The stage.
    pub stage: String,
    /// The output item key.
    pub item: ItemKey,
    /// The outcome.
    pub outcome: Outcome,
    /// Input keys that contributed to this output.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<ItemKey>,
    /// Artifact location for usable outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<PathBuf>,
    /// Why the item was recomputed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RecomputeReason>,
    /// Why the item failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

/// Aggregate result of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    /// The stage.
    pub stage: String,
    /// Its status.
    pub status: StageStatus,
    /// Outputs kept from the cache.
    pub reused: usize,
    /// Outputs written in this run.
    pub recomputed: usize,
    /// Outputs passed through a disabled stage.
    pub skipped: usize,
    /// Outputs that failed.
    pub failed: usize,
    /// Wall time of the stage.
    pub duration_ms: f64,
    /// Location of the summary artifact, if the stage has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<PathBuf>,
}

impl StageReport {
    /// Creates an empty stage report.
    #[must_use]
    pub fn new(stage: impl Into<String>, status: StageStatus) -> Self {
        Self {
            stage: stage.into(),
            status,
            reused: 0,
            recomputed: 0,
            skipped: 0,
            failed: 0,
            duration_ms: 0.0,
            summary: None,
        }
    }

    /// Counts one row.
    pub fn count(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Reused => self.reused += 1,
            Outcome::Recomputed => self.recomputed += 1,
            Outcome::SkippedDisabled => self.skipped += 1,
            Outcome::Failed => self.failed += 1,
        }
    }

    /// Number of outputs downstream stages can read.
    #[must_use]
    pub const fn usable(&self) -> usize {
        self.reused + self.recomputed
    }
}

/// Why the driver stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaltReason {
    /// The stage that halted the run.
    pub stage: String,
    /// Its status.
    pub status: StageStatus,
    /// Human-readable cause.
    pub message: String,
}

/// Everything that happened during one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run identifier.
    pub run_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// When the run started.
    pub started_at: Timestamp,
    /// When the run finished; absent in a partial report.
    #[serde(default)]
    pub finished_at: Option<Timestamp>,
    /// Effective worker pool size.
    pub parallelism: usize,
    /// Stages recomputed unconditionally.
    #[serde(default)]
    pub forced: Vec<String>,
    /// Per-stage aggregates in execution order.
    #[serde(default)]
    pub stages: Vec<StageReport>,
    /// Per-item rows, grouped by stage in execution order, then by key.
    #[serde(default)]
    pub rows: Vec<ReportRow>,
    /// Set if the run stopped before the last stage.
    #[serde(default)]
    pub halted: Option<HaltReason>,
}

impl RunReport {
    /// Starts a report for a pipeline.
    #[must_use]
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            pipeline: pipeline.into(),
            started_at: now_utc(),
            finished_at: None,
            parallelism: 1,
            forced: Vec::new(),
            stages: Vec::new(),
            rows: Vec::new(),
            halted: None,
        }
    }

    /// Marks the report finished.
    pub fn finish(&mut self) {
        self.finished_at = Some(now_utc());
    }

    /// Returns true if every stage ran and no item failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.halted.is_none() && self.rows.iter().all(|row| row.outcome != Outcome::Failed)
    }

    /// Returns every failed row.
    #[must_use]
    pub fn failures(&self) -> Vec<&ReportRow> {
        self.rows
            .iter()
            .filter(|row| row.outcome == Outcome::Failed)
            .collect()
    }

    /// Returns the outcome of an item in a stage.
    #[must_use]
    pub fn outcome(&self, stage: &str, item: &str) -> Option<Outcome> {
        self.rows
            .iter()
            .find(|row| row.stage == stage && row.item.as_str() == item)
            .map(|row| row.outcome)
    }

    /// Returns the rows of one stage.
    pub fn rows_for_stage<'a>(&'a self, stage: &'a str) -> impl Iterator<Item = &'a ReportRow> + 'a {
        self.rows.iter().filter(move |row| row.stage == stage)
    }

    /// Returns the aggregate of one stage.
    #[must_use]
    pub fn stage(&self, stage: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Rebuilds the lineage graph from the rows.
    #[must_use]
    pub fn lineage(&self) -> Lineage {
        let mut lineage = Lineage::new();
        for row in self.rows.iter().filter(|row| !row.sources.is_empty()) {
            lineage.record(&row.stage, row.item.clone(), row.sources.clone());
        }
        lineage
    }

    /// Writes the report as pretty JSON, atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any file operation fails.
    pub fn write_json(&self, path: &Path) -> Result<(), StoreError> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|err| StoreError::io(&dir, err))?;

        let json = serde_json::to_vec_pretty(self).map_err(|err| StoreError::Serialization(err.to_string()))?;
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|err| StoreError::io(&dir, err))?;
        tmp.write_all(&json)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|err| StoreError::io(tmp.path(), err))?;
        tmp.persist(path).map_err(|err| StoreError::io(path, err.error))?;

        tracing::info!(path = %path.display(), rows = self.rows.len(), "Run report written");
        Ok(())
    }

    /// Reads a report written by [`RunReport::write_json`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable or malformed.
    pub fn read_json(path: &Path) -> Result<Self, StoreError> {
        let bytes = std::fs::read(path).map_err(|err| StoreError::io(path, err))?;
        serde_json::from_slice(&bytes).map_err(|err| StoreError::Serialization(err.to_string()))
    }
}
