//! Stage-by-stage orchestration of a run.
//!
//! The driver walks the stage graph in execution order. Each enabled stage
//! goes through `Pending -> Classified -> Executing -> Completed`; stages
//! never overlap. Item failures are recorded and the run continues; a
//! configuration error, a total stage failure or a cancellation stops it.

use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use super::ledger::{LedgerEntry, Producer, RunLedger};
use super::resolver::{Decision, StalenessResolver, UnitPlan};
use super::runner::{Job, StageRunner};
use super::{StageGraph, StageSpec};
use crate::cancellation::CancellationToken;
use crate::config::{PipelineConfig, RunOptions, RunSettings, StageConfig};
use crate::core::{Artifact, Item, ItemKey, Outcome, RecomputeReason, StageStatus, SUMMARY_KEY};
use crate::errors::{ConfigurationError, CubeflowError, ItemError};
use crate::events::{EventSink, NoOpEventSink};
use crate::observability::SpanTimer;
use crate::report::{HaltReason, ReportRow, RunReport, StageReport};
use crate::stages::Summarize;
use crate::store::{same_members, ArtifactStore};
use crate::utils::format_iso8601;

/// Where the driver is in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverState {
    /// The stage is next.
    Pending(String),
    /// The stage's units have been classified.
    Classified(String),
    /// The stage's recompute set is running.
    Executing(String),
    /// The stage finished.
    Completed(String),
    /// No more stages will run.
    Done,
}

impl DriverState {
    /// The stage the state refers to.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Pending(s) | Self::Classified(s) | Self::Executing(s) | Self::Completed(s) => Some(s),
            Self::Done => None,
        }
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending(s) => write!(f, "pending({s})"),
            Self::Classified(s) => write!(f, "classified({s})"),
            Self::Executing(s) => write!(f, "executing({s})"),
            Self::Completed(s) => write!(f, "completed({s})"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// How one unit ended up.
enum Resolution {
    Reused(Vec<Artifact>),
    Recomputed(Vec<Artifact>, RecomputeReason),
    Failed(ItemError, Option<RecomputeReason>),
}

/// Runs a stage graph against an artifact store.
pub struct PipelineDriver {
    graph: StageGraph,
    store: Arc<dyn ArtifactStore>,
    events: Arc<dyn EventSink>,
    cancel: CancellationToken,
    state: Mutex<DriverState>,
}

impl fmt::Debug for PipelineDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineDriver")
            .field("pipeline", &self.graph.name())
            .field("state", &*self.state.lock())
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl PipelineDriver {
    /// Creates a driver.
    #[must_use]
    pub fn new(graph: StageGraph, store: Arc<dyn ArtifactStore>) -> Self {
        let first = graph
            .execution_order()
            .first()
            .map_or(DriverState::Done, |stage| DriverState::Pending(stage.clone()));
        Self {
            graph,
            store,
            events: Arc::new(NoOpEventSink),
            cancel: CancellationToken::new(),
            state: Mutex::new(first),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Uses an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns a handle that cancels the run.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns the current state.
    #[must_use]
    pub fn current_state(&self) -> DriverState {
        self.state.lock().clone()
    }

    /// Returns the stage graph.
    #[must_use]
    pub const fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Runs every stage over the discovered items.
    ///
    /// Item-level failures, total stage failures and cancellation are
    /// reported in the returned [`RunReport`].
    ///
    /// # Errors
    ///
    /// Returns `CubeflowError::Configuration` if the configuration is
    /// unusable; stages completed before the error keep their artifacts and
    /// a partial report is persisted when a report path is set. Returns
    /// `CubeflowError::Report` if the final report cannot be written.
    pub async fn run(
        &self,
        items: &[Item],
        config: &PipelineConfig,
        options: &RunOptions,
    ) -> Result<RunReport, CubeflowError> {
        let mut report = RunReport::new(self.graph.name());

        let known = self.graph.execution_order().iter().map(String::as_str);
        let settings = match RunSettings::resolve(config, options, known) {
            Ok(settings) => settings,
            Err(err) => return Err(self.abort(&report, options.report_path.as_deref(), err)),
        };
        report.parallelism = settings.parallelism.get();
        report.forced = settings.force.iter().cloned().collect();

        tracing::info!(
            pipeline = %self.graph.name(),
            run_id = %report.run_id,
            items = items.len(),
            parallelism = report.parallelism,
            "Run started"
        );
        self.events.try_emit(
            "run.started",
            Some(json!({
                "pipeline": self.graph.name(),
                "run_id": report.run_id.to_string(),
                "items": items.len(),
                "parallelism": report.parallelism,
                "forced": report.forced,
                "started_at": format_iso8601(&report.started_at),
            })),
        );

        let mut ledger = RunLedger::new();
        ledger.seed_sources(items, self.store.as_ref());

        let runner = StageRunner::new(Arc::clone(&self.store))
            .with_parallelism(settings.parallelism)
            .with_item_timeout(settings.item_timeout)
            .with_cancellation(self.cancel.clone())
            .with_events(Arc::clone(&self.events));

        for spec in self.graph.iter() {
            self.set_state(DriverState::Pending(spec.name.clone()));

            if self.cancel.is_cancelled() {
                let reason = self.cancel.reason().unwrap_or_default();
                report.stages.push(StageReport::new(&spec.name, StageStatus::Cancelled));
                self.halt(&mut report, &spec.name, StageStatus::Cancelled, format!("Run cancelled: {reason}"));
                break;
            }

            let stage_report = match config.stage(&spec.name) {
                None => self.pass_through(spec, &mut ledger, &mut report),
                Some(stage_config) => {
                    match self
                        .run_stage(spec, stage_config, config, &settings, &runner, &mut ledger, &mut report)
                        .await
                    {
                        Ok(stage_report) => stage_report,
                        Err(err) => return Err(self.abort(&report, settings.report_path.as_deref(), err)),
                    }
                }
            };

            let status = stage_report.status;
            tracing::info!(
                stage = %spec.name,
                status = %status,
                reused = stage_report.reused,
                recomputed = stage_report.recomputed,
                failed = stage_report.failed,
                skipped = stage_report.skipped,
                duration_ms = stage_report.duration_ms,
                "Stage completed"
            );
            self.events.try_emit(
                "stage.completed",
                Some(json!({
                    "stage": spec.name,
                    "status": status.to_string(),
                    "reused": stage_report.reused,
                    "recomputed": stage_report.recomputed,
                    "failed": stage_report.failed,
                    "skipped": stage_report.skipped,
                    "duration_ms": stage_report.duration_ms,
                })),
            );
            report.stages.push(stage_report);
            self.set_state(DriverState::Completed(spec.name.clone()));

            if status.halts_run() {
                let message = match status {
                    StageStatus::Cancelled => format!(
                        "Run cancelled: {}",
                        self.cancel.reason().unwrap_or_default()
                    ),
                    _ => format!("Stage '{}' produced no usable outputs and downstream stages require them", spec.name),
                };
                self.halt(&mut report, &spec.name, status, message);
                break;
            }
        }

        self.set_state(DriverState::Done);
        report.finish();

        tracing::info!(
            pipeline = %self.graph.name(),
            run_id = %report.run_id,
            failures = report.failures().len(),
            halted = report.halted.is_some(),
            "Run finished"
        );
        self.events.try_emit(
            "run.completed",
            Some(json!({
                "pipeline": self.graph.name(),
                "run_id": report.run_id.to_string(),
                "success": report.is_success(),
                "failures": report.failures().len(),
            })),
        );

        if let Some(path) = &settings.report_path {
            report.write_json(path).map_err(CubeflowError::Report)?;
        }
        Ok(report)
    }

    fn set_state(&self, state: DriverState) {
        tracing::debug!(state = %state, "Driver state");
        *self.state.lock() = state;
    }

    fn halt(&self, report: &mut RunReport, stage: &str, status: StageStatus, message: String) {
        tracing::error!(stage, status = %status, "{message}");
        self.events.try_emit(
            "run.halted",
            Some(json!({ "stage": stage, "status": status.to_string(), "message": message })),
        );
        report.halted = Some(HaltReason {
            stage: stage.to_string(),
            status,
            message,
        });
    }

    /// Stops the run on a configuration error, persisting what is known.
    fn abort(&self, report: &RunReport, report_path: Option<&Path>, err: ConfigurationError) -> CubeflowError {
        tracing::error!(pipeline = %self.graph.name(), error = %err, "Configuration error, run aborted");
        self.set_state(DriverState::Done);
        self.events.try_emit(
            "run.halted",
            Some(json!({ "pipeline": self.graph.name(), "message": err.to_string() })),
        );

        if let Some(path) = report_path {
            if let Err(write_err) = report.write_json(path) {
                tracing::error!(path = %path.display(), error = %write_err, "Failed to persist partial report");
            }
        }
        CubeflowError::Configuration(err)
    }

    fn pass_through(&self, spec: &StageSpec, ledger: &mut RunLedger, report: &mut RunReport) -> StageReport {
        let timer = SpanTimer::start(&spec.name);
        tracing::info!(stage = %spec.name, upstream = spec.primary(), "Stage disabled, passing items through");

        ledger.pass_through(&spec.name, spec.primary());
        let mut stage_report = StageReport::new(&spec.name, StageStatus::Skipped);
        for (key, entry) in ledger.entries(&spec.name).into_iter().flatten() {
            let location = match entry {
                LedgerEntry::Available { location, .. } => Some(location.clone()),
                LedgerEntry::Failed(_) => None,
            };
            stage_report.count(Outcome::SkippedDisabled);
            report.rows.push(ReportRow {
                stage: spec.name.clone(),
                item: key.clone(),
                outcome: Outcome::SkippedDisabled,
                sources: vec![key.clone()],
                location,
                reason: None,
                error: None,
            });
        }
        stage_report.duration_ms = timer.finish();
        stage_report
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_stage(
        &self,
        spec: &StageSpec,
        stage_config: &StageConfig,
        config: &PipelineConfig,
        settings: &RunSettings,
        runner: &StageRunner,
        ledger: &mut RunLedger,
        report: &mut RunReport,
    ) -> Result<StageReport, ConfigurationError> {
        for warning in spec.schema.validate(&spec.name, stage_config)? {
            tracing::warn!(stage = %spec.name, "{warning}");
        }

        let timer = SpanTimer::start(&spec.name);
        self.events.try_emit("stage.started", Some(json!({ "stage": spec.name })));

        let classified = StalenessResolver::new(ledger, self.store.as_ref(), &settings.force).classify_stage(spec);
        self.set_state(DriverState::Classified(spec.name.clone()));

        let mut units: Vec<(UnitPlan, Resolution)> = Vec::with_capacity(classified.len());
        let mut jobs = Vec::new();
        for unit in classified {
            match unit.decision {
                Decision::Reuse(artifacts) => units.push((unit.plan, Resolution::Reused(artifacts))),
                Decision::Fail(err) => units.push((unit.plan, Resolution::Failed(err, None))),
                Decision::Recompute(reason) => jobs.push(Job {
                    plan: unit.plan,
                    reason,
                }),
            }
        }
        let reuse = units
            .iter()
            .filter(|(_, resolution)| matches!(resolution, Resolution::Reused(_)))
            .count();
        tracing::debug!(stage = %spec.name, reuse, recompute = jobs.len(), fail = units.len() - reuse, "Stage classified");
        self.events.try_emit(
            "stage.classified",
            Some(json!({
                "stage": spec.name,
                "reuse": reuse,
                "recompute": jobs.len(),
                "fail": units.len() - reuse,
            })),
        );

        self.set_state(DriverState::Executing(spec.name.clone()));
        let params = stage_config.params();
        for done in runner.run(spec, &params, jobs).await {
            let reason = done.job.reason;
            let resolution = match done.result {
                Ok(artifacts) => Resolution::Recomputed(artifacts, reason),
                Err(err) => Resolution::Failed(err, Some(reason)),
            };
            units.push((done.job.plan, resolution));
        }

        let mut stage_report = StageReport::new(&spec.name, StageStatus::Completed);
        let mut entries = BTreeMap::new();
        let mut rows = Vec::new();
        let mut cancelled = false;
        for (plan, resolution) in units {
            record_unit(&spec.name, &plan, resolution, &mut entries, &mut rows, &mut cancelled);
        }
        rows.sort_by(|a, b| a.item.cmp(&b.item));
        for row in &rows {
            stage_report.count(row.outcome);
        }
        ledger.record_stage(&spec.name, entries);

        if let Some(summary) = &spec.summary {
            let rebuild = settings.force.contains(&spec.name) || stage_report.recomputed > 0;
            let entry = self.summarize(spec, Arc::clone(summary), ledger, runner, rebuild).await;
            if let LedgerEntry::Available { location, .. } = &entry {
                stage_report.summary = Some(location.clone());
            }
            ledger.record_summary(&spec.name, entry);
        }

        stage_report.status = if stage_report.failed == 0 {
            StageStatus::Completed
        } else if stage_report.usable() > 0 {
            StageStatus::PartialSuccess
        } else if cancelled {
            StageStatus::Cancelled
        } else if self.graph.has_mandatory_consumer(&spec.name, &|stage| config.is_enabled(stage)) {
            StageStatus::TotalFailure
        } else {
            StageStatus::Failed
        };
        stage_report.duration_ms = timer.finish();
        report.rows.extend(rows);
        Ok(stage_report)
    }

    /// Reuses or rebuilds a stage's summary artifact.
    ///
    /// An existing summary is reused unless `rebuild` is set, it is older
    /// than the newest output, or its recorded members differ from the
    /// outputs available now.
    async fn summarize(
        &self,
        spec: &StageSpec,
        summary: Arc<dyn Summarize>,
        ledger: &RunLedger,
        runner: &StageRunner,
        rebuild: bool,
    ) -> LedgerEntry {
        let available: Vec<_> = ledger
            .entries(&spec.name)
            .into_iter()
            .flatten()
            .filter_map(|(key, entry)| match entry {
                LedgerEntry::Available { location, modified, .. } => Some((key.clone(), location.clone(), *modified)),
                LedgerEntry::Failed(_) => None,
            })
            .collect();
        if available.is_empty() {
            return LedgerEntry::Failed(ItemError::missing_input(spec.name.as_str(), SUMMARY_KEY));
        }

        let summary_key = ItemKey::new(SUMMARY_KEY);
        let existing = match self.store.artifact(&spec.name, &summary_key) {
            Ok(existing) => existing,
            Err(err) => {
                tracing::warn!(stage = %spec.name, error = %err, "Summary lookup failed, rebuilding");
                None
            }
        };
        let newest = available.iter().map(|(_, _, modified)| *modified).max();
        let reusable = existing
            .filter(|summary| !rebuild && newest.map_or(true, |t| !summary.is_older_than(&t)))
            .filter(|_| {
                let current: Vec<ItemKey> = available.iter().map(|(key, _, _)| key.clone()).collect();
                match self.store.members(&spec.name, &summary_key) {
                    Ok(Some(recorded)) => same_members(&recorded, &current),
                    Ok(None) => false,
                    Err(err) => {
                        tracing::warn!(stage = %spec.name, error = %err, "Summary members unreadable, rebuilding");
                        false
                    }
                }
            });

        if let Some(summary) = reusable {
            tracing::debug!(stage = %spec.name, "Summary reused");
            return LedgerEntry::Available {
                producer: Producer::Stage(spec.name.clone()),
                location: summary.location,
                modified: summary.modified,
                changed: false,
            };
        }

        let outputs = available.into_iter().map(|(key, location, _)| (key, location)).collect();
        match runner.summarize(&spec.name, summary, outputs).await {
            Ok(artifact) => {
                tracing::info!(stage = %spec.name, location = %artifact.location.display(), "Summary written");
                LedgerEntry::Available {
                    producer: Producer::Stage(spec.name.clone()),
                    location: artifact.location,
                    modified: artifact.modified,
                    changed: true,
                }
            }
            Err(err) => {
                tracing::warn!(stage = %spec.name, error = %err, "Summary failed");
                self.events.try_emit(
                    "item.failed",
                    Some(json!({
                        "stage": spec.name,
                        "item": SUMMARY_KEY,
                        "kind": err.kind(),
                        "error": err.to_string(),
                    })),
                );
                LedgerEntry::Failed(err)
            }
        }
    }
}

fn record_unit(
    stage: &str,
    plan: &UnitPlan,
    resolution: Resolution,
    entries: &mut BTreeMap<ItemKey, LedgerEntry>,
    rows: &mut Vec<ReportRow>,
    cancelled: &mut bool,
) {
    let row = |item: &ItemKey, outcome: Outcome| ReportRow {
        stage: stage.to_string(),
        item: item.clone(),
        outcome,
        sources: plan.unit.sources.clone(),
        location: None,
        reason: None,
        error: None,
    };

    match resolution {
        Resolution::Reused(artifacts) => {
            for artifact in artifacts {
                rows.push(ReportRow {
                    location: Some(artifact.location.clone()),
                    ..row(&artifact.key, Outcome::Reused)
                });
                entries.insert(artifact.key, available(stage, artifact.location, artifact.modified, false));
            }
        }
        Resolution::Recomputed(artifacts, reason) => {
            for artifact in artifacts {
                rows.push(ReportRow {
                    location: Some(artifact.location.clone()),
                    reason: Some(reason),
                    ..row(&artifact.key, Outcome::Recomputed)
                });
                entries.insert(artifact.key, available(stage, artifact.location, artifact.modified, true));
            }
        }
        Resolution::Failed(err, reason) => {
            *cancelled |= matches!(err, ItemError::Cancelled { .. });
            for key in &plan.unit.outputs {
                rows.push(ReportRow {
                    reason,
                    error: Some(err.clone()),
                    ..row(key, Outcome::Failed)
                });
                entries.insert(key.clone(), LedgerEntry::Failed(err.clone()));
            }
        }
    }
}

fn available(stage: &str, location: std::path::PathBuf, modified: crate::utils::Timestamp, changed: bool) -> LedgerEntry {
    LedgerEntry::Available {
        producer: Producer::Stage(stage.to_string()),
        location,
        modified,
        changed,
    }
}
