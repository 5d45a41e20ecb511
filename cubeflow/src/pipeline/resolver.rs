//! Reuse-versus-recompute decisions.
//!
//! For every work unit of a stage the resolver applies, in order:
//!
//! 1. a mandatory upstream that failed (or is absent) in this run fails the
//!    unit, even when the stage is forced;
//! 2. a forced stage recomputes;
//! 3. a missing output recomputes;
//! 4. an upstream (re)written in this run recomputes, including through a
//!    disabled pass-through;
//! 5. a fan-in output whose surviving members differ from the members
//!    recorded when it was written recomputes;
//! 6. an output strictly older than its newest upstream recomputes;
//! 7. otherwise the cached outputs are reused.
//!
//! Equal modification times are reuse. A unit whose output would take the
//! summary key fails before any of these.

use std::collections::BTreeSet;
use std::path::PathBuf;

use super::ledger::{LedgerEntry, Producer, RunLedger};
use super::StageSpec;
use crate::core::{Artifact, ArtifactState, ItemKey, RecomputeReason, SUMMARY_KEY};
use crate::errors::{ItemError, StoreError};
use crate::stages::{Cardinality, Grouping, WorkUnit};
use crate::store::{same_members, ArtifactStore};
use crate::utils::Timestamp;

/// An upstream artifact a unit will read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRef {
    /// The item key within the producing stage.
    pub key: ItemKey,
    /// The declared upstream (or shared stage) this input satisfies.
    pub dependency: String,
    /// Who actually holds the data.
    pub producer: Producer,
    /// Where it lives.
    pub location: PathBuf,
    /// Its modification time.
    pub modified: Timestamp,
    /// Whether it was written in this run.
    pub changed: bool,
}

impl InputRef {
    fn from_entry(key: &ItemKey, dependency: &str, entry: &LedgerEntry) -> Option<Self> {
        match entry {
            LedgerEntry::Available {
                producer,
                location,
                modified,
                changed,
            } => Some(Self {
                key: key.clone(),
                dependency: dependency.to_string(),
                producer: producer.clone(),
                location: location.clone(),
                modified: *modified,
                changed: *changed,
            }),
            LedgerEntry::Failed(_) => None,
        }
    }
}

/// A unit with its resolved inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitPlan {
    /// The unit. For partial fan-in groups `sources` lists surviving members.
    pub unit: WorkUnit,
    /// Per-item inputs: primary first, then secondary upstreams.
    pub inputs: Vec<InputRef>,
    /// Shared inputs that are available.
    pub shared: Vec<InputRef>,
    /// Fan-in members dropped because they failed upstream.
    pub dropped: Vec<ItemKey>,
}

impl UnitPlan {
    fn bare(unit: WorkUnit) -> Self {
        Self {
            unit,
            inputs: Vec::new(),
            shared: Vec::new(),
            dropped: Vec::new(),
        }
    }

    fn newest_upstream(&self) -> Option<Timestamp> {
        self.inputs.iter().chain(&self.shared).map(|i| i.modified).max()
    }

    fn upstream_changed(&self) -> bool {
        self.inputs.iter().chain(&self.shared).any(|i| i.changed)
    }
}

/// What to do with one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Keep the cached outputs.
    Reuse(Vec<Artifact>),
    /// Run the transformation.
    Recompute(RecomputeReason),
    /// Record the unit as failed without running it.
    Fail(ItemError),
}

/// A classified unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    /// The unit and its inputs.
    pub plan: UnitPlan,
    /// The decision.
    pub decision: Decision,
    /// Validity of each output before the stage runs.
    pub states: Vec<ArtifactState>,
}

/// Classifies the work units of a stage.
pub struct StalenessResolver<'a> {
    ledger: &'a RunLedger,
    store: &'a dyn ArtifactStore,
    force: &'a BTreeSet<String>,
}

impl<'a> StalenessResolver<'a> {
    /// Creates a resolver over this run's ledger.
    #[must_use]
    pub fn new(ledger: &'a RunLedger, store: &'a dyn ArtifactStore, force: &'a BTreeSet<String>) -> Self {
        Self {
            ledger,
            store,
            force,
        }
    }

    /// Plans and classifies every unit of an enabled stage, ordered by lead
    /// output key.
    #[must_use]
    pub fn classify_stage(&self, spec: &StageSpec) -> Vec<Classified> {
        let members = self.ledger.keys(spec.primary());
        let plan = spec.cardinality.plan(&members);

        let mut classified: Vec<Classified> = plan
            .units
            .into_iter()
            .map(|unit| self.classify(spec, unit))
            .collect();

        if let Cardinality::FanIn(Grouping::Chunks { size, .. }) = &spec.cardinality {
            classified.extend(plan.incomplete.into_iter().map(|unit| {
                let found = unit.sources.len();
                Classified {
                    states: vec![ArtifactState::Missing; unit.outputs.len()],
                    plan: UnitPlan::bare(unit),
                    decision: Decision::Fail(ItemError::IncompleteGroup {
                        expected: *size,
                        found,
                    }),
                }
            }));
        }

        classified.sort_by(|a, b| a.plan.unit.lead().cmp(&b.plan.unit.lead()));
        classified
    }

    /// Classifies one unit.
    #[must_use]
    pub fn classify(&self, spec: &StageSpec, unit: WorkUnit) -> Classified {
        if let Some(key) = unit.outputs.iter().find(|key| key.is_reserved()) {
            let err = ItemError::ReservedKey { key: key.to_string() };
            return Classified {
                states: vec![ArtifactState::Missing; unit.outputs.len()],
                plan: UnitPlan::bare(unit),
                decision: Decision::Fail(err),
            };
        }

        let plan = match self.resolve_inputs(spec, unit) {
            Ok(plan) => plan,
            Err((plan, err)) => {
                return Classified {
                    states: vec![ArtifactState::Missing; plan.unit.outputs.len()],
                    plan,
                    decision: Decision::Fail(err),
                }
            }
        };

        let forced = self.force.contains(&spec.name);
        let lookups: Vec<_> = plan
            .unit
            .outputs
            .iter()
            .map(|key| self.store.artifact(&spec.name, key))
            .collect();
        let mut outputs = Vec::with_capacity(lookups.len());
        for lookup in lookups {
            match lookup {
                Ok(artifact) => outputs.push(artifact),
                Err(_) if forced => outputs.push(None),
                Err(err) => {
                    return Classified {
                        states: vec![ArtifactState::Missing; plan.unit.outputs.len()],
                        plan,
                        decision: Decision::Fail(ItemError::store(&err)),
                    }
                }
            }
        }

        let complete = outputs.iter().all(Option::is_some);
        let membership_changed = if spec.cardinality.is_fan_in() && complete && !forced {
            match self.membership_changed(spec, &plan) {
                Ok(changed) => changed,
                Err(err) => {
                    return Classified {
                        states: vec![ArtifactState::Missing; plan.unit.outputs.len()],
                        plan,
                        decision: Decision::Fail(ItemError::store(&err)),
                    }
                }
            }
        } else {
            false
        };

        let reason = recompute_reason(forced, &plan, &outputs, membership_changed);
        let states = outputs
            .iter()
            .map(|artifact| match (artifact, reason) {
                (None, _) => ArtifactState::Missing,
                (Some(a), Some(reason)) => ArtifactState::Invalid(a.clone(), reason),
                (Some(a), None) => ArtifactState::Valid(a.clone()),
            })
            .collect();

        let decision = match reason {
            Some(reason) => Decision::Recompute(reason),
            None => Decision::Reuse(outputs.into_iter().flatten().collect()),
        };

        tracing::debug!(
            stage = %spec.name,
            item = %plan.unit.lead().map(ItemKey::as_str).unwrap_or_default(),
            decision = %decision_label(&decision),
            "Unit classified"
        );

        Classified {
            plan,
            decision,
            states,
        }
    }

    fn resolve_inputs(&self, spec: &StageSpec, unit: WorkUnit) -> Result<UnitPlan, (UnitPlan, ItemError)> {
        let primary = spec.primary();
        let partial = matches!(&spec.cardinality, Cardinality::FanIn(g) if g.allows_partial());
        let mut plan = UnitPlan::bare(unit);

        let members = plan.unit.sources.clone();
        let mut kept = Vec::with_capacity(members.len());
        for key in &members {
            match self.ledger.entry(primary, key).and_then(|e| InputRef::from_entry(key, primary, e)) {
                Some(input) => {
                    kept.push(key.clone());
                    plan.inputs.push(input);
                }
                None if partial => plan.dropped.push(key.clone()),
                None => {
                    let err = ItemError::missing_input(primary, key.as_str());
                    return Err((plan, err));
                }
            }
        }
        if kept.is_empty() {
            let key = plan.dropped.first().map(ItemKey::to_string).unwrap_or_default();
            return Err((plan, ItemError::missing_input(primary, key)));
        }
        if !plan.dropped.is_empty() {
            tracing::warn!(
                stage = %spec.name,
                dropped = plan.dropped.len(),
                "Fan-in group computed without failed members"
            );
        }
        plan.unit.sources.clone_from(&kept);

        for dependency in spec.secondary() {
            for key in &kept {
                match self
                    .ledger
                    .entry(dependency, key)
                    .and_then(|e| InputRef::from_entry(key, dependency, e))
                {
                    Some(input) => plan.inputs.push(input),
                    None => {
                        let err = ItemError::missing_input(dependency.as_str(), key.as_str());
                        return Err((plan, err));
                    }
                }
            }
        }

        for shared in &spec.shared {
            let entry = if shared.key.as_str() == SUMMARY_KEY {
                self.ledger.summary(&shared.stage)
            } else {
                self.ledger.entry(&shared.stage, &shared.key)
            };
            match entry.and_then(|e| InputRef::from_entry(&shared.key, &shared.stage, e)) {
                Some(input) => plan.shared.push(input),
                None if shared.required => {
                    let err = ItemError::missing_input(shared.stage.as_str(), shared.key.as_str());
                    return Err((plan, err));
                }
                None => {}
            }
        }

        Ok(plan)
    }

    /// Compares the unit's surviving members with the ones recorded for its
    /// outputs.
    fn membership_changed(&self, spec: &StageSpec, plan: &UnitPlan) -> Result<bool, StoreError> {
        for key in &plan.unit.outputs {
            let changed = match self.store.members(&spec.name, key)? {
                Some(recorded) => !same_members(&recorded, &plan.unit.sources),
                // Written without a record: only a dropped member is known to differ.
                None => !plan.dropped.is_empty(),
            };
            if changed {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn recompute_reason(
    forced: bool,
    plan: &UnitPlan,
    outputs: &[Option<Artifact>],
    membership_changed: bool,
) -> Option<RecomputeReason> {
    if forced {
        return Some(RecomputeReason::Forced);
    }
    if outputs.iter().any(Option::is_none) {
        return Some(RecomputeReason::Missing);
    }
    if plan.upstream_changed() {
        return Some(RecomputeReason::UpstreamRecomputed);
    }
    if membership_changed {
        return Some(RecomputeReason::MembershipChanged);
    }

    let oldest_output = outputs.iter().flatten().map(|a| a.modified).min();
    match (oldest_output, plan.newest_upstream()) {
        (Some(output), Some(upstream)) if output < upstream => Some(RecomputeReason::Stale),
        _ => None,
    }
}

fn decision_label(decision: &Decision) -> String {
    match decision {
        Decision::Reuse(_) => "reuse".to_string(),
        Decision::Recompute(reason) => format!("recompute ({reason})"),
        Decision::Fail(err) => format!("fail ({})", err.kind()),
    }
}
