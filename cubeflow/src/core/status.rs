//! Per-item outcomes and per-stage status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to one (stage, item) pair during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The cached artifact was valid and kept.
    Reused,
    /// The artifact was (re)computed in this run.
    Recomputed,
    /// The stage is disabled; the item passed through untouched.
    SkippedDisabled,
    /// The item failed in this stage and is dropped from here on.
    Failed,
}

impl Outcome {
    /// Returns true if the stage left a readable artifact for the item.
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        matches!(self, Self::Reused | Self::Recomputed)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reused => write!(f, "reused"),
            Self::Recomputed => write!(f, "recomputed"),
            Self::SkippedDisabled => write!(f, "skipped_disabled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Why the resolver decided to recompute a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecomputeReason {
    /// The stage is in the force-set.
    Forced,
    /// At least one output artifact does not exist.
    Missing,
    /// An upstream artifact was recomputed earlier in this run.
    UpstreamRecomputed,
    /// An output is older than the newest upstream artifact.
    Stale,
    /// A fan-in group lost members that failed upstream.
    MembershipChanged,
}

impl fmt::Display for RecomputeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forced => write!(f, "forced"),
            Self::Missing => write!(f, "missing"),
            Self::UpstreamRecomputed => write!(f, "upstream_recomputed"),
            Self::Stale => write!(f, "stale"),
            Self::MembershipChanged => write!(f, "membership_changed"),
        }
    }
}

/// Aggregate result of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Every item has a usable artifact.
    #[default]
    Completed,
    /// Some, but not all, items failed.
    PartialSuccess,
    /// Every item failed and no enabled stage needs the output.
    Failed,
    /// Every item failed and a downstream stage requires the output.
    TotalFailure,
    /// The stage is disabled.
    Skipped,
    /// The run was cancelled while the stage was dispatching.
    Cancelled,
}

impl StageStatus {
    /// Returns true if the driver must stop after this stage.
    #[must_use]
    pub const fn halts_run(&self) -> bool {
        matches!(self, Self::TotalFailure | Self::Cancelled)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::PartialSuccess => write!(f, "partial_success"),
            Self::Failed => write!(f, "failed"),
            Self::TotalFailure => write!(f, "total_failure"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
