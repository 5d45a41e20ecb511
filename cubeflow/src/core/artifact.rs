//! Materialized stage outputs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{ItemKey, RecomputeReason};
use crate::utils::Timestamp;

/// The materialized output of one (stage, item) pair.
///
/// Owned by the producing stage; later stages only read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// The producing stage.
    pub stage: String,
    /// The item key.
    pub key: ItemKey,
    /// Where the store keeps the data.
    pub location: PathBuf,
    /// Modification time, the only staleness signal.
    pub modified: Timestamp,
}

impl Artifact {
    /// Returns true if this artifact is strictly older than `other`.
    ///
    /// Equal times count as fresh.
    #[must_use]
    pub fn is_older_than(&self, other: &Timestamp) -> bool {
        self.modified < *other
    }
}

/// Validity of a cached artifact as seen by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactState {
    /// Nothing has been written for the pair.
    Missing,
    /// The artifact can be reused.
    Valid(Artifact),
    /// The artifact exists but must be recomputed.
    Invalid(Artifact, RecomputeReason),
}

impl ArtifactState {
    /// Returns the artifact, if one exists.
    #[must_use]
    pub const fn artifact(&self) -> Option<&Artifact> {
        match self {
            Self::Missing => None,
            Self::Valid(artifact) | Self::Invalid(artifact, _) => Some(artifact),
        }
    }

    /// Returns true if the artifact can be reused.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}
