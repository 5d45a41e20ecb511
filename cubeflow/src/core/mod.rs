//! Core domain model types for cubeflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Item keys, discovered items and lineage
//! - Per-item outcomes, recompute reasons and stage status
//! - Materialized artifacts and their validity

mod artifact;
mod item;
mod status;

pub use artifact::{Artifact, ArtifactState};
pub use item::{Item, ItemKey, Lineage};
pub use status::{Outcome, RecomputeReason, StageStatus};

/// Reserved item key of a stage's summary artifact.
pub const SUMMARY_KEY: &str = "__summary__";

/// Pseudo-stage name under which discovered source files are tracked.
pub const SOURCE_STAGE: &str = "source";
