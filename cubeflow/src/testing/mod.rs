//! Testing utilities for cubeflow pipelines.
//!
//! This module provides:
//! - Mock transformations (recording, failing, slow, panicking)
//! - Report assertions
//! - In-memory store fixtures

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_all_outcomes, assert_outcome, assert_run_succeeded, assert_stage_status};
pub use fixtures::{enable_all, TestFixture};
pub use mocks::{FailingTransform, PanickingTransform, RecordingTransform, SlowTransform};
