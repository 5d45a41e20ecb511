//! Test assertions for run reports.

use crate::core::{Outcome, StageStatus};
use crate::report::RunReport;

/// Asserts the outcome of one item in one stage.
pub fn assert_outcome(report: &RunReport, stage: &str, item: &str, expected: Outcome) {
    let actual = report.outcome(stage, item);
    assert_eq!(
        actual,
        Some(expected),
        "Expected {stage}/{item} to be {expected}, got {actual:?}"
    );
}

/// Asserts that every row of a stage has the same outcome.
pub fn assert_all_outcomes(report: &RunReport, stage: &str, expected: Outcome) {
    let mismatched: Vec<String> = report
        .rows_for_stage(stage)
        .filter(|row| row.outcome != expected)
        .map(|row| format!("{}={}", row.item, row.outcome))
        .collect();
    assert!(
        mismatched.is_empty(),
        "Expected every item of '{stage}' to be {expected}, but: {mismatched:?}"
    );
}

/// Asserts the status of a stage.
pub fn assert_stage_status(report: &RunReport, stage: &str, expected: StageStatus) {
    let actual = report.stage(stage).map(|s| s.status);
    assert_eq!(
        actual,
        Some(expected),
        "Expected stage '{stage}' to be {expected}, got {actual:?}"
    );
}

/// Asserts that the run had no failed rows and did not halt.
pub fn assert_run_succeeded(report: &RunReport) {
    assert!(
        report.is_success(),
        "Expected a clean run, got halt {:?} and failures {:?}",
        report.halted,
        report
            .failures()
            .iter()
            .map(|row| format!("{}/{}", row.stage, row.item))
            .collect::<Vec<_>>()
    );
}
