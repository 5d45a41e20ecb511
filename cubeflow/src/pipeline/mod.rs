//! Pipeline building and execution.
//!
//! This module provides:
//! - Stage specifications and the validated stage graph
//! - The per-run ledger and the staleness resolver
//! - The bounded stage runner
//! - The driver that walks the graph and produces the run report

mod builder;
mod dag;
mod driver;
mod ledger;
mod resolver;
mod runner;
mod spec;


pub use builder::PipelineBuilder;
pub use dag::StageGraph;
pub use driver::{DriverState, PipelineDriver};
pub use ledger::{LedgerEntry, Producer, RunLedger};
pub use resolver::{Classified, Decision, InputRef, StalenessResolver, UnitPlan};
pub use runner::{Job, JobResult, StageRunner};
pub use spec::{SharedInput, StageSpec};
