//! # Cubeflow
//!
//! An incremental batch pipeline engine for exposure-cube reductions.
//!
//! A run takes a set of discovered input items and an ordered graph of
//! stages. For every (stage, item) pair the engine decides whether the
//! cached artifact can be reused or must be recomputed, using nothing but
//! modification times:
//!
//! - **Incremental**: a second run over unchanged inputs does no work
//! - **Cascading**: anything recomputed invalidates everything downstream
//! - **Failure isolated**: one bad cube never stops the other 199
//! - **Bounded parallelism**: a worker pool per stage, deterministic summaries
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cubeflow::prelude::*;
//!
//! let graph = PipelineBuilder::new("vampires")
//!     .stage(StageSpec::new("calibrate", Arc::new(Calibrate)))?
//!     .stage(StageSpec::new("collapse", Arc::new(Collapse)).after("calibrate"))?
//!     .build()?;
//!
//! let config = load_config(Path::new("vampires.toml"))?;
//! let items = read_manifest(Path::new("inputs.txt"))?;
//! let store = Arc::new(FsArtifactStore::from_config("products", &config));
//!
//! let report = PipelineDriver::new(graph, store)
//!     .run(&items, &config, &RunOptions::new().with_concurrency(8))
//!     .await?;
//! for failure in report.failures() {
//!     eprintln!("{} / {}: {:?}", failure.stage, failure.item, failure.error);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod discovery;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod report;
pub mod stages;
pub mod store;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{load_config, PipelineConfig, RunOptions, StageConfig, StageParams};
    pub use crate::core::{Item, ItemKey, Outcome, RecomputeReason, StageStatus};
    pub use crate::discovery::{discover_matching, discover_paths, read_manifest};
    pub use crate::errors::{CubeflowError, ItemError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{PipelineBuilder, PipelineDriver, SharedInput, StageGraph, StageSpec};
    pub use crate::report::RunReport;
    pub use crate::stages::{Cardinality, Grouping, Produced, Summarize, Transform, TransformRequest};
    pub use crate::store::{ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
}
