//! Stage transformations.
//!
//! The engine treats a stage's numeric work as an opaque, synchronous
//! function: `(input artifacts, parameters) -> output artifacts | failure`.
//! Transformations run on blocking threads, so they may do heavy CPU work
//! and file I/O freely.

mod cardinality;
mod request;
mod summary;

pub use cardinality::{Cardinality, Grouping, Plan, WorkUnit};
pub use request::{InputArtifact, Produced, TransformRequest};
pub use summary::{FnSummary, IndexSummary, Summarize, SummaryEntry};

use std::fmt::Debug;

/// A stage's transformation.
pub trait Transform: Send + Sync + Debug {
    /// Computes the outputs of one work unit.
    ///
    /// Must return exactly one payload per entry of `request.outputs`, in the
    /// same order.
    ///
    /// # Errors
    ///
    /// Any error fails this unit only; it is recorded in the run report.
    fn apply(&self, request: &TransformRequest<'_>) -> anyhow::Result<Produced>;
}

/// A closure-based transformation.
pub struct FnTransform<F>
where
    F: Fn(&TransformRequest<'_>) -> anyhow::Result<Produced> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnTransform<F>
where
    F: Fn(&TransformRequest<'_>) -> anyhow::Result<Produced> + Send + Sync,
{
    /// Creates a new closure-based transformation.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnTransform<F>
where
    F: Fn(&TransformRequest<'_>) -> anyhow::Result<Produced> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTransform")
            .field("name", &self.name)
            .finish()
    }
}

impl<F> Transform for FnTransform<F>
where
    F: Fn(&TransformRequest<'_>) -> anyhow::Result<Produced> + Send + Sync,
{
    fn apply(&self, request: &TransformRequest<'_>) -> anyhow::Result<Produced> {
        (self.func)(request)
    }
}

/// Copies its primary input through unchanged, once per output.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyTransform;

impl Transform for CopyTransform {
    fn apply(&self, request: &TransformRequest<'_>) -> anyhow::Result<Produced> {
        let data = request
            .primary()
            .map(|input| input.data.clone())
            .unwrap_or_default();
        Ok(Produced::many(vec![data; request.outputs.len()]))
    }
}
