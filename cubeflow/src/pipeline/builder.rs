//! Pipeline builder with validation.

use super::{StageGraph, StageSpec};
use crate::errors::PipelineValidationError;
use std::collections::HashMap;

/// Builder for creating validated pipelines.
///
/// Stages must be added after every stage they read from, so the declared
/// order is always a valid execution order and cycles cannot be expressed.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    /// The pipeline name.
    name: String,
    /// The stage specifications.
    stages: HashMap<String, StageSpec>,
    /// Insertion order for stages.
    stage_order: Vec<String>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: HashMap::new(),
            stage_order: Vec::new(),
        }
    }

    /// Adds a stage to the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails (unknown dependency, duplicate
    /// name, self-dependency, reserved name).
    pub fn stage(mut self, spec: StageSpec) -> Result<Self, PipelineValidationError> {
        self.add_stage_spec(spec)?;
        Ok(self)
    }

    /// Adds a stage with a specification.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn add_stage_spec(&mut self, spec: StageSpec) -> Result<(), PipelineValidationError> {
        spec.validate()?;

        if self.stages.contains_key(&spec.name) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' is defined more than once",
                spec.name
            ))
            .with_stages(vec![spec.name.clone()])
            .with_fix_hint("Stage names must be unique within a pipeline."));
        }

        if let Some(dep) = spec.dependencies().find(|dep| !self.stages.contains_key(*dep)) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' depends on unknown stage '{}'",
                spec.name, dep
            ))
            .with_stages(vec![spec.name.clone(), dep.to_string()])
            .with_fix_hint("Ensure the dependency is added before the stage that depends on it."));
        }

        self.stage_order.push(spec.name.clone());
        self.stages.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Builds the stage graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder has no stages.
    pub fn build(self) -> Result<StageGraph, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no stages")
                .with_fix_hint("Add at least one stage to the pipeline before building."));
        }

        Ok(StageGraph::new(self.name, self.stages, &self.stage_order))
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}
