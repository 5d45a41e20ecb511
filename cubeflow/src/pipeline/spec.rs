//! Stage specifications.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::ParamSchema;
use crate::core::{ItemKey, SOURCE_STAGE, SUMMARY_KEY};
use crate::errors::PipelineValidationError;
use crate::stages::{Cardinality, Grouping, Summarize, Transform};

/// A single named artifact of another stage read by every unit of a stage,
/// such as a master dark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedInput {
    /// The producing stage.
    pub stage: String,
    /// The artifact key; [`SUMMARY_KEY`] selects the stage's summary.
    pub key: ItemKey,
    /// Whether units fail when the artifact is unavailable.
    pub required: bool,
}

impl SharedInput {
    /// A required shared artifact.
    #[must_use]
    pub fn required(stage: impl Into<String>, key: impl Into<ItemKey>) -> Self {
        Self {
            stage: stage.into(),
            key: key.into(),
            required: true,
        }
    }

    /// An optional shared artifact.
    #[must_use]
    pub fn optional(stage: impl Into<String>, key: impl Into<ItemKey>) -> Self {
        Self {
            required: false,
            ..Self::required(stage, key)
        }
    }

    /// The summary artifact of a stage.
    #[must_use]
    pub fn summary_of(stage: impl Into<String>) -> Self {
        Self::required(stage, SUMMARY_KEY)
    }
}

/// Specification for a single stage in a pipeline.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// The stage's transformation.
    pub transform: Arc<dyn Transform>,
    /// Upstream stages. The first is the primary input and defines the
    /// stage's item set; with none, the stage reads discovered sources.
    pub inputs: Vec<String>,
    /// Shared single-artifact inputs.
    pub shared: Vec<SharedInput>,
    /// How input items map to output items.
    pub cardinality: Cardinality,
    /// Recognized parameters.
    pub schema: ParamSchema,
    /// Optional ordered summary aggregator.
    pub summary: Option<Arc<dyn Summarize>>,
}

impl StageSpec {
    /// Creates a one-to-one stage reading discovered sources.
    #[must_use]
    pub fn new(name: impl Into<String>, transform: Arc<dyn Transform>) -> Self {
        Self {
            name: name.into(),
            transform,
            inputs: Vec::new(),
            shared: Vec::new(),
            cardinality: Cardinality::OneToOne,
            schema: ParamSchema::new(),
            summary: None,
        }
    }

    /// Adds an upstream stage. The first call sets the primary input.
    #[must_use]
    pub fn after(mut self, stage: impl Into<String>) -> Self {
        self.inputs.push(stage.into());
        self
    }

    /// Adds a shared input.
    #[must_use]
    pub fn with_shared(mut self, shared: SharedInput) -> Self {
        self.shared.push(shared);
        self
    }

    /// Sets the cardinality.
    #[must_use]
    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    /// Sets the parameter schema.
    #[must_use]
    pub fn with_schema(mut self, schema: ParamSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Sets the summary aggregator.
    #[must_use]
    pub fn with_summary(mut self, summary: Arc<dyn Summarize>) -> Self {
        self.summary = Some(summary);
        self
    }

    /// The stage whose items this stage iterates over.
    #[must_use]
    pub fn primary(&self) -> &str {
        self.inputs.first().map_or(SOURCE_STAGE, String::as_str)
    }

    /// Secondary per-item upstreams.
    #[must_use]
    pub fn secondary(&self) -> &[String] {
        self.inputs.get(1..).unwrap_or_default()
    }

    /// Every stage this stage reads from.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .map(String::as_str)
            .chain(self.shared.iter().map(|s| s.stage.as_str()))
    }

    /// Returns true if this stage cannot run without `stage`'s output.
    #[must_use]
    pub fn requires(&self, stage: &str) -> bool {
        self.inputs.iter().any(|s| s == stage)
            || self.shared.iter().any(|s| s.required && s.stage == stage)
    }

    /// Validates the stage specification on its own.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty or reserved name, a fan-in output key
    /// that collides with the summary key, a self-dependency or a repeated
    /// upstream.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new("Stage name cannot be empty"));
        }
        if self.name == SOURCE_STAGE {
            return Err(PipelineValidationError::new(format!(
                "Stage name '{SOURCE_STAGE}' is reserved for discovered inputs"
            ))
            .with_stages(vec![self.name.clone()])
            .with_fix_hint("Rename the stage."));
        }
        if let Cardinality::FanIn(Grouping::All { key }) = &self.cardinality {
            if key.is_reserved() {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' writes its fan-in output under the reserved key '{SUMMARY_KEY}'",
                    self.name
                ))
                .with_stages(vec![self.name.clone()])
                .with_fix_hint("Choose another output key."));
            }
        }
        if self.dependencies().any(|dep| dep == self.name) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' cannot depend on itself",
                self.name
            ))
            .with_stages(vec![self.name.clone()]));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self.inputs.iter().find(|s| !seen.insert(s.as_str())) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' lists upstream '{}' more than once",
                self.name, dup
            ))
            .with_stages(vec![self.name.clone(), dup.clone()]));
        }
        Ok(())
    }
}
