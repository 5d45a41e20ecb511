//! The validated stage graph.

use super::StageSpec;
use std::collections::HashMap;

/// An ordered, acyclic set of stages.
#[derive(Debug, Clone)]
pub struct StageGraph {
    /// The pipeline name.
    name: String,
    /// Stage specifications.
    stages: HashMap<String, StageSpec>,
    /// Execution order. The builder only accepts a stage once its
    /// dependencies are registered, so declaration order is topological.
    execution_order: Vec<String>,
}

impl StageGraph {
    /// Creates a new stage graph.
    #[must_use]
    pub(crate) fn new(name: String, stages: HashMap<String, StageSpec>, stage_order: &[String]) -> Self {
        Self {
            name,
            stages,
            execution_order: stage_order.to_vec(),
        }
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

    /// Returns the execution order.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Looks up a stage.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StageSpec> {
        self.stages.get(name)
    }

    /// Iterates over stages in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &StageSpec> {
        self.execution_order
            .iter()
            .filter_map(|name| self.stages.get(name))
    }

    /// Returns true if some enabled stage cannot run without `stage`'s output.
    ///
    /// A disabled consumer that takes `stage` as its primary input passes the
    /// items through, so its own consumers are checked in turn.
    pub fn has_mandatory_consumer(&self, stage: &str, enabled: &dyn Fn(&str) -> bool) -> bool {
        self.iter().filter(|spec| spec.requires(stage)).any(|consumer| {
            if enabled(&consumer.name) {
                true
            } else {
                consumer.primary() == stage && self.has_mandatory_consumer(&consumer.name, enabled)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineBuilder, SharedInput};
    use crate::stages::CopyTransform;
    use std::sync::Arc;

    fn copy(name: &str) -> StageSpec {
        StageSpec::new(name, Arc::new(CopyTransform))
    }

    fn build_graph() -> StageGraph {
        PipelineBuilder::new("test")
            .stage(copy("dark"))
            .unwrap()
            .stage(copy("calibrate").with_shared(SharedInput::summary_of("dark")))
            .unwrap()
            .stage(copy("collapse").after("calibrate"))
            .unwrap()
            .stage(copy("register").after("collapse"))
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_topological_order() {
        let graph = build_graph();
        assert_eq!(graph.stage_count(), 4);
        assert_eq!(
            graph.execution_order(),
            ["dark", "calibrate", "collapse", "register"]
        );
        assert_eq!(
            graph.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            vec!["dark", "calibrate", "collapse", "register"]
        );
    }

    #[test]
    fn test_mandatory_consumer_through_pass_through() {
        let graph = build_graph();

        let all = |_: &str| true;
        assert!(graph.has_mandatory_consumer("calibrate", &all));
        assert!(!graph.has_mandatory_consumer("register", &all));

        // collapse disabled: calibrate still feeds register through it
        let no_collapse = |name: &str| name != "collapse";
        assert!(graph.has_mandatory_consumer("calibrate", &no_collapse));

        let only_calibrate = |name: &str| name == "calibrate";
        assert!(!graph.has_mandatory_consumer("calibrate", &only_calibrate));
        assert!(graph.has_mandatory_consumer("dark", &only_calibrate));
    }
}
