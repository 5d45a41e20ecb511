//! Test fixtures: an in-memory store seeded with source cubes.

use std::sync::Arc;

use crate::config::{PipelineConfig, StageConfig};
use crate::core::Item;
use crate::pipeline::{PipelineDriver, StageGraph};
use crate::store::{ArtifactStore, InMemoryArtifactStore};

/// An in-memory store plus the items discovered in it.
#[derive(Debug, Default)]
pub struct TestFixture {
    /// The shared store.
    pub store: Arc<InMemoryArtifactStore>,
    /// Discovered items, in key order.
    pub items: Vec<Item>,
}

impl TestFixture {
    /// Creates an empty fixture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fixture with one source per key. Each source lives at
    /// `/raw/<key>.fits` and holds the key's bytes.
    #[must_use]
    pub fn with_items(keys: &[&str]) -> Self {
        let mut fixture = Self::new();
        for key in keys {
            fixture.add_item(key);
        }
        fixture
    }

    /// Creates a fixture with `count` numbered items, `item_00` onwards.
    #[must_use]
    pub fn numbered(count: usize) -> Self {
        let mut fixture = Self::new();
        for index in 0..count {
            fixture.add_item(&format!("item_{index:02}"));
        }
        fixture
    }

    /// Adds a source and its item.
    pub fn add_item(&mut self, key: &str) {
        let path = format!("/raw/{key}.fits");
        self.store.add_source(path.as_str(), key.as_bytes().to_vec());
        self.items.push(Item::new(key, path));
        self.items.sort_by(|a, b| a.key.cmp(&b.key));
    }

    /// The store as a trait object.
    #[must_use]
    pub fn store_handle(&self) -> Arc<dyn ArtifactStore> {
        Arc::clone(&self.store) as Arc<dyn ArtifactStore>
    }

    /// Creates a driver for `graph` over this fixture's store.
    #[must_use]
    pub fn driver(&self, graph: StageGraph) -> PipelineDriver {
        PipelineDriver::new(graph, self.store_handle())
    }
}

/// A configuration enabling every stage of `graph` with no parameters.
#[must_use]
pub fn enable_all(graph: &StageGraph) -> PipelineConfig {
    graph
        .execution_order()
        .iter()
        .fold(PipelineConfig::new(graph.name()), |config, stage| {
            config.with_stage(stage.as_str(), StageConfig::new())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SOURCE_STAGE;
    use crate::pipeline::{PipelineBuilder, StageSpec};
    use crate::stages::CopyTransform;

    #[test]
    fn test_fixture_items_are_sorted() {
        let fixture = TestFixture::with_items(&["b", "a"]);
        let keys: Vec<_> = fixture.items.iter().map(|i| i.key.to_string()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(
            fixture.store.read_source("/raw/a.fits".as_ref()).unwrap(),
            b"a".to_vec()
        );
        assert_eq!(TestFixture::numbered(3).items[2].key.as_str(), "item_02");
    }

    #[test]
    fn test_enable_all() {
        let graph = PipelineBuilder::new("vampires")
            .stage(StageSpec::new("calibrate", Arc::new(CopyTransform)))
            .unwrap()
            .build()
            .unwrap();

        let config = enable_all(&graph);
        assert!(config.is_enabled("calibrate"));
        assert!(!config.is_enabled(SOURCE_STAGE));
    }
}
