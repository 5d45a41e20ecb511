//! Per-run bookkeeping of what every stage produced.
//!
//! The ledger is the "was recomputed in this run" record the resolver
//! consults for cascading invalidation. Entries are written once per
//! (stage, item) and never revised within a run.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use crate::core::{Item, ItemKey, SOURCE_STAGE};
use crate::errors::ItemError;
use crate::store::ArtifactStore;
use crate::utils::Timestamp;

/// Where the data behind a ledger entry lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Producer {
    /// A discovered source file.
    Source(PathBuf),
    /// An artifact written by a stage.
    Stage(String),
}

impl Producer {
    /// Name used in reports: the stage name, or `source`.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Source(_) => SOURCE_STAGE,
            Self::Stage(stage) => stage.as_str(),
        }
    }
}

/// The state of one (stage, item) pair after the stage ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEntry {
    /// Readable data exists.
    Available {
        /// Who wrote it.
        producer: Producer,
        /// Where it lives.
        location: PathBuf,
        /// Its modification time.
        modified: Timestamp,
        /// Whether it was (re)written in this run.
        changed: bool,
    },
    /// The item failed in this stage or upstream of it.
    Failed(ItemError),
}

impl LedgerEntry {
    /// Returns true if downstream stages can read the entry.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }

    /// Returns true if the data was written in this run.
    #[must_use]
    pub const fn changed(&self) -> bool {
        matches!(self, Self::Available { changed: true, .. })
    }

    /// Returns the modification time of available data.
    #[must_use]
    pub const fn modified(&self) -> Option<Timestamp> {
        match self {
            Self::Available { modified, .. } => Some(*modified),
            Self::Failed(_) => None,
        }
    }

    /// Returns the failure, if any.
    #[must_use]
    pub const fn failure(&self) -> Option<&ItemError> {
        match self {
            Self::Available { .. } => None,
            Self::Failed(err) => Some(err),
        }
    }
}

/// All ledger entries of the current run.
#[derive(Debug, Clone, Default)]
pub struct RunLedger {
    stages: HashMap<String, BTreeMap<ItemKey, LedgerEntry>>,
    summaries: HashMap<String, LedgerEntry>,
}

impl RunLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the discovered items under the `source` pseudo-stage.
    ///
    /// A source that has vanished since discovery is recorded as failed.
    pub fn seed_sources(&mut self, items: &[Item], store: &dyn ArtifactStore) {
        let entries = items
            .iter()
            .map(|item| {
                let entry = match store.source_mod_time(&item.source) {
                    Ok(modified) => LedgerEntry::Available {
                        producer: Producer::Source(item.source.clone()),
                        location: item.source.clone(),
                        modified,
                        changed: false,
                    },
                    Err(err) => {
                        tracing::warn!(item = %item.key, error = %err, "Source unavailable");
                        LedgerEntry::Failed(ItemError::store(&err))
                    }
                };
                (item.key.clone(), entry)
            })
            .collect();
        self.stages.insert(SOURCE_STAGE.to_string(), entries);
    }

    /// Records the entries of a stage.
    pub fn record_stage(&mut self, stage: &str, entries: BTreeMap<ItemKey, LedgerEntry>) {
        self.stages.insert(stage.to_string(), entries);
    }

    /// Makes a disabled stage's entries a copy of its primary input's, so
    /// downstream reads go to the original producer.
    pub fn pass_through(&mut self, stage: &str, primary: &str) {
        let entries = self.stages.get(primary).cloned().unwrap_or_default();
        self.stages.insert(stage.to_string(), entries);
    }

    /// Records a stage's summary artifact.
    pub fn record_summary(&mut self, stage: &str, entry: LedgerEntry) {
        self.summaries.insert(stage.to_string(), entry);
    }

    /// Returns every entry of a stage, ordered by key.
    #[must_use]
    pub fn entries(&self, stage: &str) -> Option<&BTreeMap<ItemKey, LedgerEntry>> {
        self.stages.get(stage)
    }

    /// Returns the keys of a stage, ordered.
    #[must_use]
    pub fn keys(&self, stage: &str) -> Vec<ItemKey> {
        self.stages
            .get(stage)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns one entry.
    #[must_use]
    pub fn entry(&self, stage: &str, key: &ItemKey) -> Option<&LedgerEntry> {
        self.stages.get(stage).and_then(|entries| entries.get(key))
    }

    /// Returns a stage's summary entry.
    #[must_use]
    pub fn summary(&self, stage: &str) -> Option<&LedgerEntry> {
        self.summaries.get(stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryArtifactStore;

    #[test]
    fn test_seed_sources() {
        let store = InMemoryArtifactStore::new();
        store.add_source("/raw/a.fits", b"a".to_vec());
        let items = vec![
            Item::new("a", "/raw/a.fits"),
            Item::new("b", "/raw/b.fits"),
        ];

        let mut ledger = RunLedger::new();
        ledger.seed_sources(&items, &store);

        let a = ledger.entry(SOURCE_STAGE, &"a".into()).unwrap();
        assert!(a.is_available());
        assert!(!a.changed());
        assert!(matches!(
            a,
            LedgerEntry::Available { producer: Producer::Source(_), .. }
        ));

        let b = ledger.entry(SOURCE_STAGE, &"b".into()).unwrap();
        assert!(matches!(b.failure(), Some(ItemError::StoreIo { .. })));
        assert_eq!(ledger.keys(SOURCE_STAGE), vec![ItemKey::new("a"), ItemKey::new("b")]);
    }

    #[test]
    fn test_pass_through_keeps_producer() {
        let store = InMemoryArtifactStore::new();
        let artifact = store.write("calibrate", &"a".into(), b"x").unwrap();

        let mut ledger = RunLedger::new();
        ledger.record_stage(
            "calibrate",
            BTreeMap::from([(
                ItemKey::new("a"),
                LedgerEntry::Available {
                    producer: Producer::Stage("calibrate".into()),
                    location: artifact.location,
                    modified: artifact.modified,
                    changed: true,
                },
            )]),
        );
        ledger.pass_through("collapse", "calibrate");

        let entry = ledger.entry("collapse", &"a".into()).unwrap();
        assert!(entry.changed());
        assert!(matches!(
            entry,
            LedgerEntry::Available { producer: Producer::Stage(p), .. } if p == "calibrate"
        ));
        assert!(ledger.summary("collapse").is_none());
    }
}
