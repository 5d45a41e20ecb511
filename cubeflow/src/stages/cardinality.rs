//! How a stage maps input items to output items.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::core::ItemKey;

/// Signature of a custom fan-in grouping.
pub type GroupFn = dyn Fn(&ItemKey) -> ItemKey + Send + Sync;

/// Item cardinality of a stage.
#[derive(Debug, Clone, Default)]
pub enum Cardinality {
    /// One output per input, with the same key.
    #[default]
    OneToOne,
    /// Several outputs per input, keyed `<key>_<suffix>`.
    FanOut {
        /// Output suffixes, in order.
        suffixes: Vec<String>,
    },
    /// One output per group of inputs.
    FanIn(Grouping),
}

/// Fan-in grouping rule.
#[derive(Clone)]
pub enum Grouping {
    /// Every input feeds a single output.
    All {
        /// The output key.
        key: ItemKey,
    },
    /// Consecutive (key-ordered) inputs in fixed-size groups, keyed
    /// `<prefix>_<index>`. A trailing short group is not computed.
    Chunks {
        /// Group size.
        size: usize,
        /// Output key prefix.
        prefix: String,
    },
    /// Inputs grouped by a key function.
    By(Arc<GroupFn>),
}

impl Grouping {
    /// Creates a key-function grouping.
    pub fn by<F>(func: F) -> Self
    where
        F: Fn(&ItemKey) -> ItemKey + Send + Sync + 'static,
    {
        Self::By(Arc::new(func))
    }

    /// Returns true if a group may be computed with some members missing.
    #[must_use]
    pub const fn allows_partial(&self) -> bool {
        !matches!(self, Self::Chunks { .. })
    }
}

impl fmt::Debug for Grouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All { key } => f.debug_struct("All").field("key", key).finish(),
            Self::Chunks { size, prefix } => f
                .debug_struct("Chunks")
                .field("size", size)
                .field("prefix", prefix)
                .finish(),
            Self::By(_) => f.write_str("By(<fn>)"),
        }
    }
}

/// One invocation of a transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// Output keys, in order.
    pub outputs: Vec<ItemKey>,
    /// Primary input keys that feed the unit, in key order.
    pub sources: Vec<ItemKey>,
}

impl WorkUnit {
    /// A unit whose single output has the same key as its single input.
    #[must_use]
    pub fn identity(key: ItemKey) -> Self {
        Self {
            outputs: vec![key.clone()],
            sources: vec![key],
        }
    }

    /// The first output key, used to order dispatch.
    #[must_use]
    pub fn lead(&self) -> Option<&ItemKey> {
        self.outputs.first()
    }
}

/// Units of a stage, plus groups that cannot be computed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Computable units, ordered by lead output key.
    pub units: Vec<WorkUnit>,
    /// Fixed-size groups that came up short.
    pub incomplete: Vec<WorkUnit>,
}

impl Cardinality {
    /// Creates a fan-out cardinality.
    #[must_use]
    pub fn fan_out<S: Into<String>>(suffixes: impl IntoIterator<Item = S>) -> Self {
        Self::FanOut {
            suffixes: suffixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a fan-in cardinality collecting every input into `key`.
    #[must_use]
    pub fn fan_in_all(key: impl Into<ItemKey>) -> Self {
        Self::FanIn(Grouping::All { key: key.into() })
    }

    /// Returns true for fan-in stages.
    #[must_use]
    pub const fn is_fan_in(&self) -> bool {
        matches!(self, Self::FanIn(_))
    }

    /// Splits the stage's input keys into work units.
    ///
    /// `members` must be sorted; units come back ordered by lead output key.
    #[must_use]
    pub fn plan(&self, members: &[ItemKey]) -> Plan {
        match self {
            Self::OneToOne => Plan {
                units: members.iter().cloned().map(WorkUnit::identity).collect(),
                incomplete: Vec::new(),
            },
            Self::FanOut { suffixes } => Plan {
                units: members
                    .iter()
                    .map(|key| WorkUnit {
                        outputs: suffixes.iter().map(|s| key.with_suffix(s)).collect(),
                        sources: vec![key.clone()],
                    })
                    .collect(),
                incomplete: Vec::new(),
            },
            Self::FanIn(Grouping::All { key }) => Plan {
                units: if members.is_empty() {
                    Vec::new()
                } else {
                    vec![WorkUnit {
                        outputs: vec![key.clone()],
                        sources: members.to_vec(),
                    }]
                },
                incomplete: Vec::new(),
            },
            Self::FanIn(Grouping::Chunks { size, prefix }) => {
                let size = (*size).max(1);
                let mut plan = Plan::default();
                for (index, chunk) in members.chunks(size).enumerate() {
                    let unit = WorkUnit {
                        outputs: vec![ItemKey::new(format!("{prefix}_{index:04}"))],
                        sources: chunk.to_vec(),
                    };
                    if chunk.len() == size {
                        plan.units.push(unit);
                    } else {
                        plan.incomplete.push(unit);
                    }
                }
                plan
            }
            Self::FanIn(Grouping::By(group)) => {
                let mut groups: BTreeMap<ItemKey, Vec<ItemKey>> = BTreeMap::new();
                for key in members {
                    groups.entry(group(key)).or_default().push(key.clone());
                }
                Plan {
                    units: groups
                        .into_iter()
                        .map(|(output, sources)| WorkUnit {
                            outputs: vec![output],
                            sources,
                        })
                        .collect(),
                    incomplete: Vec::new(),
                }
            }
        }
    }
}
