//! Immutable view of the engine's groups at one point in time

use std::collections::{BTreeMap, HashMap};
use std::time::SystemTime;

use switchyard_api::GroupRecord;

use crate::classify::SELECTOR;

/// Name of the aggregate catch-all group used in global mode.
pub const AGGREGATE_GROUP: &str = "GLOBAL";

/// Every record from one topology fetch, ordered by name.
#[derive(Clone, Debug)]
pub struct TopologySnapshot {
    groups: BTreeMap<String, GroupRecord>,
    fetched_at: SystemTime,
}

impl TopologySnapshot {
    /// Builds a snapshot from records. A later record with the same name replaces an earlier
    /// one.
    pub fn new(records: impl IntoIterator<Item = GroupRecord>) -> Self {
        Self {
            groups: records
                .into_iter()
                .map(|record| (record.name.clone(), record))
                .collect(),
            fetched_at: SystemTime::now(),
        }
    }

    /// Builds a snapshot from a fetch result keyed by name. The key wins over the record's
    /// own `name`.
    #[must_use]
    pub fn from_map(records: HashMap<String, GroupRecord>) -> Self {
        Self::new(records.into_iter().map(|(name, mut record)| {
            record.name = name;
            record
        }))
    }

    /// Record for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&GroupRecord> {
        self.groups.get(name)
    }

    /// Records in lexicographic name order.
    pub fn records(&self) -> impl Iterator<Item = &GroupRecord> {
        self.groups.values()
    }

    /// Whether `name` is a user-switchable group in this snapshot.
    #[must_use]
    pub fn is_selector(&self, name: &str) -> bool {
        self.get(name).is_some_and(|record| record.kind == SELECTOR)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether the snapshot holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// When the records were fetched.
    #[must_use]
    pub const fn fetched_at(&self) -> SystemTime {
        self.fetched_at
    }
}
