//! Shard model, lifecycle transitions and merge-target lookup.

mod lifecycle;
mod resolver;

pub use resolver::find_merge_target;

use crate::core::{MergeError, RangeEnd, Result, ShardState};
use crate::topology::DatabaseNode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// A contiguous range of ids `[min_id, max_id]` served by one master and its
/// replicas.
pub struct Shard {
    name: String,
    min_id: u64,
    max_id: RangeEnd,
    state: RwLock<ShardState>,
    master: String,
    standby_replicas: Vec<Arc<dyn DatabaseNode>>,
}

impl Shard {
    /// Creates a shard without replicas. Fails if the range is empty.
    pub fn new(
        min_id: u64,
        max_id: RangeEnd,
        master: impl Into<String>,
        state: ShardState,
    ) -> Result<Self> {
        if let RangeEnd::Id(max) = max_id {
            if max < min_id {
                return Err(MergeError::Config(format!(
                    "Shard range is empty: min_id {} is above max_id {}",
                    min_id, max
                )));
            }
        }
        Ok(Self {
            name: Self::name_for_range(min_id, max_id),
            min_id,
            max_id,
            state: RwLock::new(state),
            master: master.into(),
            standby_replicas: Vec::new(),
        })
    }

    pub fn with_standby_replicas(mut self, replicas: Vec<Arc<dyn DatabaseNode>>) -> Self {
        self.standby_replicas = replicas;
        self
    }

    /// Canonical shard name, e.g. `shard-1-1000` or `shard-5001-infinity`.
    pub fn name_for_range(min_id: u64, max_id: RangeEnd) -> String {
        match max_id {
            RangeEnd::Id(max) => format!("shard-{}-{}", min_id, max),
            RangeEnd::Infinity => format!("shard-{}-infinity", min_id),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn min_id(&self) -> u64 {
        self.min_id
    }

    pub fn max_id(&self) -> RangeEnd {
        self.max_id
    }

    pub fn master(&self) -> &str {
        &self.master
    }

    pub fn state(&self) -> ShardState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: ShardState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn standby_replicas(&self) -> &[Arc<dyn DatabaseNode>] {
        &self.standby_replicas
    }

    /// The replica used for heavy work (validation, export). Never the master.
    pub fn standby_replica(&self) -> Option<Arc<dyn DatabaseNode>> {
        self.standby_replicas.first().cloned()
    }

    /// True if this shard's range covers all of `other`'s range.
    pub fn contains_range(&self, other: &Shard) -> bool {
        self.min_id <= other.min_id && self.max_id >= other.max_id
    }
}

impl fmt::Debug for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shard")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("master", &self.master)
            .field(
                "standby_replicas",
                &self
                    .standby_replicas
                    .iter()
                    .map(|r| r.name().to_string())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Serialized form of a shard as kept in topology snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardDefinition {
    pub min_id: u64,
    pub max_id: RangeEnd,
    pub state: ShardState,
    pub master: String,
    #[serde(default)]
    pub standby_replicas: Vec<String>,
}

impl ShardDefinition {
    pub fn from_shard(shard: &Shard) -> Self {
        Self {
            min_id: shard.min_id,
            max_id: shard.max_id,
            state: shard.state(),
            master: shard.master.clone(),
            standby_replicas: shard
                .standby_replicas
                .iter()
                .map(|r| r.name().to_string())
                .collect(),
        }
    }

    /// Builds the shard without live replica handles.
    pub fn to_shard(&self) -> Result<Shard> {
        Shard::new(self.min_id, self.max_id, self.master.clone(), self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_follows_range() {
        let shard = Shard::new(1, RangeEnd::Id(1000), "db-1", ShardState::Ready).unwrap();
        assert_eq!(shard.name(), "shard-1-1000");
        let open = Shard::new(5001, RangeEnd::Infinity, "db-2", ShardState::Ready).unwrap();
        assert_eq!(open.name(), "shard-5001-infinity");
    }

    #[test]
    fn rejects_empty_range() {
        assert!(Shard::new(10, RangeEnd::Id(9), "db-1", ShardState::Ready).is_err());
        assert!(Shard::new(10, RangeEnd::Id(10), "db-1", ShardState::Ready).is_ok());
    }

    #[test]
    fn contains_range_is_inclusive() {
        let wide = Shard::new(1, RangeEnd::Id(2000), "db-1", ShardState::Initializing).unwrap();
        let narrow = Shard::new(1001, RangeEnd::Id(2000), "db-2", ShardState::Ready).unwrap();
        assert!(wide.contains_range(&narrow));
        assert!(!narrow.contains_range(&wide));
    }

    #[test]
    fn definition_round_trips_through_json() {
        let shard = Shard::new(1, RangeEnd::Infinity, "db-1", ShardState::ReadOnly).unwrap();
        let def = ShardDefinition::from_shard(&shard);
        let json = serde_json::to_string(&def).unwrap();
        let back: ShardDefinition = serde_json::from_str(&json).unwrap();
        let rebuilt = back.to_shard().unwrap();
        assert_eq!(rebuilt.name(), shard.name());
        assert_eq!(rebuilt.state(), ShardState::ReadOnly);
    }
}
