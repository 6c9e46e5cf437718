use super::node::{AggregateNode, DatabaseNode};
use crate::shard::Shard;
use std::fmt;
use std::sync::Arc;

/// Anything that can be handed to the merge orchestrator as a participant.
///
/// The variant decides which operations the participant supports: only
/// `Aggregate` can take several replication sources, only `Shard` owns an id
/// range and standby replicas.
#[derive(Clone)]
pub enum TopologyEntity {
    Shard(Arc<Shard>),
    Aggregate(Arc<dyn AggregateNode>),
    Database(Arc<dyn DatabaseNode>),
}

impl TopologyEntity {
    pub fn kind(&self) -> &'static str {
        match self {
            TopologyEntity::Shard(_) => "shard",
            TopologyEntity::Aggregate(_) => "aggregate node",
            TopologyEntity::Database(_) => "database node",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TopologyEntity::Shard(shard) => shard.name(),
            TopologyEntity::Aggregate(node) => node.name(),
            TopologyEntity::Database(node) => node.name(),
        }
    }
}

impl fmt::Debug for TopologyEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.name())
    }
}

impl From<Arc<Shard>> for TopologyEntity {
    fn from(shard: Arc<Shard>) -> Self {
        TopologyEntity::Shard(shard)
    }
}
