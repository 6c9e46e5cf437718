use crate::core::{MergeError, Result};
use crate::shard::Shard;
use crate::topology::{AggregateNode, DatabaseNode, TopologyEntity};
use std::collections::HashSet;
use std::sync::Arc;

/// One source shard together with the standby replica it exports from.
#[derive(Clone)]
pub(crate) struct SourceReplica {
    pub(crate) shard: Arc<Shard>,
    pub(crate) replica: Arc<dyn DatabaseNode>,
}

/// The fixed set of actors of a single merge run.
///
/// Built only through [`MergeParticipants::resolve`], which checks every
/// precondition without contacting any node.
pub(crate) struct MergeParticipants {
    pub(crate) sources: Vec<SourceReplica>,
    pub(crate) aggregate: Arc<dyn AggregateNode>,
    pub(crate) new_master: Arc<dyn DatabaseNode>,
}

impl MergeParticipants {
    pub(crate) fn resolve(
        sources: &[TopologyEntity],
        aggregate_node: &TopologyEntity,
        new_master: &TopologyEntity,
    ) -> Result<Self> {
        if sources.is_empty() {
            return Err(MergeError::Precondition(
                "At least one source shard is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(sources.len());
        for (idx, source) in sources.iter().enumerate() {
            let TopologyEntity::Shard(shard) = source else {
                return Err(MergeError::Precondition(format!(
                    "Source #{} ({}) is a {}, not a shard",
                    idx,
                    source.name(),
                    source.kind()
                )));
            };
            if !seen.insert(shard.name().to_string()) {
                return Err(MergeError::Precondition(format!(
                    "Shard {} is listed more than once",
                    shard.name()
                )));
            }
            let replica = shard.standby_replica().ok_or_else(|| {
                MergeError::Precondition(format!(
                    "Shard {} has no standby replica to export from",
                    shard.name()
                ))
            })?;
            resolved.push(SourceReplica {
                shard: shard.clone(),
                replica,
            });
        }

        let TopologyEntity::Aggregate(aggregate) = aggregate_node else {
            return Err(MergeError::Precondition(format!(
                "{} is a {} and cannot aggregate replication sources",
                aggregate_node.name(),
                aggregate_node.kind()
            )));
        };
        let already_aggregating = aggregate.aggregating_nodes();
        if !already_aggregating.is_empty() {
            return Err(MergeError::Precondition(format!(
                "Aggregate node {} is already in use by {}",
                aggregate.name(),
                already_aggregating.join(", ")
            )));
        }

        let master: Arc<dyn DatabaseNode> = match new_master {
            TopologyEntity::Database(node) => node.clone(),
            TopologyEntity::Aggregate(node) => node.clone().as_database_node(),
            TopologyEntity::Shard(shard) => {
                return Err(MergeError::Precondition(format!(
                    "New master must be a database node, got shard {}",
                    shard.name()
                )));
            }
        };
        if let Some(pool) = master.pool() {
            return Err(MergeError::Precondition(format!(
                "New master {} already belongs to pool {}",
                master.name(),
                pool
            )));
        }
        if master.name() == aggregate.name() {
            return Err(MergeError::Precondition(format!(
                "{} cannot be both the aggregate node and the new master",
                master.name()
            )));
        }
        for source in &resolved {
            let replica = source.replica.name();
            if replica == aggregate.name() || replica == master.name() {
                return Err(MergeError::Precondition(format!(
                    "Standby replica {} of {} cannot also be a merge destination",
                    replica,
                    source.shard.name()
                )));
            }
        }

        Ok(Self {
            sources: resolved,
            aggregate: aggregate.clone(),
            new_master: master,
        })
    }

    /// Both destinations, aggregate node first.
    pub(crate) fn destinations(&self) -> [Arc<dyn DatabaseNode>; 2] {
        [
            self.aggregate.clone().as_database_node(),
            self.new_master.clone(),
        ]
    }

    pub(crate) fn destination_names(&self) -> Vec<String> {
        vec![
            self.aggregate.name().to_string(),
            self.new_master.name().to_string(),
        ]
    }

    /// Replica that provides table definitions: the one of the last source.
    pub(crate) fn schema_source(&self) -> &Arc<dyn DatabaseNode> {
        let last = self.sources.len() - 1;
        &self.sources[last].replica
    }

    pub(crate) fn shard_names(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|s| s.shard.name().to_string())
            .collect()
    }
}
