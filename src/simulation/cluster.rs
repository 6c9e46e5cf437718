use super::node::{SimRow, SimulatedNode};
use super::services::{InMemoryShardRegistry, SimulatedFileTransfer, SimulatedShell};
use super::world::{SimulatedFilesystem, SimulationLog};
use crate::config::MergeConfig;
use crate::core::{MergeError, RangeEnd, Result, ShardState};
use crate::merge::MergeContext;
use crate::shard::Shard;
use crate::topology::{DatabaseNode, StaticTables, Table, TopologyEntity};
use std::sync::Arc;

/// Tables every simulated shard carries.
pub fn default_tables() -> Result<Vec<Table>> {
    Ok(vec![
        Table::new("users", vec!["id".to_string()])?,
        Table::new("posts", vec!["user_id".to_string()])?,
        Table::new(
            "comments",
            vec!["user_id".to_string(), "author_id".to_string()],
        )?,
    ])
}

/// A ready-to-merge topology: two source shards with one standby replica each,
/// the initializing combined shard, an empty aggregate node and an empty new
/// master, all sharing one filesystem and call log.
pub struct SimulatedCluster {
    pub fs: SimulatedFilesystem,
    pub log: SimulationLog,
    pub registry: Arc<InMemoryShardRegistry>,
    pub tables: Arc<StaticTables>,
    pub sources: Vec<Arc<Shard>>,
    pub replicas: Vec<Arc<SimulatedNode>>,
    pub combined: Arc<Shard>,
    pub aggregate: Arc<SimulatedNode>,
    pub new_master: Arc<SimulatedNode>,
    pub config: MergeConfig,
}

impl SimulatedCluster {
    /// Builds the topology for merging `[first.0, first.1]` and
    /// `[second.0, second.1]`, seeding `rows_per_shard` users per shard with
    /// one post and one comment each.
    pub fn two_shard_merge(first: (u64, u64), second: (u64, u64), rows_per_shard: u64) -> Result<Self> {
        if first.1 >= second.0 {
            return Err(MergeError::Config(format!(
                "Shard ranges {}-{} and {}-{} must be ordered and disjoint",
                first.0, first.1, second.0, second.1
            )));
        }
        let fs = SimulatedFilesystem::new();
        let log = SimulationLog::new();
        let config = MergeConfig::default();
        let tables = default_tables()?;

        let mut sources = Vec::new();
        let mut replicas = Vec::new();
        for (idx, (min_id, max_id)) in [first, second].into_iter().enumerate() {
            let shard = Shard::new(
                min_id,
                RangeEnd::Id(max_id),
                format!("db-{}-master", idx + 1),
                ShardState::Ready,
            )?;
            let replica = Arc::new(SimulatedNode::new(
                format!("db-{}-standby", idx + 1),
                config.export_location.clone(),
                fs.clone(),
                log.clone(),
            ));
            seed_rows(&replica, min_id, max_id, rows_per_shard);
            let shard =
                shard.with_standby_replicas(vec![replica.clone() as Arc<dyn DatabaseNode>]);
            sources.push(Arc::new(shard));
            replicas.push(replica);
        }

        let combined = Arc::new(Shard::new(
            first.0,
            RangeEnd::Id(second.1),
            "db-merged-master",
            ShardState::Initializing,
        )?);
        let mut all = sources.clone();
        all.push(combined.clone());

        let aggregate = Arc::new(SimulatedNode::new(
            "db-aggregate",
            config.export_location.clone(),
            fs.clone(),
            log.clone(),
        ));
        let new_master = Arc::new(SimulatedNode::new(
            "db-merged-master",
            config.export_location.clone(),
            fs.clone(),
            log.clone(),
        ));

        Ok(Self {
            registry: Arc::new(InMemoryShardRegistry::new(all)),
            tables: Arc::new(StaticTables::new(tables)),
            fs,
            log,
            sources,
            replicas,
            combined,
            aggregate,
            new_master,
            config,
        })
    }

    pub fn context(&self) -> Result<MergeContext> {
        MergeContext::new(
            self.registry.clone(),
            Arc::new(SimulatedFileTransfer::new(self.fs.clone(), self.log.clone())),
            Arc::new(SimulatedShell::new(self.fs.clone(), self.log.clone())),
            self.tables.clone(),
            self.tables.clone(),
        )
        .with_config(self.config.clone())
    }

    pub fn source_entities(&self) -> Vec<TopologyEntity> {
        self.sources
            .iter()
            .cloned()
            .map(TopologyEntity::Shard)
            .collect()
    }

    pub fn aggregate_entity(&self) -> TopologyEntity {
        TopologyEntity::Aggregate(self.aggregate.clone())
    }

    pub fn new_master_entity(&self) -> TopologyEntity {
        TopologyEntity::Database(self.new_master.clone())
    }
}

/// Fills `replica` with users spread evenly over `[min_id, max_id]`.
/// The range must already be known to be non-empty.
fn seed_rows(replica: &SimulatedNode, min_id: u64, max_id: u64, count: u64) {
    let span = max_id.saturating_sub(min_id).saturating_add(1);
    let count = count.min(span);
    let step = if count == 0 { 1 } else { span / count };
    let ids = (0..count).map(|i| min_id + i * step).collect::<Vec<_>>();

    let row = |pairs: &[(&str, u64)]| -> SimRow {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    };
    replica.insert_rows("users", ids.iter().map(|id| row(&[("id", *id)])).collect());
    replica.insert_rows(
        "posts",
        ids.iter().map(|id| row(&[("user_id", *id)])).collect(),
    );
    replica.insert_rows(
        "comments",
        ids.iter()
            .map(|id| row(&[("user_id", *id), ("author_id", *id)]))
            .collect(),
    );
}
