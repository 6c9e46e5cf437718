use super::tables::Table;
use crate::core::{BinlogCoordinates, ExportCounts, RangeEnd, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// A result row as returned by [`DatabaseNode::query`].
pub type QueryRow = Vec<serde_json::Value>;

/// A single database server (master, standby replica or fresh host).
///
/// Every async method is a remote call and may block for a long time; callers
/// wrap them in their own timeout and cancellation handling.
#[async_trait]
pub trait DatabaseNode: Send + Sync {
    /// Host name used for logging, file transfer and replication wiring.
    fn name(&self) -> &str;

    /// Pool the node currently belongs to, if any. Local metadata; no remote call.
    fn pool(&self) -> Option<String>;

    fn assign_pool(&self, pool: Option<String>);

    async fn query(&self, sql: &str) -> Result<Vec<QueryRow>>;

    /// Restarts the database process with the given server options.
    async fn restart_with_options(&self, options: &[String]) -> Result<()>;

    /// Dumps table definitions and returns the generated file names.
    async fn export_schemata(&self, tables: &[Table]) -> Result<Vec<String>>;

    async fn import_schemata(&self, files: &[String]) -> Result<()>;

    /// Exports rows of `tables` restricted to `[min_id, max_id]` into files in
    /// the export location and returns what was written.
    async fn export_data(&self, tables: &[Table], min_id: u64, max_id: RangeEnd)
    -> Result<ExportCounts>;

    /// Records the counts a following [`DatabaseNode::import_data`] must reproduce.
    async fn set_expected_import_counts(&self, counts: &ExportCounts) -> Result<()>;

    /// Loads previously transferred data files and returns what was loaded.
    async fn import_data(&self, tables: &[Table], min_id: u64, max_id: RangeEnd)
    -> Result<ExportCounts>;

    async fn binlog_coordinates(&self) -> Result<BinlogCoordinates>;

    async fn pause_replication(&self) -> Result<()>;

    async fn resume_replication(&self) -> Result<()>;

    /// Blocks until the node has applied everything its master has written.
    async fn catch_up_to_master(&self) -> Result<()>;

    async fn disable_monitoring(&self) -> Result<()>;

    async fn enable_monitoring(&self) -> Result<()>;

    async fn stop_query_killer(&self) -> Result<()>;

    async fn start_query_killer(&self) -> Result<()>;

    /// Points this node's replication at `master`, starting at `coordinates`.
    async fn change_master_to(&self, master: &str, coordinates: &BinlogCoordinates) -> Result<()>;
}

/// A node able to replicate from several masters at once.
#[async_trait]
pub trait AggregateNode: DatabaseNode {
    /// Names of the nodes currently replicating into this one.
    fn aggregating_nodes(&self) -> Vec<String>;

    /// Adds `node` as a replication source, starting at `coordinates`.
    async fn add_node_to_aggregate(&self, node: &str, coordinates: &BinlogCoordinates)
    -> Result<()>;

    fn as_database_node(self: Arc<Self>) -> Arc<dyn DatabaseNode>;
}
