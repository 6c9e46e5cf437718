use super::world::{SimulatedFilesystem, SimulationLog};
use crate::core::{BinlogCoordinates, ExportCounts, MergeError, RangeEnd, Result, TableCounts};
use crate::topology::{AggregateNode, DatabaseNode, QueryRow, Table};
use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

lazy_static::lazy_static! {
    static ref RANGE_CHECK: Regex = Regex::new(
        r"^SELECT COUNT\(\*\) AS invalid_records FROM (\w+) WHERE (\w+) < (\d+)(?: OR \w+ > (\d+))?$"
    )
    .unwrap();
}

/// A row: column name to integer value.
pub type SimRow = BTreeMap<String, u64>;

#[derive(Debug, Default)]
struct NodeState {
    pool: Option<String>,
    schema: BTreeSet<String>,
    tables: BTreeMap<String, Vec<SimRow>>,
    replicating: bool,
    monitoring: bool,
    query_killer: bool,
    binlog_file: String,
    binlog_pos: u64,
    restarts: Vec<Vec<String>>,
    expected_import: Option<ExportCounts>,
    injected_counts: Vec<ExportCounts>,
    aggregated: Vec<(String, BinlogCoordinates)>,
    master: Option<(String, BinlogCoordinates)>,
    failures: BTreeMap<String, String>,
    delays: BTreeMap<String, Duration>,
    rows_lost_on_import: usize,
}

/// In-memory database host.
///
/// Keeps table rows, replication flags and binlog position, reads and writes
/// export files through a shared [`SimulatedFilesystem`] and records every
/// call in a [`SimulationLog`].
pub struct SimulatedNode {
    name: String,
    export_location: String,
    fs: SimulatedFilesystem,
    log: SimulationLog,
    state: Mutex<NodeState>,
    queries_in_flight: AtomicUsize,
    max_queries_in_flight: AtomicUsize,
}

impl SimulatedNode {
    pub fn new(
        name: impl Into<String>,
        export_location: impl Into<String>,
        fs: SimulatedFilesystem,
        log: SimulationLog,
    ) -> Self {
        let name = name.into();
        Self {
            state: Mutex::new(NodeState {
                replicating: true,
                monitoring: true,
                query_killer: true,
                binlog_file: format!("{}-bin.000001", name),
                binlog_pos: 4,
                ..NodeState::default()
            }),
            name,
            export_location: export_location.into(),
            fs,
            log,
            queries_in_flight: AtomicUsize::new(0),
            max_queries_in_flight: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_pool(self, pool: impl Into<String>) -> Self {
        self.state().pool = Some(pool.into());
        self
    }

    pub fn with_binlog(self, file: impl Into<String>, pos: u64) -> Self {
        {
            let mut state = self.state();
            state.binlog_file = file.into();
            state.binlog_pos = pos;
        }
        self
    }

    /// Defines `table` and appends `rows` to it.
    pub fn insert_rows(&self, table: &str, rows: Vec<SimRow>) {
        let mut state = self.state();
        state.schema.insert(table.to_string());
        let len = rows.len() as u64;
        state.tables.entry(table.to_string()).or_default().extend(rows);
        state.binlog_pos += len * 100;
    }

    /// Marks an existing aggregation link, as if left over from an earlier run.
    pub fn attach_existing_source(&self, node: &str) {
        self.state()
            .aggregated
            .push((node.to_string(), BinlogCoordinates::new("unknown", 0)));
    }

    /// Makes every later call of `op` fail.
    pub fn fail_on(&self, op: &str, message: &str) {
        self.state()
            .failures
            .insert(op.to_string(), message.to_string());
    }

    /// Makes every later call of `op` take at least `delay`.
    pub fn delay_on(&self, op: &str, delay: Duration) {
        self.state().delays.insert(op.to_string(), delay);
    }

    /// Drops `rows` rows of every table on the next imports.
    pub fn lose_rows_on_import(&self, rows: usize) {
        self.state().rows_lost_on_import = rows;
    }

    pub fn rows(&self, table: &str) -> Vec<SimRow> {
        self.state().tables.get(table).cloned().unwrap_or_default()
    }

    /// Sorted values of `column` across `table`.
    pub fn ids(&self, table: &str, column: &str) -> Vec<u64> {
        let mut ids = self
            .rows(table)
            .iter()
            .filter_map(|row| row.get(column).copied())
            .collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.state().schema.contains(table)
    }

    pub fn is_replicating(&self) -> bool {
        self.state().replicating
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.state().monitoring
    }

    pub fn query_killer_running(&self) -> bool {
        self.state().query_killer
    }

    pub fn restart_history(&self) -> Vec<Vec<String>> {
        self.state().restarts.clone()
    }

    pub fn injected_counts(&self) -> Vec<ExportCounts> {
        self.state().injected_counts.clone()
    }

    pub fn aggregated_sources(&self) -> Vec<(String, BinlogCoordinates)> {
        self.state().aggregated.clone()
    }

    pub fn replication_source(&self) -> Option<(String, BinlogCoordinates)> {
        self.state().master.clone()
    }

    pub fn max_concurrent_queries(&self) -> usize {
        self.max_queries_in_flight.load(Ordering::SeqCst)
    }

    fn path(&self, file: &str) -> String {
        format!("{}/{}", self.export_location.trim_end_matches('/'), file)
    }

    /// Logs the call, applies any injected delay and fails if told to.
    async fn enter(&self, op: &str) -> Result<()> {
        self.log.record(&self.name, op);
        let (delay, failure) = {
            let state = self.state();
            (state.delays.get(op).copied(), state.failures.get(op).cloned())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(message) => Err(MergeError::Io(format!("{} failed on {}: {}", op, self.name, message))),
            None => Ok(()),
        }
    }

    fn count_out_of_range(&self, sql: &str) -> Result<u64> {
        let caps = RANGE_CHECK
            .captures(sql)
            .ok_or_else(|| MergeError::Io(format!("unsupported query on {}: {}", self.name, sql)))?;
        let table = &caps[1];
        let column = &caps[2];
        let min = caps[3].parse::<u64>().map_err(|e| MergeError::Io(e.to_string()))?;
        let max = match caps.get(4) {
            Some(m) => Some(m.as_str().parse::<u64>().map_err(|e| MergeError::Io(e.to_string()))?),
            None => None,
        };
        let state = self.state();
        let rows = state
            .tables
            .get(table)
            .ok_or_else(|| MergeError::Io(format!("table {} does not exist on {}", table, self.name)))?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(column))
            .filter(|value| **value < min || max.is_some_and(|max| **value > max))
            .count() as u64)
    }
}

fn in_range(table: &Table, row: &SimRow, min_id: u64, max_id: RangeEnd) -> bool {
    let Some(key) = table.sharding_keys().first() else {
        return true;
    };
    match row.get(key) {
        Some(value) => *value >= min_id && RangeEnd::Id(*value) <= max_id,
        None => false,
    }
}

#[async_trait]
impl DatabaseNode for SimulatedNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn pool(&self) -> Option<String> {
        self.state().pool.clone()
    }

    fn assign_pool(&self, pool: Option<String>) {
        self.state().pool = pool;
    }

    async fn query(&self, sql: &str) -> Result<Vec<QueryRow>> {
        self.enter("query").await?;
        let now = self.queries_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_queries_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
        let result = self.count_out_of_range(sql);
        self.queries_in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![vec![json!(result?)]])
    }

    async fn restart_with_options(&self, options: &[String]) -> Result<()> {
        self.enter("restart_with_options").await?;
        self.state().restarts.push(options.to_vec());
        Ok(())
    }

    async fn export_schemata(&self, tables: &[Table]) -> Result<Vec<String>> {
        self.enter("export_schemata").await?;
        let known = tables
            .iter()
            .filter(|table| self.has_table(table.name()))
            .map(|table| table.name().to_string())
            .collect::<Vec<_>>();
        let file = format!("create_tables_{}.sql", self.name);
        self.fs
            .write(&self.name, &self.path(&file), serde_json::to_string(&known)?);
        Ok(vec![file])
    }

    async fn import_schemata(&self, files: &[String]) -> Result<()> {
        self.enter("import_schemata").await?;
        for file in files {
            let raw = self
                .fs
                .read(&self.name, &self.path(file))
                .ok_or_else(|| MergeError::Io(format!("{} missing on {}", file, self.name)))?;
            let names: Vec<String> = serde_json::from_str(&raw)?;
            self.state().schema.extend(names);
        }
        Ok(())
    }

    async fn export_data(
        &self,
        tables: &[Table],
        min_id: u64,
        max_id: RangeEnd,
    ) -> Result<ExportCounts> {
        self.enter("export_data").await?;
        let mut counts = ExportCounts::new();
        for table in tables {
            let rows = self
                .rows(table.name())
                .into_iter()
                .filter(|row| in_range(table, row, min_id, max_id))
                .collect::<Vec<_>>();
            let contents = serde_json::to_string(&rows)?;
            counts.insert(
                table.name().to_string(),
                TableCounts {
                    rows: rows.len() as u64,
                    bytes: contents.len() as u64,
                },
            );
            self.fs.write(
                &self.name,
                &self.path(&table.export_file_name(min_id, max_id)),
                contents,
            );
        }
        Ok(counts)
    }

    async fn set_expected_import_counts(&self, counts: &ExportCounts) -> Result<()> {
        self.enter("set_expected_import_counts").await?;
        let mut state = self.state();
        state.expected_import = Some(counts.clone());
        state.injected_counts.push(counts.clone());
        Ok(())
    }

    async fn import_data(
        &self,
        tables: &[Table],
        min_id: u64,
        max_id: RangeEnd,
    ) -> Result<ExportCounts> {
        self.enter("import_data").await?;
        let lost = {
            let mut state = self.state();
            if state.expected_import.take().is_none() {
                return Err(MergeError::Io(format!(
                    "import on {} started without expected counts",
                    self.name
                )));
            }
            state.rows_lost_on_import
        };

        let mut counts = ExportCounts::new();
        for table in tables {
            if !self.has_table(table.name()) {
                return Err(MergeError::Io(format!(
                    "table {} does not exist on {}",
                    table.name(),
                    self.name
                )));
            }
            let path = self.path(&table.export_file_name(min_id, max_id));
            let raw = self
                .fs
                .read(&self.name, &path)
                .ok_or_else(|| MergeError::Io(format!("{} missing on {}", path, self.name)))?;
            let mut rows: Vec<SimRow> = serde_json::from_str(&raw)?;
            rows.truncate(rows.len().saturating_sub(lost));
            counts.insert(
                table.name().to_string(),
                TableCounts {
                    rows: rows.len() as u64,
                    bytes: raw.len() as u64,
                },
            );
            self.state()
                .tables
                .entry(table.name().to_string())
                .or_default()
                .extend(rows);
            self.fs.remove(&self.name, &path);
        }
        Ok(counts)
    }

    async fn binlog_coordinates(&self) -> Result<BinlogCoordinates> {
        self.enter("binlog_coordinates").await?;
        let state = self.state();
        Ok(BinlogCoordinates::new(state.binlog_file.clone(), state.binlog_pos))
    }

    async fn pause_replication(&self) -> Result<()> {
        self.enter("pause_replication").await?;
        self.state().replicating = false;
        Ok(())
    }

    async fn resume_replication(&self) -> Result<()> {
        self.enter("resume_replication").await?;
        let mut state = self.state();
        state.replicating = true;
        // Writes that queued up on the master while paused.
        state.binlog_pos += 100;
        Ok(())
    }

    async fn catch_up_to_master(&self) -> Result<()> {
        self.enter("catch_up_to_master").await?;
        if !self.state().replicating {
            return Err(MergeError::Io(format!(
                "{} cannot catch up while replication is stopped",
                self.name
            )));
        }
        Ok(())
    }

    async fn disable_monitoring(&self) -> Result<()> {
        self.enter("disable_monitoring").await?;
        self.state().monitoring = false;
        Ok(())
    }

    async fn enable_monitoring(&self) -> Result<()> {
        self.enter("enable_monitoring").await?;
        self.state().monitoring = true;
        Ok(())
    }

    async fn stop_query_killer(&self) -> Result<()> {
        self.enter("stop_query_killer").await?;
        self.state().query_killer = false;
        Ok(())
    }

    async fn start_query_killer(&self) -> Result<()> {
        self.enter("start_query_killer").await?;
        self.state().query_killer = true;
        Ok(())
    }

    async fn change_master_to(&self, master: &str, coordinates: &BinlogCoordinates) -> Result<()> {
        self.enter("change_master_to").await?;
        self.state().master = Some((master.to_string(), coordinates.clone()));
        Ok(())
    }
}

#[async_trait]
impl AggregateNode for SimulatedNode {
    fn aggregating_nodes(&self) -> Vec<String> {
        self.state()
            .aggregated
            .iter()
            .map(|(node, _)| node.clone())
            .collect()
    }

    async fn add_node_to_aggregate(
        &self,
        node: &str,
        coordinates: &BinlogCoordinates,
    ) -> Result<()> {
        self.enter("add_node_to_aggregate").await?;
        let mut state = self.state();
        if state.aggregated.iter().any(|(existing, _)| existing == node) {
            return Err(MergeError::Io(format!(
                "{} already aggregates {}",
                self.name, node
            )));
        }
        state.aggregated.push((node.to_string(), coordinates.clone()));
        // Replication from the new source starts right away and is binlogged.
        state.binlog_pos += 100;
        Ok(())
    }

    fn as_database_node(self: Arc<Self>) -> Arc<dyn DatabaseNode> {
        self
    }
}
