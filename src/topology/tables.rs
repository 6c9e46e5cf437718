use crate::core::{MergeError, RangeEnd, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static::lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]{0,63}$").unwrap();
}

fn check_identifier(kind: &str, name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(MergeError::Config(format!("Invalid {} name '{}'", kind, name)))
    }
}

/// A sharded table and the columns that carry its sharding key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    name: String,
    sharding_keys: Vec<String>,
}

impl Table {
    /// Creates a table description; names must be plain SQL identifiers since
    /// they are interpolated into generated statements.
    pub fn new(name: impl Into<String>, sharding_keys: Vec<String>) -> Result<Self> {
        let name = name.into();
        check_identifier("table", &name)?;
        for key in &sharding_keys {
            check_identifier("column", key)?;
        }
        Ok(Self {
            name,
            sharding_keys,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sharding_keys(&self) -> &[String] {
        &self.sharding_keys
    }

    /// Builds the statement counting rows of `column` that fall outside
    /// `[min_id, max_id]`. An open upper bound only checks the lower one.
    pub fn sql_range_check(&self, column: &str, min_id: u64, max_id: RangeEnd) -> String {
        match max_id {
            RangeEnd::Id(max) => format!(
                "SELECT COUNT(*) AS invalid_records FROM {} WHERE {} < {} OR {} > {}",
                self.name, column, min_id, column, max
            ),
            RangeEnd::Infinity => format!(
                "SELECT COUNT(*) AS invalid_records FROM {} WHERE {} < {}",
                self.name, column, min_id
            ),
        }
    }

    /// Name of the data file holding this table's rows for the given range.
    pub fn export_file_name(&self, min_id: u64, max_id: RangeEnd) -> String {
        format!("{}{}-{}.out", self.name, min_id, max_id)
    }
}

/// Enumerates every sharded table known to the deployment.
pub trait TableMetadata: Send + Sync {
    fn sharded_tables(&self) -> Vec<Table>;
}

/// Picks the tables that a particular merge moves.
///
/// This may be a subset of [`TableMetadata::sharded_tables`].
pub trait MergeTableSet: Send + Sync {
    fn tables_for_merge(&self, shard_names: &[String]) -> Vec<Table>;
}

/// Fixed table list serving both roles; the usual choice when every sharded
/// table takes part in the merge.
#[derive(Debug, Clone, Default)]
pub struct StaticTables {
    tables: Vec<Table>,
}

impl StaticTables {
    pub fn new(tables: Vec<Table>) -> Self {
        Self { tables }
    }
}

impl TableMetadata for StaticTables {
    fn sharded_tables(&self) -> Vec<Table> {
        self.tables.clone()
    }
}

impl MergeTableSet for StaticTables {
    fn tables_for_merge(&self, _shard_names: &[String]) -> Vec<Table> {
        self.tables.clone()
    }
}
