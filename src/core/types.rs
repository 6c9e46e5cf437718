use super::{MergeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Upper bound of a shard's id range.
///
/// The last shard in a keyspace is open-ended and uses `Infinity`, which
/// orders after every concrete id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RangeEndRepr", into = "RangeEndRepr")]
pub enum RangeEnd {
    Id(u64),
    Infinity,
}

impl RangeEnd {
    pub fn is_infinity(&self) -> bool {
        matches!(self, RangeEnd::Infinity)
    }

    /// Returns the concrete id, or `None` for the open end.
    pub fn id(&self) -> Option<u64> {
        match self {
            RangeEnd::Id(id) => Some(*id),
            RangeEnd::Infinity => None,
        }
    }
}

impl fmt::Display for RangeEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeEnd::Id(id) => write!(f, "{}", id),
            RangeEnd::Infinity => f.write_str("INFINITY"),
        }
    }
}

impl From<u64> for RangeEnd {
    fn from(id: u64) -> Self {
        RangeEnd::Id(id)
    }
}

impl FromStr for RangeEnd {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("infinity") {
            return Ok(RangeEnd::Infinity);
        }
        trimmed
            .parse::<u64>()
            .map(RangeEnd::Id)
            .map_err(|_| MergeError::Config(format!("Invalid range bound '{}'", s)))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RangeEndRepr {
    Id(u64),
    Word(String),
}

impl TryFrom<RangeEndRepr> for RangeEnd {
    type Error = MergeError;

    fn try_from(repr: RangeEndRepr) -> Result<Self> {
        match repr {
            RangeEndRepr::Id(id) => Ok(RangeEnd::Id(id)),
            RangeEndRepr::Word(word) => word.parse(),
        }
    }
}

impl From<RangeEnd> for RangeEndRepr {
    fn from(end: RangeEnd) -> Self {
        match end {
            RangeEnd::Id(id) => RangeEndRepr::Id(id),
            RangeEnd::Infinity => RangeEndRepr::Word("INFINITY".to_string()),
        }
    }
}

/// Lifecycle phase of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardState {
    Initializing,
    Merging,
    Ready,
    Child,
    NeedsCleanup,
    ReadOnly,
    Offline,
    Deprecated,
    Decommissioned,
}

impl ShardState {
    pub const ALL: [ShardState; 9] = [
        ShardState::Initializing,
        ShardState::Merging,
        ShardState::Ready,
        ShardState::Child,
        ShardState::NeedsCleanup,
        ShardState::ReadOnly,
        ShardState::Offline,
        ShardState::Deprecated,
        ShardState::Decommissioned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShardState::Initializing => "initializing",
            ShardState::Merging => "merging",
            ShardState::Ready => "ready",
            ShardState::Child => "child",
            ShardState::NeedsCleanup => "needs_cleanup",
            ShardState::ReadOnly => "read_only",
            ShardState::Offline => "offline",
            ShardState::Deprecated => "deprecated",
            ShardState::Decommissioned => "decommissioned",
        }
    }
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShardState {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self> {
        ShardState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s.trim())
            .ok_or_else(|| MergeError::Config(format!("Unknown shard state '{}'", s)))
    }
}

/// Outcome of a range check for one sharded table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Valid,
    Invalid,
}

/// Position in a node's binary log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinlogCoordinates {
    pub log_file: String,
    pub log_pos: u64,
}

impl BinlogCoordinates {
    pub fn new(log_file: impl Into<String>, log_pos: u64) -> Self {
        Self {
            log_file: log_file.into(),
            log_pos,
        }
    }
}

impl fmt::Display for BinlogCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.log_file, self.log_pos)
    }
}

/// Row and byte totals for one exported (or imported) table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub rows: u64,
    pub bytes: u64,
}

/// Per-table counts keyed by table name.
pub type ExportCounts = BTreeMap<String, TableCounts>;

/// What one source replica produced during the export phase.
///
/// Consumed by the transfer, import and replication-hierarchy phases of the
/// same run and then dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub replica: String,
    pub shard: String,
    pub min_id: u64,
    pub max_id: RangeEnd,
    pub counts: ExportCounts,
    pub coordinates: BinlogCoordinates,
    pub files: Vec<String>,
}

impl ExportRecord {
    pub fn total_rows(&self) -> u64 {
        self.counts.values().map(|c| c.rows).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinity_orders_after_every_id() {
        assert!(RangeEnd::Infinity > RangeEnd::Id(u64::MAX));
        assert!(RangeEnd::Id(10) < RangeEnd::Id(11));
    }

    #[test]
    fn range_end_serializes_as_number_or_word() {
        let json = serde_json::to_string(&vec![RangeEnd::Id(5), RangeEnd::Infinity]).unwrap();
        assert_eq!(json, r#"[5,"INFINITY"]"#);
        let back: Vec<RangeEnd> = serde_json::from_str(r#"[7,"infinity"]"#).unwrap();
        assert_eq!(back, vec![RangeEnd::Id(7), RangeEnd::Infinity]);
        assert!(serde_json::from_str::<RangeEnd>(r#""soon""#).is_err());
    }

    #[test]
    fn shard_state_names_round_trip() {
        for state in ShardState::ALL {
            assert_eq!(state.as_str().parse::<ShardState>().unwrap(), state);
        }
        assert_eq!(
            serde_json::to_string(&ShardState::NeedsCleanup).unwrap(),
            r#""needs_cleanup""#
        );
        assert!("merged".parse::<ShardState>().is_err());
    }
}
