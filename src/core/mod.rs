pub mod error;
pub mod types;

pub use error::{MergeError, MergePhase, Result};
pub use types::{
    BinlogCoordinates, ExportCounts, ExportRecord, RangeEnd, ShardState, TableCounts, TableStatus,
};
