// ============================================================================
// ShardMerge Library
// ============================================================================

pub mod config;
pub mod core;
pub mod merge;
pub mod shard;
pub mod simulation;
pub mod topology;
pub mod validation;

// Re-export main types for convenience
pub use config::{MergeConfig, ShardMergeConfig};
pub use crate::core::{
    BinlogCoordinates, ExportCounts, ExportRecord, MergeError, MergePhase, RangeEnd, Result,
    ShardState, TableCounts, TableStatus,
};
pub use merge::{
    CancelSignal, MergeCancellation, MergeContext, MergeOrchestrator, MergeReport, PhaseTiming,
};
pub use shard::{Shard, ShardDefinition, find_merge_target};
pub use topology::{
    AggregateNode, DatabaseNode, FileTransfer, MergeTableSet, RemoteShell, ShardRegistry,
    StaticTables, Table, TableMetadata, TopologyEntity,
};
pub use validation::RangeValidator;
