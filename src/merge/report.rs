use crate::core::{ExportRecord, MergePhase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wall time spent in one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: MergePhase,
    pub elapsed_ms: u64,
}

/// Summary of a successful `set_up_aggregate_node` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source_shards: Vec<String>,
    pub aggregate_node: String,
    pub new_master: String,
    pub exports: Vec<ExportRecord>,
    /// Replicas attached under the aggregate node, in attach order.
    pub attached_sources: Vec<String>,
    pub phases: Vec<PhaseTiming>,
}

impl MergeReport {
    pub fn total_rows(&self) -> u64 {
        self.exports.iter().map(ExportRecord::total_rows).sum()
    }

    pub fn phase_elapsed_ms(&self, phase: MergePhase) -> Option<u64> {
        self.phases
            .iter()
            .find(|timing| timing.phase == phase)
            .map(|timing| timing.elapsed_ms)
    }

    pub fn export_for(&self, replica: &str) -> Option<&ExportRecord> {
        self.exports.iter().find(|record| record.replica == replica)
    }
}
