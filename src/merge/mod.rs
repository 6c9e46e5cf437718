//! Live shard merge orchestration.

mod cancellation;
mod context;
mod orchestrator;
mod participants;
mod phases;
mod report;

pub(crate) use cancellation::CallGuard;
pub use cancellation::{CancelSignal, MergeCancellation};
pub use context::MergeContext;
pub use orchestrator::MergeOrchestrator;
pub use report::{MergeReport, PhaseTiming};
