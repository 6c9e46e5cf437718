use super::cancellation::{CallGuard, CancelSignal};
use super::context::MergeContext;
use super::participants::MergeParticipants;
use super::phases::{MergeRun, PausedReplicas};
use super::report::{MergeReport, PhaseTiming};
use crate::core::{MergePhase, Result};
use crate::topology::TopologyEntity;
use chrono::Utc;
use std::future::Future;
use std::time::Instant;
use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

/// Sets up the replication hierarchy that consolidates shards onto an
/// aggregate node and a new shard master.
pub struct MergeOrchestrator {
    ctx: MergeContext,
    cancel: CancelSignal,
}

impl MergeOrchestrator {
    pub fn new(ctx: MergeContext) -> Self {
        Self {
            ctx,
            cancel: CancelSignal::never(),
        }
    }

    pub fn with_cancellation(mut self, signal: CancelSignal) -> Self {
        self.cancel = signal;
        self
    }

    pub fn context(&self) -> &MergeContext {
        &self.ctx
    }

    /// Copies the data of `sources` onto `aggregate_node` and `new_master` and
    /// wires replication `source replicas -> aggregate_node -> new_master`.
    ///
    /// Preconditions are checked before any node is contacted. Phases run in
    /// order with a full barrier between them:
    /// 1. restart both destinations with bulk-load options,
    /// 2. ship table definitions from a source replica to both destinations,
    /// 3. export every source replica concurrently with replication paused,
    /// 4. copy each export to the destinations and resume that replica,
    /// 5. import each export into both destinations, checking row counts,
    /// 6. restart both destinations with their normal options,
    /// 7. attach the replicas to the aggregate node and point the new master at it.
    ///
    /// On failure the error names the phase and node. Nothing is rolled back,
    /// except that replicas taken out of replication are put back when
    /// `compensate_on_failure` is set.
    pub async fn set_up_aggregate_node(
        &self,
        sources: &[TopologyEntity],
        aggregate_node: &TopologyEntity,
        new_master: &TopologyEntity,
    ) -> Result<MergeReport> {
        let participants = MergeParticipants::resolve(sources, aggregate_node, new_master)?;
        let guard = CallGuard::new(self.ctx.config.call_timeout_duration(), self.cancel.clone());
        guard.check(MergePhase::Preconditions)?;

        let run_id = Uuid::new_v4();
        let span = info_span!(
            "merge.set_up_aggregate_node",
            run_id = %run_id,
            aggregate = %participants.aggregate.name(),
            new_master = %participants.new_master.name()
        );

        async move {
            let started_at = Utc::now();
            let tables = self
                .ctx
                .merge_tables
                .tables_for_merge(&participants.shard_names());
            event!(
                Level::INFO,
                shards = ?participants.shard_names(),
                tables = tables.len(),
                "merge run starting"
            );

            let run = MergeRun {
                ctx: &self.ctx,
                guard,
                participants: &participants,
                tables,
                paused: PausedReplicas::default(),
            };

            match drive(&run).await {
                Ok((exports, attached_sources, phases)) => {
                    event!(Level::INFO, "merge run finished");
                    Ok(MergeReport {
                        run_id,
                        started_at,
                        finished_at: Utc::now(),
                        source_shards: participants.shard_names(),
                        aggregate_node: participants.aggregate.name().to_string(),
                        new_master: participants.new_master.name().to_string(),
                        exports,
                        attached_sources,
                        phases,
                    })
                }
                Err(err) => {
                    event!(Level::ERROR, error = %err, "merge run aborted");
                    if self.ctx.config.compensate_on_failure {
                        run.compensate().await;
                    }
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }
}

type RunOutput = (Vec<crate::core::ExportRecord>, Vec<String>, Vec<PhaseTiming>);

async fn drive(run: &MergeRun<'_>) -> Result<RunOutput> {
    let mut timings = Vec::new();

    timed(&mut timings, run, MergePhase::PerformanceTuning, run.tune_destinations()).await?;
    timed(&mut timings, run, MergePhase::SchemaProvisioning, run.provision_schema()).await?;
    let exports = timed(&mut timings, run, MergePhase::Export, run.export_sources()).await?;
    timed(&mut timings, run, MergePhase::Transfer, run.transfer_exports(&exports)).await?;
    timed(&mut timings, run, MergePhase::Import, run.import_exports(&exports)).await?;
    timed(&mut timings, run, MergePhase::SettingsRollback, run.restore_destinations()).await?;
    let attached = timed(
        &mut timings,
        run,
        MergePhase::ReplicationHierarchy,
        run.wire_replication(&exports),
    )
    .await?;

    Ok((exports, attached, timings))
}

async fn timed<T>(
    timings: &mut Vec<PhaseTiming>,
    run: &MergeRun<'_>,
    phase: MergePhase,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    run.guard.check(phase)?;
    let started = Instant::now();
    event!(Level::INFO, phase = %phase, "merge phase started");
    let result = work.await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(_) => {
            event!(Level::INFO, phase = %phase, elapsed_ms, "merge phase finished");
            timings.push(PhaseTiming { phase, elapsed_ms });
        }
        Err(err) => {
            event!(Level::ERROR, phase = %phase, elapsed_ms, error = %err, "merge phase failed");
        }
    }
    result
}
