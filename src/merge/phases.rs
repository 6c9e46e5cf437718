use super::cancellation::{CallGuard, CancelSignal};
use super::context::MergeContext;
use super::participants::{MergeParticipants, SourceReplica};
use crate::core::{ExportCounts, ExportRecord, MergeError, MergePhase, Result};
use crate::topology::{DatabaseNode, Table};
use futures::future::join_all;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{Level, event};

/// Source replicas currently out of normal service (monitoring off, query
/// killer stopped, replication possibly paused).
#[derive(Default)]
pub(crate) struct PausedReplicas {
    inner: Mutex<Vec<Arc<dyn DatabaseNode>>>,
}

impl PausedReplicas {
    fn hold(&self, replica: Arc<dyn DatabaseNode>) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(replica);
    }

    fn release(&self, name: &str) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|replica| replica.name() != name);
    }

    fn drain(&self) -> Vec<Arc<dyn DatabaseNode>> {
        std::mem::take(&mut *self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// State of one merge run, alive for a single `set_up_aggregate_node` call.
pub(crate) struct MergeRun<'a> {
    pub(crate) ctx: &'a MergeContext,
    pub(crate) guard: CallGuard,
    pub(crate) participants: &'a MergeParticipants,
    pub(crate) tables: Vec<Table>,
    pub(crate) paused: PausedReplicas,
}

/// Joins the results of a fan-out, surfacing the first failure.
fn settle<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    results.into_iter().collect()
}

impl MergeRun<'_> {
    pub(crate) async fn tune_destinations(&self) -> Result<()> {
        let options = &self.ctx.config.bulk_load_options;
        let destinations = self.participants.destinations();
        let restarts = destinations.iter().map(|node| {
            self.guard.run(
                MergePhase::PerformanceTuning,
                node.name(),
                node.restart_with_options(options),
            )
        });
        settle(join_all(restarts).await)?;
        Ok(())
    }

    pub(crate) async fn provision_schema(&self) -> Result<()> {
        let phase = MergePhase::SchemaProvisioning;
        let source = self.participants.schema_source();
        let files = self
            .guard
            .run(phase, source.name(), source.export_schemata(&self.tables))
            .await?;
        self.guard
            .run(
                phase,
                source.name(),
                self.ctx.transfer.copy_files(
                    source.name(),
                    &self.ctx.config.export_location,
                    &files,
                    &self.participants.destination_names(),
                    self.ctx.config.transfer_port,
                ),
            )
            .await?;
        for destination in self.participants.destinations() {
            self.guard
                .run(phase, destination.name(), destination.import_schemata(&files))
                .await?;
            event!(Level::DEBUG, node = %destination.name(), "schema imported");
        }
        Ok(())
    }

    pub(crate) async fn export_sources(&self) -> Result<Vec<ExportRecord>> {
        let exports = self
            .participants
            .sources
            .iter()
            .map(|source| self.export_source(source));
        settle(join_all(exports).await)
    }

    async fn export_source(&self, source: &SourceReplica) -> Result<ExportRecord> {
        let phase = MergePhase::Export;
        let replica = &source.replica;
        let name = replica.name();
        let (min_id, max_id) = (source.shard.min_id(), source.shard.max_id());

        self.paused.hold(replica.clone());
        self.guard.run(phase, name, replica.disable_monitoring()).await?;
        self.guard.run(phase, name, replica.stop_query_killer()).await?;
        self.guard.run(phase, name, replica.pause_replication()).await?;
        let coordinates = self
            .guard
            .run(phase, name, replica.binlog_coordinates())
            .await?;
        let counts = self
            .guard
            .run(phase, name, replica.export_data(&self.tables, min_id, max_id))
            .await?;

        event!(
            Level::INFO,
            replica = %name,
            shard = %source.shard.name(),
            coordinates = %coordinates,
            rows = counts.values().map(|c| c.rows).sum::<u64>(),
            "source replica exported"
        );
        Ok(ExportRecord {
            replica: name.to_string(),
            shard: source.shard.name().to_string(),
            min_id,
            max_id,
            counts,
            coordinates,
            files: self
                .tables
                .iter()
                .map(|table| table.export_file_name(min_id, max_id))
                .collect(),
        })
    }

    /// Ships each export and returns its replica to service right away, one
    /// replica at a time.
    pub(crate) async fn transfer_exports(&self, exports: &[ExportRecord]) -> Result<()> {
        let phase = MergePhase::Transfer;
        let location = &self.ctx.config.export_location;
        let targets = self.participants.destination_names();

        for (source, export) in self.participants.sources.iter().zip(exports) {
            let replica = &source.replica;
            let name = replica.name();
            self.guard
                .run(
                    phase,
                    name,
                    self.ctx.transfer.copy_files(
                        name,
                        location,
                        &export.files,
                        &targets,
                        self.ctx.config.transfer_port,
                    ),
                )
                .await?;

            let paths = export
                .files
                .iter()
                .map(|file| format!("{}/{}", location.trim_end_matches('/'), file))
                .collect::<Vec<_>>();
            let command = format!("rm -f {}", paths.join(" "));
            self.guard
                .run(phase, name, self.ctx.shell.run(name, &command))
                .await?;

            self.guard.run(phase, name, replica.resume_replication()).await?;
            self.guard.run(phase, name, replica.catch_up_to_master()).await?;
            self.guard.run(phase, name, replica.enable_monitoring()).await?;
            self.guard.run(phase, name, replica.start_query_killer()).await?;
            self.paused.release(name);
            event!(Level::INFO, replica = %name, "source replica back in service");
        }
        Ok(())
    }

    pub(crate) async fn import_exports(&self, exports: &[ExportRecord]) -> Result<()> {
        let destinations = self.participants.destinations();
        for export in exports {
            let imports = destinations
                .iter()
                .map(|destination| self.import_into(destination, export));
            settle(join_all(imports).await)?;
        }
        Ok(())
    }

    async fn import_into(&self, destination: &Arc<dyn DatabaseNode>, export: &ExportRecord) -> Result<()> {
        let phase = MergePhase::Import;
        let name = destination.name();
        self.guard
            .run(phase, name, destination.set_expected_import_counts(&export.counts))
            .await?;
        let imported = self
            .guard
            .run(
                phase,
                name,
                destination.import_data(&self.tables, export.min_id, export.max_id),
            )
            .await?;
        verify_import_counts(name, &export.counts, &imported)?;
        event!(
            Level::INFO,
            node = %name,
            from = %export.replica,
            rows = export.total_rows(),
            "export imported"
        );
        Ok(())
    }

    pub(crate) async fn restore_destinations(&self) -> Result<()> {
        let options = &self.ctx.config.restore_options;
        let destinations = self.participants.destinations();
        let restarts = destinations.iter().map(|node| {
            self.guard.run(
                MergePhase::SettingsRollback,
                node.name(),
                node.restart_with_options(options),
            )
        });
        settle(join_all(restarts).await)?;
        Ok(())
    }

    /// Attaches every replica under the aggregate node at its pause position,
    /// then makes the new master replicate from the aggregate node.
    ///
    /// The aggregate's own position is read before the first attach, while it
    /// still holds only imported data, so the new master sees every event the
    /// aggregate applies from its sources.
    pub(crate) async fn wire_replication(&self, exports: &[ExportRecord]) -> Result<Vec<String>> {
        let phase = MergePhase::ReplicationHierarchy;
        let aggregate = &self.participants.aggregate;
        let coordinates = self
            .guard
            .run(phase, aggregate.name(), aggregate.binlog_coordinates())
            .await?;

        let mut attached = Vec::with_capacity(exports.len());
        for export in exports {
            self.guard
                .run(
                    phase,
                    aggregate.name(),
                    aggregate.add_node_to_aggregate(&export.replica, &export.coordinates),
                )
                .await?;
            event!(
                Level::INFO,
                replica = %export.replica,
                coordinates = %export.coordinates,
                "replica attached to aggregate node"
            );
            attached.push(export.replica.clone());
        }

        let new_master = &self.participants.new_master;
        self.guard
            .run(
                phase,
                new_master.name(),
                new_master.change_master_to(aggregate.name(), &coordinates),
            )
            .await?;
        Ok(attached)
    }

    /// Puts replicas still held out of service back into replication.
    ///
    /// Runs after a failure; ignores cancellation and logs its own errors.
    pub(crate) async fn compensate(&self) {
        let replicas = self.paused.drain();
        if replicas.is_empty() {
            return;
        }
        let guard = CallGuard::new(self.ctx.config.call_timeout_duration(), CancelSignal::never());
        let phase = MergePhase::Compensation;
        for replica in replicas {
            let name = replica.name();
            let steps = [
                guard.run(phase, name, replica.resume_replication()).await,
                guard.run(phase, name, replica.enable_monitoring()).await,
                guard.run(phase, name, replica.start_query_killer()).await,
            ];
            match steps.into_iter().find_map(|step| step.err()) {
                None => event!(Level::WARN, replica = %name, "replica resumed after aborted merge"),
                Some(err) => event!(
                    Level::ERROR,
                    replica = %name,
                    error = %err,
                    "replica could not be resumed after aborted merge; manual intervention required"
                ),
            }
        }
    }
}

/// Compares imported row counts with what the export produced.
pub(crate) fn verify_import_counts(
    node: &str,
    expected: &ExportCounts,
    imported: &ExportCounts,
) -> Result<()> {
    for (table, want) in expected {
        let got = imported.get(table).map(|c| c.rows).unwrap_or(0);
        if got != want.rows {
            return Err(MergeError::ValidationMismatch {
                node: node.to_string(),
                table: table.clone(),
                expected: want.rows,
                actual: got,
            });
        }
    }
    Ok(())
}
