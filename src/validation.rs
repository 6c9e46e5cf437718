//! Sharding-key range checks against live data.

use crate::core::{MergeError, MergePhase, Result, TableStatus};
use crate::merge::{CallGuard, CancelSignal, MergeContext};
use crate::shard::Shard;
use crate::topology::QueryRow;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{Instrument, Level, event, info_span};

/// Checks that every sharding-key value stored on a shard lies inside the
/// shard's id range.
pub struct RangeValidator {
    ctx: MergeContext,
    cancel: CancelSignal,
}

impl RangeValidator {
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

    /// Runs one range check per (table, sharding-key column) on the shard's
    /// standby replica, at most `validation_concurrency` at a time.
    ///
    /// A table is `Invalid` if any of its columns has rows outside the range.
    /// Tables without sharding keys are not reported.
    pub async fn validate(&self, shard: &Shard) -> Result<BTreeMap<String, TableStatus>> {
        let replica = shard.standby_replica().ok_or_else(|| {
            MergeError::Precondition(format!(
                "Shard {} has no standby replica to validate against",
                shard.name()
            ))
        })?;
        let tables = self.ctx.tables.sharded_tables();
        let limit = Arc::new(Semaphore::new(self.ctx.config.validation_concurrency));
        let guard = CallGuard::new(self.ctx.config.call_timeout_duration(), self.cancel.clone());
        guard.check(MergePhase::Validation)?;

        let span = info_span!(
            "shard.validate",
            shard = %shard.name(),
            replica = %replica.name()
        );

        let checks = tables
            .iter()
            .flat_map(|table| table.sharding_keys().iter().map(move |column| (table, column)))
            .map(|(table, column)| {
                let limit = limit.clone();
                let replica = replica.clone();
                let guard = &guard;
                async move {
                    let _permit = limit.acquire_owned().await.map_err(|_| {
                        MergeError::operational(
                            MergePhase::Validation,
                            replica.name(),
                            "range check limiter closed",
                        )
                    })?;
                    let sql = table.sql_range_check(column, shard.min_id(), shard.max_id());
                    let rows = guard
                        .run(MergePhase::Validation, replica.name(), replica.query(&sql))
                        .await?;
                    let invalid = invalid_record_count(&rows).ok_or_else(|| {
                        MergeError::operational(
                            MergePhase::Validation,
                            replica.name(),
                            format!("range check on {}.{} returned no count", table.name(), column),
                        )
                    })?;
                    Ok::<_, MergeError>((table.name(), column.as_str(), invalid))
                }
            });

        let results = join_all(checks).instrument(span).await;

        let mut statuses = BTreeMap::new();
        for result in results {
            let (table, column, invalid) = result?;
            let status = if invalid > 0 {
                log::warn!(
                    "{} rows of {}.{} on {} fall outside {}..{}",
                    invalid,
                    table,
                    column,
                    shard.name(),
                    shard.min_id(),
                    shard.max_id()
                );
                TableStatus::Invalid
            } else {
                TableStatus::Valid
            };
            let entry = statuses.entry(table.to_string()).or_insert(TableStatus::Valid);
            if status == TableStatus::Invalid {
                *entry = TableStatus::Invalid;
            }
        }
        event!(
            Level::INFO,
            shard = %shard.name(),
            tables = statuses.len(),
            invalid = statuses.values().filter(|s| **s == TableStatus::Invalid).count(),
            "shard range validation finished"
        );
        Ok(statuses)
    }
}

fn invalid_record_count(rows: &[QueryRow]) -> Option<u64> {
    let value = rows.first()?.first()?;
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}
