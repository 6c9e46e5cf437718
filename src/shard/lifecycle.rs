use super::Shard;
use crate::core::{Result, ShardState};
use crate::topology::ShardRegistry;
use tracing::{Level, event};

impl Shard {
    /// Moves the shard to `merging` and publishes the new state.
    pub async fn prepare_for_merged_reads(&self, registry: &dyn ShardRegistry) -> Result<()> {
        self.transition(ShardState::Merging);
        registry.sync_configuration(self).await
    }

    /// Moves the shard to `deprecated` and publishes the new state.
    pub async fn prepare_for_merged_writes(&self, registry: &dyn ShardRegistry) -> Result<()> {
        self.transition(ShardState::Deprecated);
        registry.sync_configuration(self).await
    }

    /// Marks the shard `decommissioned`.
    ///
    /// The registry is not synced here; removing the shard from the published
    /// topology is a separate step.
    pub fn decommission(&self) {
        self.transition(ShardState::Decommissioned);
    }

    /// Whether the shard should still be advertised in the routing configuration.
    pub fn is_active_in_topology(&self) -> bool {
        matches!(
            self.state(),
            ShardState::Merging
                | ShardState::Ready
                | ShardState::Child
                | ShardState::NeedsCleanup
                | ShardState::ReadOnly
                | ShardState::Offline
        )
    }

    fn transition(&self, next: ShardState) {
        let previous = self.state();
        self.set_state(next);
        event!(
            Level::INFO,
            shard = %self.name(),
            from = %previous,
            to = %next,
            "shard state changed"
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::core::{RangeEnd, ShardState};
    use crate::shard::Shard;
    use crate::simulation::InMemoryShardRegistry;

    fn shard(state: ShardState) -> Shard {
        Shard::new(1, RangeEnd::Id(1000), "db-1", state).unwrap()
    }

    #[test]
    fn merged_reads_and_writes_sync_the_registry() {
        let registry = InMemoryShardRegistry::new(Vec::new());
        let shard = shard(ShardState::Ready);

        tokio_test::block_on(shard.prepare_for_merged_reads(&registry)).unwrap();
        assert_eq!(shard.state(), ShardState::Merging);

        tokio_test::block_on(shard.prepare_for_merged_writes(&registry)).unwrap();
        assert_eq!(shard.state(), ShardState::Deprecated);

        assert_eq!(
            registry.synced_states(),
            vec![
                ("shard-1-1000".to_string(), ShardState::Merging),
                ("shard-1-1000".to_string(), ShardState::Deprecated),
            ]
        );
    }

    #[test]
    fn decommission_does_not_sync() {
        let registry = InMemoryShardRegistry::new(Vec::new());
        let shard = shard(ShardState::Deprecated);
        shard.decommission();
        assert_eq!(shard.state(), ShardState::Decommissioned);
        assert!(registry.synced_states().is_empty());
    }

    #[test]
    fn active_states_are_exactly_the_routable_ones() {
        let active = [
            ShardState::Merging,
            ShardState::Ready,
            ShardState::Child,
            ShardState::NeedsCleanup,
            ShardState::ReadOnly,
            ShardState::Offline,
        ];
        for state in ShardState::ALL {
            assert_eq!(
                shard(state).is_active_in_topology(),
                active.contains(&state),
                "state {}",
                state
            );
        }
    }
}
