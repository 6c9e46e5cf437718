use super::Shard;
use crate::core::ShardState;
use crate::topology::ShardRegistry;
use std::sync::Arc;

/// Finds the shard that `shard` is being merged into.
///
/// The target is the first shard in `all_shards` that is still
/// `initializing`, fully contains `shard`'s range, has a bounded upper end
/// (as does `shard`) and is not `shard` itself. Shards are compared by name,
/// so a copy rebuilt from a snapshot never matches itself. Later matches are
/// ignored.
pub fn find_merge_target(shard: &Shard, all_shards: &[Arc<Shard>]) -> Option<Arc<Shard>> {
    if shard.max_id().is_infinity() {
        return None;
    }
    all_shards
        .iter()
        .find(|candidate| {
            candidate.name() != shard.name()
                && !candidate.max_id().is_infinity()
                && candidate.state() == ShardState::Initializing
                && candidate.contains_range(shard)
        })
        .cloned()
}

impl Shard {
    /// Merge target of this shard according to the registry, if any.
    pub fn combined_shard(&self, registry: &dyn ShardRegistry) -> Option<Arc<Shard>> {
        find_merge_target(self, &registry.shards())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RangeEnd;
    use crate::shard::ShardDefinition;
    use crate::simulation::InMemoryShardRegistry;

    fn shard(min: u64, max: RangeEnd, state: ShardState) -> Arc<Shard> {
        Arc::new(Shard::new(min, max, "db", state).unwrap())
    }

    #[test]
    fn picks_initializing_containing_shard() {
        let a = shard(1, RangeEnd::Id(1000), ShardState::Ready);
        let b = shard(1001, RangeEnd::Id(2000), ShardState::Ready);
        let combined = shard(1, RangeEnd::Id(2000), ShardState::Initializing);
        let registry = vec![a.clone(), b.clone(), combined.clone()];

        let target = find_merge_target(&a, &registry).unwrap();
        assert!(Arc::ptr_eq(&target, &combined));
        let target = find_merge_target(&b, &registry).unwrap();
        assert!(Arc::ptr_eq(&target, &combined));
    }

    #[test]
    fn ignores_non_initializing_and_partial_overlap() {
        let a = shard(1, RangeEnd::Id(1000), ShardState::Ready);
        let ready_parent = shard(1, RangeEnd::Id(2000), ShardState::Ready);
        let overlap = shard(500, RangeEnd::Id(2000), ShardState::Initializing);
        let registry = vec![a.clone(), ready_parent, overlap];
        assert!(find_merge_target(&a, &registry).is_none());
    }

    #[test]
    fn never_matches_itself() {
        let lone = shard(1, RangeEnd::Id(1000), ShardState::Initializing);
        assert!(find_merge_target(&lone, &[lone.clone()]).is_none());
    }

    #[test]
    fn rebuilt_copy_does_not_match_itself() {
        let combined = shard(1, RangeEnd::Id(2000), ShardState::Initializing);
        let registry = vec![combined.clone()];
        let rebuilt = ShardDefinition::from_shard(&combined).to_shard().unwrap();
        assert!(find_merge_target(&rebuilt, &registry).is_none());
        assert!(rebuilt.combined_shard(&InMemoryShardRegistry::new(registry)).is_none());
    }

    #[test]
    fn infinity_bounds_never_match() {
        let open = shard(1001, RangeEnd::Infinity, ShardState::Ready);
        let open_parent = shard(1, RangeEnd::Infinity, ShardState::Initializing);
        let bounded = shard(1001, RangeEnd::Id(2000), ShardState::Ready);
        let registry = vec![open.clone(), open_parent, bounded.clone()];
        assert!(find_merge_target(&open, &registry).is_none());
        assert!(find_merge_target(&bounded, &registry).is_none());
    }

    #[test]
    fn first_match_in_registry_order_wins() {
        let a = shard(1, RangeEnd::Id(1000), ShardState::Ready);
        let first = shard(1, RangeEnd::Id(2000), ShardState::Initializing);
        let second = shard(1, RangeEnd::Id(3000), ShardState::Initializing);
        let registry = vec![second.clone(), a.clone(), first];
        let target = find_merge_target(&a, &registry).unwrap();
        assert!(Arc::ptr_eq(&target, &second));
    }
}
