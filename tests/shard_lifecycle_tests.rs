use shardmerge::simulation::SimulatedCluster;
use shardmerge::{
    MergeOrchestrator, RangeEnd, Shard, ShardDefinition, ShardRegistry, ShardState,
    TopologyEntity, find_merge_target,
};
use std::sync::Arc;

#[tokio::test]
async fn full_merge_walks_shards_through_their_states() {
    let cluster = SimulatedCluster::two_shard_merge((1, 1000), (1001, 2000), 20).unwrap();
    let registry = cluster.registry.as_ref();

    for source in &cluster.sources {
        let target = source.combined_shard(registry).unwrap();
        assert!(Arc::ptr_eq(&target, &cluster.combined));
    }
    assert!(cluster.combined.combined_shard(registry).is_none());
    assert!(!cluster.combined.is_active_in_topology());

    MergeOrchestrator::new(cluster.context().unwrap())
        .set_up_aggregate_node(
            &cluster.source_entities(),
            &cluster.aggregate_entity(),
            &cluster.new_master_entity(),
        )
        .await
        .unwrap();

    cluster.combined.prepare_for_merged_reads(registry).await.unwrap();
    assert_eq!(cluster.combined.state(), ShardState::Merging);
    assert!(cluster.combined.is_active_in_topology());

    for source in &cluster.sources {
        source.prepare_for_merged_writes(registry).await.unwrap();
        assert!(!source.is_active_in_topology());
    }
    // No longer initializing, so the sources have nothing left to merge into.
    assert!(cluster.sources[0].combined_shard(registry).is_none());

    for source in &cluster.sources {
        source.decommission();
        assert_eq!(source.state(), ShardState::Decommissioned);
    }

    assert_eq!(
        cluster.registry.synced_states(),
        vec![
            ("shard-1-2000".to_string(), ShardState::Merging),
            ("shard-1-1000".to_string(), ShardState::Deprecated),
            ("shard-1001-2000".to_string(), ShardState::Deprecated),
        ]
    );
    assert_eq!(registry.shards().len(), 3);
}

#[test]
fn active_states_match_routing_rules() {
    let active = [
        ShardState::Merging,
        ShardState::Ready,
        ShardState::Child,
        ShardState::NeedsCleanup,
        ShardState::ReadOnly,
        ShardState::Offline,
    ];
    for state in ShardState::ALL {
        let shard = Shard::new(1, RangeEnd::Id(10), "db-1", state).unwrap();
        assert_eq!(
            shard.is_active_in_topology(),
            active.contains(&state),
            "state {}",
            state
        );
    }
}

#[test]
fn open_ended_shards_never_take_part_in_a_merge() {
    let tail = Arc::new(Shard::new(5001, RangeEnd::Infinity, "db-3", ShardState::Ready).unwrap());
    let open_parent =
        Arc::new(Shard::new(1, RangeEnd::Infinity, "db-4", ShardState::Initializing).unwrap());
    let bounded = Arc::new(Shard::new(5001, RangeEnd::Id(6000), "db-5", ShardState::Ready).unwrap());
    let all = vec![tail.clone(), open_parent, bounded.clone()];

    assert!(find_merge_target(&tail, &all).is_none());
    assert!(find_merge_target(&bounded, &all).is_none());
}

#[test]
fn first_matching_target_wins() {
    let child = Arc::new(Shard::new(101, RangeEnd::Id(200), "db-1", ShardState::Ready).unwrap());
    let first = Arc::new(Shard::new(1, RangeEnd::Id(500), "db-2", ShardState::Initializing).unwrap());
    let second =
        Arc::new(Shard::new(100, RangeEnd::Id(300), "db-3", ShardState::Initializing).unwrap());
    let all = vec![child.clone(), first.clone(), second];

    let target = find_merge_target(&child, &all).unwrap();
    assert!(Arc::ptr_eq(&target, &first));
}

#[test]
fn shard_definitions_describe_topology_entities() {
    let cluster = SimulatedCluster::two_shard_merge((1, 1000), (1001, 2000), 1).unwrap();
    let entity = TopologyEntity::from(cluster.sources[1].clone());
    assert_eq!(entity.kind(), "shard");
    assert_eq!(entity.name(), "shard-1001-2000");

    let def = ShardDefinition::from_shard(&cluster.sources[1]);
    assert_eq!(def.max_id, RangeEnd::Id(2000));
    assert_eq!(def.standby_replicas, vec!["db-2-standby".to_string()]);
    assert_eq!(cluster.aggregate_entity().kind(), "aggregate node");
    assert_eq!(cluster.new_master_entity().name(), "db-merged-master");
}
