use shardmerge::simulation::{
    InMemoryShardRegistry, SimRow, SimulatedCluster, SimulatedFileTransfer, SimulatedFilesystem,
    SimulatedNode, SimulatedShell, SimulationLog,
};
use shardmerge::{
    DatabaseNode, MergeCancellation, MergeConfig, MergeContext, MergeError, MergePhase, RangeEnd,
    RangeValidator, Shard, ShardState, StaticTables, Table, TableStatus,
};
use std::sync::Arc;

fn row(pairs: &[(&str, u64)]) -> SimRow {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

/// Context over a custom table list, with a fresh filesystem and log.
fn context_for(tables: Vec<Table>, config: MergeConfig) -> MergeContext {
    let fs = SimulatedFilesystem::new();
    let log = SimulationLog::new();
    let tables = Arc::new(StaticTables::new(tables));
    MergeContext::new(
        Arc::new(InMemoryShardRegistry::new(Vec::new())),
        Arc::new(SimulatedFileTransfer::new(fs.clone(), log.clone())),
        Arc::new(SimulatedShell::new(fs, log)),
        tables.clone(),
        tables,
    )
    .with_config(config)
    .unwrap()
}

fn replica(name: &str) -> Arc<SimulatedNode> {
    Arc::new(SimulatedNode::new(
        name,
        "/tmp",
        SimulatedFilesystem::new(),
        SimulationLog::new(),
    ))
}

#[tokio::test]
async fn clean_shard_reports_every_sharded_table_valid() {
    let cluster = SimulatedCluster::two_shard_merge((1, 1000), (1001, 2000), 40).unwrap();
    let validator = RangeValidator::new(cluster.context().unwrap());

    for shard in &cluster.sources {
        let statuses = validator.validate(shard).await.unwrap();
        assert_eq!(
            statuses.into_iter().collect::<Vec<_>>(),
            vec![
                ("comments".to_string(), TableStatus::Valid),
                ("posts".to_string(), TableStatus::Valid),
                ("users".to_string(), TableStatus::Valid),
            ]
        );
    }
}

#[tokio::test]
async fn one_bad_column_marks_the_table_invalid() {
    let cluster = SimulatedCluster::two_shard_merge((1, 1000), (1001, 2000), 10).unwrap();
    // user_id is out of range but author_id, checked after it, is fine.
    cluster.replicas[0].insert_rows("comments", vec![row(&[("user_id", 5000), ("author_id", 10)])]);
    let validator = RangeValidator::new(cluster.context().unwrap());

    let statuses = validator.validate(&cluster.sources[0]).await.unwrap();
    assert_eq!(statuses["comments"], TableStatus::Invalid);
    assert_eq!(statuses["posts"], TableStatus::Valid);
    assert_eq!(statuses["users"], TableStatus::Valid);

    let other = validator.validate(&cluster.sources[1]).await.unwrap();
    assert!(other.values().all(|status| *status == TableStatus::Valid));
}

#[tokio::test]
async fn row_below_range_is_caught() {
    let cluster = SimulatedCluster::two_shard_merge((1, 1000), (1001, 2000), 10).unwrap();
    cluster.replicas[1].insert_rows("posts", vec![row(&[("user_id", 7)])]);
    let validator = RangeValidator::new(cluster.context().unwrap());

    let statuses = validator.validate(&cluster.sources[1]).await.unwrap();
    assert_eq!(statuses["posts"], TableStatus::Invalid);
    assert_eq!(statuses["comments"], TableStatus::Valid);
}

#[tokio::test]
async fn open_ended_shard_only_checks_lower_bound() {
    let node = replica("db-tail-standby");
    node.insert_rows(
        "users",
        vec![row(&[("id", 5001)]), row(&[("id", 9_000_000_000)])],
    );
    node.insert_rows("events", vec![row(&[("user_id", 4999)])]);
    let shard = Shard::new(5001, RangeEnd::Infinity, "db-tail-master", ShardState::Ready)
        .unwrap()
        .with_standby_replicas(vec![node.clone() as Arc<dyn DatabaseNode>]);
    let ctx = context_for(
        vec![
            Table::new("users", vec!["id".to_string()]).unwrap(),
            Table::new("events", vec!["user_id".to_string()]).unwrap(),
        ],
        MergeConfig::default(),
    );

    let statuses = RangeValidator::new(ctx).validate(&shard).await.unwrap();
    assert_eq!(statuses["users"], TableStatus::Valid);
    assert_eq!(statuses["events"], TableStatus::Invalid);
}

#[tokio::test]
async fn unsharded_tables_are_not_reported() {
    let node = replica("db-1-standby");
    node.insert_rows("users", vec![row(&[("id", 3)])]);
    let shard = Shard::new(1, RangeEnd::Id(10), "db-1-master", ShardState::Ready)
        .unwrap()
        .with_standby_replicas(vec![node as Arc<dyn DatabaseNode>]);
    let ctx = context_for(
        vec![
            Table::new("users", vec!["id".to_string()]).unwrap(),
            Table::new("settings", Vec::new()).unwrap(),
        ],
        MergeConfig::default(),
    );

    let statuses = RangeValidator::new(ctx).validate(&shard).await.unwrap();
    assert_eq!(statuses.len(), 1);
    assert!(statuses.contains_key("users"));
}

#[tokio::test]
async fn range_checks_respect_concurrency_limit() {
    let node = replica("db-wide-standby");
    let mut tables = Vec::new();
    for i in 0..24 {
        let name = format!("table_{}", i);
        node.insert_rows(&name, vec![row(&[("tenant_id", 50)])]);
        tables.push(Table::new(name, vec!["tenant_id".to_string()]).unwrap());
    }
    let shard = Shard::new(1, RangeEnd::Id(100), "db-wide-master", ShardState::Ready)
        .unwrap()
        .with_standby_replicas(vec![node.clone() as Arc<dyn DatabaseNode>]);

    let statuses = RangeValidator::new(context_for(tables.clone(), MergeConfig::default()))
        .validate(&shard)
        .await
        .unwrap();
    assert_eq!(statuses.len(), 24);
    assert!(node.max_concurrent_queries() <= 8);
    assert!(node.max_concurrent_queries() >= 1);

    let narrow = replica("db-narrow-standby");
    for table in &tables {
        narrow.insert_rows(table.name(), vec![row(&[("tenant_id", 50)])]);
    }
    let shard = Shard::new(1, RangeEnd::Id(100), "db-narrow-master", ShardState::Ready)
        .unwrap()
        .with_standby_replicas(vec![narrow.clone() as Arc<dyn DatabaseNode>]);
    RangeValidator::new(context_for(
        tables,
        MergeConfig::new().validation_concurrency(1),
    ))
    .validate(&shard)
    .await
    .unwrap();
    assert_eq!(narrow.max_concurrent_queries(), 1);
}

#[tokio::test]
async fn shard_without_standby_replica_is_rejected() {
    let cluster = SimulatedCluster::two_shard_merge((1, 1000), (1001, 2000), 5).unwrap();
    let bare = Shard::new(1, RangeEnd::Id(1000), "db-1-master", ShardState::Ready).unwrap();
    let err = RangeValidator::new(cluster.context().unwrap())
        .validate(&bare)
        .await
        .unwrap_err();
    assert!(err.is_precondition());
    assert!(cluster.log.is_empty());
}

#[tokio::test]
async fn failing_query_names_the_replica() {
    let cluster = SimulatedCluster::two_shard_merge((1, 1000), (1001, 2000), 5).unwrap();
    cluster.replicas[0].fail_on("query", "connection reset");
    let err = RangeValidator::new(cluster.context().unwrap())
        .validate(&cluster.sources[0])
        .await
        .unwrap_err();
    match err {
        MergeError::Operational { phase, node, .. } => {
            assert_eq!(phase, MergePhase::Validation);
            assert_eq!(node, "db-1-standby");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn cancelled_validation_runs_no_queries() {
    let cluster = SimulatedCluster::two_shard_merge((1, 1000), (1001, 2000), 5).unwrap();
    let cancellation = MergeCancellation::new();
    cancellation.cancel();
    let err = RangeValidator::new(cluster.context().unwrap())
        .with_cancellation(cancellation.signal())
        .validate(&cluster.sources[0])
        .await
        .unwrap_err();
    assert_eq!(
        err,
        MergeError::Cancelled {
            phase: MergePhase::Validation
        }
    );
    assert!(cluster.log.is_empty());
}
