use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use shardmerge::simulation::SimulatedCluster;
use shardmerge::{
    MergeOrchestrator, RangeValidator, Shard, ShardMergeConfig, find_merge_target,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shardmerge-tool")]
#[command(about = "Operator tooling for live shard merges")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a config file and report whether it is valid.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
    /// Write a config file with default settings.
    DefaultConfig {
        #[arg(long)]
        out: PathBuf,
    },
    /// Resolve the shard a given shard is being merged into.
    FindTarget {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        shard: String,
    },
    /// Run a full merge against in-memory hosts and print the report.
    Simulate {
        #[arg(long, default_value_t = 1)]
        min_a: u64,
        #[arg(long, default_value_t = 1000)]
        max_a: u64,
        #[arg(long, default_value_t = 1001)]
        min_b: u64,
        #[arg(long, default_value_t = 2000)]
        max_b: u64,
        #[arg(long, default_value_t = 100)]
        rows: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shardmerge=info,warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::CheckConfig { config } => check_config(&config),
        Command::DefaultConfig { out } => default_config(&out),
        Command::FindTarget { config, shard } => find_target(&config, &shard),
        Command::Simulate {
            min_a,
            max_a,
            min_b,
            max_b,
            rows,
        } => simulate((min_a, max_a), (min_b, max_b), rows).await,
    }
}

fn check_config(path: &Path) -> Result<()> {
    let config = ShardMergeConfig::load(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    println!(
        "{}: ok ({} shards, {} tables, validation concurrency {})",
        path.display(),
        config.shards.len(),
        config.tables.len(),
        config.merge.validation_concurrency
    );
    Ok(())
}

fn default_config(out: &Path) -> Result<()> {
    if out.exists() {
        bail!("{} already exists", out.display());
    }
    ShardMergeConfig::default()
        .save(out)
        .with_context(|| format!("failed to write {}", out.display()))?;
    println!("wrote {}", out.display());
    Ok(())
}

fn find_target(path: &Path, name: &str) -> Result<()> {
    let config = ShardMergeConfig::load(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let shards = config
        .shards
        .iter()
        .map(|def| def.to_shard().map(Arc::new))
        .collect::<shardmerge::Result<Vec<Arc<Shard>>>>()?;
    let shard = shards
        .iter()
        .find(|shard| shard.name() == name)
        .ok_or_else(|| anyhow!("shard {} is not in {}", name, path.display()))?;
    match find_merge_target(shard, &shards) {
        Some(target) => println!("{} merges into {} ({})", name, target.name(), target.state()),
        None => println!("{} has no merge target", name),
    }
    Ok(())
}

async fn simulate(first: (u64, u64), second: (u64, u64), rows: u64) -> Result<()> {
    let cluster = SimulatedCluster::two_shard_merge(first, second, rows)?;
    let ctx = cluster.context()?;

    let validator = RangeValidator::new(ctx.clone());
    for shard in &cluster.sources {
        let statuses = validator.validate(shard).await?;
        println!("{} validation: {}", shard.name(), serde_json::to_string(&statuses)?);
    }

    let orchestrator = MergeOrchestrator::new(ctx);
    let report = orchestrator
        .set_up_aggregate_node(
            &cluster.source_entities(),
            &cluster.aggregate_entity(),
            &cluster.new_master_entity(),
        )
        .await
        .context("merge failed")?;

    cluster
        .combined
        .prepare_for_merged_reads(cluster.registry.as_ref())
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    println!(
        "{} ({}..{}) is now {}",
        cluster.combined.name(),
        cluster.combined.min_id(),
        cluster.combined.max_id(),
        cluster.combined.state()
    );
    Ok(())
}
