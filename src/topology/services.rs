use crate::core::Result;
use crate::shard::Shard;
use async_trait::async_trait;
use std::sync::Arc;

/// Copies files between hosts.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Copies `files` from `directory` on `source` into the same directory on
    /// every host in `targets`, replacing files that already exist.
    async fn copy_files(
        &self,
        source: &str,
        directory: &str,
        files: &[String],
        targets: &[String],
        port: u16,
    ) -> Result<()>;
}

/// Runs shell commands on remote hosts.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn run(&self, host: &str, command: &str) -> Result<String>;
}

/// Source of truth for the shard topology.
#[async_trait]
pub trait ShardRegistry: Send + Sync {
    /// Every known shard, in registry order.
    fn shards(&self) -> Vec<Arc<Shard>>;

    /// Publishes the shard's current state to the shared topology configuration.
    async fn sync_configuration(&self, shard: &Shard) -> Result<()>;
}
