use super::world::{SimulatedFilesystem, SimulationLog};
use crate::core::{MergeError, Result, ShardState};
use crate::shard::Shard;
use crate::topology::{FileTransfer, RemoteShell, ShardRegistry};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Copies files between hosts of a [`SimulatedFilesystem`].
#[derive(Debug, Clone)]
pub struct SimulatedFileTransfer {
    fs: SimulatedFilesystem,
    log: SimulationLog,
}

impl SimulatedFileTransfer {
    pub fn new(fs: SimulatedFilesystem, log: SimulationLog) -> Self {
        Self { fs, log }
    }
}

#[async_trait]
impl FileTransfer for SimulatedFileTransfer {
    async fn copy_files(
        &self,
        source: &str,
        directory: &str,
        files: &[String],
        targets: &[String],
        _port: u16,
    ) -> Result<()> {
        self.log.record(source, "copy_files");
        let directory = directory.trim_end_matches('/');
        for file in files {
            let path = format!("{}/{}", directory, file);
            let contents = self
                .fs
                .read(source, &path)
                .ok_or_else(|| MergeError::Io(format!("{} missing on {}", path, source)))?;
            for target in targets {
                self.fs.write(target, &path, contents.clone());
            }
        }
        Ok(())
    }
}

/// Understands `rm -f <paths>`; anything else is rejected.
#[derive(Debug, Clone)]
pub struct SimulatedShell {
    fs: SimulatedFilesystem,
    log: SimulationLog,
}

impl SimulatedShell {
    pub fn new(fs: SimulatedFilesystem, log: SimulationLog) -> Self {
        Self { fs, log }
    }
}

#[async_trait]
impl RemoteShell for SimulatedShell {
    async fn run(&self, host: &str, command: &str) -> Result<String> {
        self.log.record(host, "shell");
        let mut words = command.split_whitespace();
        match (words.next(), words.next()) {
            (Some("rm"), Some("-f")) => {
                let removed = words.filter(|path| self.fs.remove(host, path)).count();
                Ok(format!("removed {}", removed))
            }
            _ => Err(MergeError::Io(format!(
                "unsupported command on {}: {}",
                host, command
            ))),
        }
    }
}

/// Shard registry held in memory; records every published state change.
#[derive(Debug, Default)]
pub struct InMemoryShardRegistry {
    shards: RwLock<Vec<Arc<Shard>>>,
    synced: Mutex<Vec<(String, ShardState)>>,
}

impl InMemoryShardRegistry {
    pub fn new(shards: Vec<Arc<Shard>>) -> Self {
        Self {
            shards: RwLock::new(shards),
            synced: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, shard: Arc<Shard>) {
        self.shards
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(shard);
    }

    /// `(shard name, state)` for every sync, oldest first.
    pub fn synced_states(&self) -> Vec<(String, ShardState)> {
        self.synced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn find(&self, name: &str) -> Option<Arc<Shard>> {
        self.shards()
            .into_iter()
            .find(|shard| shard.name() == name)
    }
}

#[async_trait]
impl ShardRegistry for InMemoryShardRegistry {
    fn shards(&self) -> Vec<Arc<Shard>> {
        self.shards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn sync_configuration(&self, shard: &Shard) -> Result<()> {
        log::debug!("publishing {} as {}", shard.name(), shard.state());
        self.synced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((shard.name().to_string(), shard.state()));
        Ok(())
    }
}
