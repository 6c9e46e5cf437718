use crate::core::{MergeError, Result};
use crate::shard::ShardDefinition;
use crate::topology::Table;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// Server options applied to destinations while they bulk-load data.
///
/// Safe only because neither destination serves traffic during the merge.
pub fn default_bulk_load_options() -> Vec<String> {
    [
        "--skip-log-bin",
        "--skip-log-slave-updates",
        "--innodb-autoinc-lock-mode=2",
        "--skip-slave-start",
        "--innodb-flush-log-at-trx-commit=2",
        "--innodb-doublewrite=0",
    ]
    .iter()
    .map(|opt| opt.to_string())
    .collect()
}

/// Tuning for one merge run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Maximum range checks in flight against one standby replica.
    pub validation_concurrency: usize,
    /// Budget for any single remote call in milliseconds; 0 disables it.
    pub call_timeout_ms: u64,
    /// Port the file copy listener uses on destination hosts.
    pub transfer_port: u16,
    /// Directory holding schema and data exports on every host.
    pub export_location: String,
    /// Options the destinations are restarted with before loading data.
    pub bulk_load_options: Vec<String>,
    /// Options the destinations are restarted with once loading is done.
    pub restore_options: Vec<String>,
    /// Resume replication on paused source replicas if the run aborts.
    pub compensate_on_failure: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            validation_concurrency: 8,
            call_timeout_ms: 6 * 60 * 60 * 1000,
            transfer_port: 7000,
            export_location: "/tmp".to_string(),
            bulk_load_options: default_bulk_load_options(),
            restore_options: Vec::new(),
            compensate_on_failure: true,
        }
    }
}

impl MergeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validation_concurrency(mut self, max: usize) -> Self {
        self.validation_concurrency = max;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn without_call_timeout(mut self) -> Self {
        self.call_timeout_ms = 0;
        self
    }

    pub fn transfer_port(mut self, port: u16) -> Self {
        self.transfer_port = port;
        self
    }

    pub fn export_location(mut self, location: &str) -> Self {
        self.export_location = location.to_string();
        self
    }

    pub fn compensate_on_failure(mut self, enabled: bool) -> Self {
        self.compensate_on_failure = enabled;
        self
    }

    /// Per-call budget, or `None` when disabled.
    pub fn call_timeout_duration(&self) -> Option<Duration> {
        (self.call_timeout_ms > 0).then(|| Duration::from_millis(self.call_timeout_ms))
    }

    pub fn validate(&self) -> Result<()> {
        if self.validation_concurrency == 0 {
            return Err(MergeError::Config(
                "validation_concurrency must be >= 1".to_string(),
            ));
        }
        if self.export_location.trim().is_empty() {
            return Err(MergeError::Config(
                "export_location must not be empty".to_string(),
            ));
        }
        if self.transfer_port == 0 {
            return Err(MergeError::Config(
                "transfer_port must not be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// On-disk configuration: merge tuning plus an optional topology snapshot
/// used by the operator tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardMergeConfig {
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub shards: Vec<ShardDefinition>,
    #[serde(default)]
    pub tables: Vec<Table>,
}

impl ShardMergeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| MergeError::Io(format!("{}: {}", path.display(), err)))?;
        let config: ShardMergeConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the config next to `path` and renames it into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .map_err(|err| MergeError::Io(err.error.to_string()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.merge.validate()?;
        for def in &self.shards {
            def.to_shard()?;
        }
        for table in &self.tables {
            Table::new(table.name(), table.sharding_keys().to_vec())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = MergeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.validation_concurrency, 8);
        assert!(config.bulk_load_options.contains(&"--skip-slave-start".to_string()));
        assert!(config.restore_options.is_empty());
    }

    #[test]
    fn rejects_zero_concurrency_and_port() {
        assert!(MergeConfig::new().validation_concurrency(0).validate().is_err());
        assert!(MergeConfig::new().transfer_port(0).validate().is_err());
        assert!(MergeConfig::new().export_location(" ").validate().is_err());
    }

    #[test]
    fn zero_timeout_disables_budget() {
        assert!(MergeConfig::new().without_call_timeout().call_timeout_duration().is_none());
        assert_eq!(
            MergeConfig::new()
                .call_timeout(Duration::from_secs(2))
                .call_timeout_duration(),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: ShardMergeConfig =
            serde_json::from_str(r#"{"merge": {"transfer_port": 7100}}"#).unwrap();
        assert_eq!(config.merge.transfer_port, 7100);
        assert_eq!(config.merge.validation_concurrency, 8);
        assert!(config.shards.is_empty());
    }
}
