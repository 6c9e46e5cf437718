use crate::config::MergeConfig;
use crate::core::Result;
use crate::topology::{FileTransfer, MergeTableSet, RemoteShell, ShardRegistry, TableMetadata};
use std::sync::Arc;

/// Everything a merge needs besides its participants.
///
/// Built once by the caller and shared by the validator and orchestrator.
#[derive(Clone)]
pub struct MergeContext {
    pub(crate) registry: Arc<dyn ShardRegistry>,
    pub(crate) transfer: Arc<dyn FileTransfer>,
    pub(crate) shell: Arc<dyn RemoteShell>,
    pub(crate) tables: Arc<dyn TableMetadata>,
    pub(crate) merge_tables: Arc<dyn MergeTableSet>,
    pub(crate) config: MergeConfig,
}

impl MergeContext {
    pub fn new(
        registry: Arc<dyn ShardRegistry>,
        transfer: Arc<dyn FileTransfer>,
        shell: Arc<dyn RemoteShell>,
        tables: Arc<dyn TableMetadata>,
        merge_tables: Arc<dyn MergeTableSet>,
    ) -> Self {
        Self {
            registry,
            transfer,
            shell,
            tables,
            merge_tables,
            config: MergeConfig::default(),
        }
    }

    /// Replaces the merge tuning after validating it.
    pub fn with_config(mut self, config: MergeConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn ShardRegistry> {
        &self.registry
    }
}
