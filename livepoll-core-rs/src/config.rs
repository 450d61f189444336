//! Configuration for the poll engine
//!
//! Combines the broadcast settings with the choice of repository.

use std::path::PathBuf;

use crate::hub::DEFAULT_SUBSCRIBER_BUFFER;
use crate::storage::StorageConfig;

/// Complete engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Messages a subscriber may have queued before it is detached
    pub subscriber_buffer: usize,

    /// Where polls are kept
    pub storage: StorageBackend,
}

/// Repository selection
#[derive(Debug, Clone, Default)]
pub enum StorageBackend {
    /// Volatile, lost on restart
    #[default]
    Memory,

    /// Write-ahead log plus snapshots in a directory
    File(StorageConfig),
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            storage: StorageBackend::Memory,
        }
    }
}

impl EngineConfig {
    /// Set per-subscriber queue depth
    pub fn with_subscriber_buffer(mut self, buffer: usize) -> Self {
        self.subscriber_buffer = buffer;
        self
    }

    /// Persist polls under `dir`
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.storage = match self.storage {
            StorageBackend::File(config) => StorageBackend::File(StorageConfig { dir, ..config }),
            StorageBackend::Memory => StorageBackend::File(StorageConfig::new(dir)),
        };
        self
    }

    /// Skip the fsync after each WAL append. Has no effect on memory storage.
    pub fn without_fsync(mut self) -> Self {
        if let StorageBackend::File(config) = &mut self.storage {
            config.fsync_on_write = false;
        }
        self
    }
}
