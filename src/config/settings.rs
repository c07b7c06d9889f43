//! Engine settings
//!
//! These are the tunables read at startup. Every struct uses `#[serde(default)]`
//! so a configuration file only needs to name the values it changes.
//!
//! # Main Types
//!
//! - [`StorageConfig`] - Top-level configuration
//! - [`BackendSettings`] - Backend selection and circular-log geometry
//! - [`WorkerSettings`] - Worker thread and timing settings

use super::{
    default_storage_dir, DEFAULT_BATCH_BUFFER_SIZE, DEFAULT_BATCH_WRITE_TIMEOUT_MS,
    DEFAULT_BLOCK_COUNT, DEFAULT_BLOCK_SIZE, DEFAULT_LIVENESS_TIMEOUT_MS, DEFAULT_MAX_TYPES,
    DEFAULT_MESSAGE_PROCESSING_MS, DEFAULT_PUBLISH_TIMEOUT_MS, DEFAULT_RECORDS_PER_TYPE,
    DEFAULT_WORKER_STACK_SIZE,
};
use crate::error::{Result, StorageError};
use crate::types::StorageMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete storage engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Maximum number of distinct record types
    pub max_types: usize,

    /// Capacity of each per-type store, in records
    pub max_records_per_type: usize,

    /// Byte capacity of the batch pipe
    pub batch_buffer_size: usize,

    /// Mode entered at startup
    pub initial_mode: StorageMode,

    /// Backend selection
    pub backend: BackendSettings,

    /// Worker thread settings
    pub worker: WorkerSettings,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_types: DEFAULT_MAX_TYPES,
            max_records_per_type: DEFAULT_RECORDS_PER_TYPE,
            batch_buffer_size: DEFAULT_BATCH_BUFFER_SIZE,
            initial_mode: StorageMode::Passthrough,
            backend: BackendSettings::default(),
            worker: WorkerSettings::default(),
        }
    }
}

impl StorageConfig {
    /// Check the values that the engine relies on
    pub fn validate(&self) -> Result<()> {
        if self.max_types == 0 || self.max_types > usize::from(u8::MAX) + 1 {
            return Err(StorageError::Config(format!(
                "max_types must be between 1 and 256, got {}",
                self.max_types
            )));
        }

        if self.max_records_per_type == 0 {
            return Err(StorageError::Config(
                "max_records_per_type must be at least 1".to_string(),
            ));
        }

        if self.max_records_per_type > u32::MAX as usize {
            return Err(StorageError::Config(format!(
                "max_records_per_type {} does not fit the u32 log offsets",
                self.max_records_per_type
            )));
        }

        if self.batch_buffer_size == 0 {
            return Err(StorageError::Config(
                "batch_buffer_size must be at least 1".to_string(),
            ));
        }

        if self.backend.kind == BackendKind::CircularLog && self.backend.log.block_size == 0 {
            return Err(StorageError::Config("block_size must be at least 1".to_string()));
        }

        self.worker.validate()
    }
}

/// Available storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Per-type ring buffers in RAM
    #[default]
    Ram,
    /// Per-type circular log files with persistent headers
    CircularLog,
}

impl BackendKind {
    /// Display name for the backend kind
    pub fn display_name(&self) -> &'static str {
        match self {
            BackendKind::Ram => "ram",
            BackendKind::CircularLog => "circular_log",
        }
    }
}

/// Backend selection and settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Which backend to use
    pub kind: BackendKind,

    /// Settings for the circular-log backend
    pub log: CircularLogSettings,
}

/// Geometry and location of the circular-log partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircularLogSettings {
    /// Directory that holds header and data files
    pub root: PathBuf,

    /// Partition block size in bytes
    pub block_size: usize,

    /// Number of blocks in the partition
    pub block_count: usize,

    /// Call `sync_data` after every data and header write
    pub sync_writes: bool,
}

impl Default for CircularLogSettings {
    fn default() -> Self {
        Self {
            root: default_storage_dir(),
            block_size: DEFAULT_BLOCK_SIZE,
            block_count: DEFAULT_BLOCK_COUNT,
            sync_writes: true,
        }
    }
}

/// Worker thread and timing settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Name of the worker thread
    pub thread_name: String,

    /// Stack size of the worker thread in bytes
    pub stack_size: usize,

    /// Supervisor liveness timeout
    pub liveness_timeout_ms: u64,

    /// Longest time a single message may take to process
    pub max_message_processing_ms: u64,

    /// Timeout for writing one frame into the batch pipe
    pub batch_write_timeout_ms: u64,

    /// Timeout for publishing one data or reply message
    pub publish_timeout_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            thread_name: "storage".to_string(),
            stack_size: DEFAULT_WORKER_STACK_SIZE,
            liveness_timeout_ms: DEFAULT_LIVENESS_TIMEOUT_MS,
            max_message_processing_ms: DEFAULT_MESSAGE_PROCESSING_MS,
            batch_write_timeout_ms: DEFAULT_BATCH_WRITE_TIMEOUT_MS,
            publish_timeout_ms: DEFAULT_PUBLISH_TIMEOUT_MS,
        }
    }
}

impl WorkerSettings {
    /// Processing time must leave room inside the liveness window
    pub fn validate(&self) -> Result<()> {
        if self.max_message_processing_ms >= self.liveness_timeout_ms {
            return Err(StorageError::Config(format!(
                "max_message_processing_ms ({}) must be less than liveness_timeout_ms ({})",
                self.max_message_processing_ms, self.liveness_timeout_ms
            )));
        }
        Ok(())
    }

    /// How long the worker waits for the next message before signaling liveness
    pub fn message_wait(&self) -> Duration {
        Duration::from_millis(
            self.liveness_timeout_ms
                .saturating_sub(self.max_message_processing_ms),
        )
    }

    /// Processing time budget per message
    pub fn max_message_processing(&self) -> Duration {
        Duration::from_millis(self.max_message_processing_ms)
    }

    /// Timeout for one batch frame write
    pub fn batch_write_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_write_timeout_ms)
    }

    /// Timeout for one outbound publish
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = StorageConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.initial_mode, StorageMode::Passthrough);
        assert_eq!(config.backend.kind, BackendKind::Ram);
    }

    #[test]
    fn test_processing_time_must_be_below_liveness() {
        let mut config = StorageConfig::default();
        config.worker.liveness_timeout_ms = 1000;
        config.worker.max_message_processing_ms = 1000;
        assert!(config.validate().is_err());

        config.worker.max_message_processing_ms = 400;
        assert!(config.validate().is_ok());
        assert_eq!(config.worker.message_wait(), Duration::from_millis(600));
    }

    #[test]
    fn test_zero_capacities_rejected() {
        let mut config = StorageConfig::default();
        config.max_records_per_type = 0;
        assert!(config.validate().is_err());

        let mut config = StorageConfig::default();
        config.batch_buffer_size = 0;
        assert!(config.validate().is_err());

        let mut config = StorageConfig::default();
        config.max_types = 300;
        assert!(config.validate().is_err());
    }
}
