//! Configuration module for the storage engine
//!
//! This module handles loading, validating and saving the engine configuration.
//! Configuration files are TOML; every field is optional and falls back to the
//! defaults below.
//!
//! # Data Location
//!
//! The circular-log backend stores its files in the platform-appropriate data
//! directory unless the configuration names another root:
//! - **Linux**: `~/.local/share/dev.telemetry-store/`
//! - **macOS**: `~/Library/Application Support/dev.telemetry-store/`
//! - **Windows**: `%APPDATA%\dev.telemetry-store\`
//!
//! # Example
//!
//! ```ignore
//! use telemetry_store::config::StorageConfig;
//!
//! let config = StorageConfig::load("storage.toml")?;
//! config.validate()?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{Result, StorageError};
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "dev.telemetry-store";

/// Default number of registrable record types
pub const DEFAULT_MAX_TYPES: usize = 8;

/// Default capacity of each per-type store
pub const DEFAULT_RECORDS_PER_TYPE: usize = 32;

/// Default byte capacity of the batch pipe
pub const DEFAULT_BATCH_BUFFER_SIZE: usize = 2048;

/// Default partition block size
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Default partition block count
pub const DEFAULT_BLOCK_COUNT: usize = 64;

/// Default worker stack size (256 KiB)
pub const DEFAULT_WORKER_STACK_SIZE: usize = 256 * 1024;

/// Default supervisor liveness timeout
pub const DEFAULT_LIVENESS_TIMEOUT_MS: u64 = 60_000;

/// Default processing budget per message
pub const DEFAULT_MESSAGE_PROCESSING_MS: u64 = 5_000;

/// Default timeout for one batch frame write
pub const DEFAULT_BATCH_WRITE_TIMEOUT_MS: u64 = 100;

/// Default timeout for publishing to the data or reply channel
pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 1_000;

/// Get the default storage directory for persistent backends
///
/// Falls back to a relative directory when the platform has no data directory.
pub fn default_storage_dir() -> PathBuf {
    dirs_next::data_dir()
        .map(|p| p.join(APP_ID))
        .unwrap_or_else(|| PathBuf::from("telemetry-store-data"))
}

impl StorageConfig {
    /// Load a configuration file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            StorageError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            StorageError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })
    }

    /// Load a configuration file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load storage config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the configuration to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| StorageError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            StorageError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}
