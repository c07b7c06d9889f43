//! Core data types for the telemetry storage engine
//!
//! This module contains the small value types shared by the registry, the
//! backends, the batch protocol and the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense identifier of a registered record type
///
/// Ids are assigned in registration order starting at zero, so they can index
/// per-type arrays directly. The id doubles as the `type` byte of a batch frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub u8);

impl TypeId {
    /// Index into per-type arrays
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Operating mode of the storage engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Records are forwarded immediately, never persisted
    #[default]
    Passthrough,
    /// Records are persisted in the active backend
    Buffer,
}

impl StorageMode {
    /// Display name for the mode
    pub fn display_name(&self) -> &'static str {
        match self {
            StorageMode::Passthrough => "passthrough",
            StorageMode::Buffer => "buffer",
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Per-type entry of a statistics dump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeStats {
    /// Type id
    pub id: TypeId,
    /// Type name
    pub name: String,
    /// Size of one record in bytes
    pub record_size: usize,
    /// Number of records currently stored
    pub count: usize,
}

/// Read-only diagnostic snapshot of the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStats {
    /// Name of the active backend
    pub backend: String,
    /// Name of the current state machine state
    pub state: String,
    /// Stored record counts per type
    pub types: Vec<TypeStats>,
    /// Sum of all per-type counts
    pub total_records: usize,
    /// Configured capacity per type
    pub max_records_per_type: usize,
    /// Session id of the open batch session, if any
    pub active_session: Option<u32>,
    /// When the snapshot was taken
    pub generated_at: DateTime<Utc>,
}

impl StorageStats {
    /// Count for a type, if it is part of the snapshot
    pub fn count_for(&self, name: &str) -> Option<usize> {
        self.types.iter().find(|t| t.name == name).map(|t| t.count)
    }
}
