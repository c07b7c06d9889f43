//! Error handling for the telemetry storage engine
//!
//! This module defines the engine's error type, a classification used to decide
//! how each failure propagates, and a Result alias for use throughout the crate.

use crate::types::TypeId;
use thiserror::Error;

/// How an error is handled by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No data available right now; returned to the caller, not a failure
    Transient,
    /// Destination buffer or record has the wrong size
    Capacity,
    /// Backend or pipe I/O failure; escalated as fatal
    Io,
    /// Invalid request for the current state; rejected with a reply
    Protocol,
    /// Bad startup configuration; aborts startup
    Configuration,
}

/// Main error type for storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Nothing stored for the type
    #[error("No data available for type {0}")]
    NoData(TypeId),

    /// An operation did not complete in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Destination buffer smaller than the record
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Record length does not match the registered record size
    #[error("Record size mismatch for {type_name}: expected {expected} bytes, got {actual}")]
    RecordSize {
        type_name: String,
        expected: usize,
        actual: usize,
    },

    /// Type id not known to the registry or backend
    #[error("Unknown data type {0}")]
    UnknownType(TypeId),

    /// Session id is zero or does not match the active session
    #[error("Invalid session id 0x{0:X}")]
    InvalidSession(u32),

    /// Batch read attempted without an open session
    #[error("No batch session is open")]
    NoSession,

    /// Persistent header violates the offset invariants
    #[error(
        "Corrupt storage header for {type_name}: read_offset={read_offset}, write_offset={write_offset}"
    )]
    CorruptHeader {
        type_name: String,
        read_offset: u32,
        write_offset: u32,
    },

    /// Batch pipe contents are not a valid frame
    #[error("Corrupt batch frame: {0}")]
    CorruptFrame(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// Errors related to configuration loading or validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<StorageError>,
    },
}

impl StorageError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        StorageError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Classify the error for propagation
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NoData(_) | StorageError::Timeout(_) => ErrorKind::Transient,
            StorageError::BufferTooSmall { .. } | StorageError::RecordSize { .. } => {
                ErrorKind::Capacity
            }
            StorageError::UnknownType(_)
            | StorageError::InvalidSession(_)
            | StorageError::NoSession => ErrorKind::Protocol,
            StorageError::CorruptHeader { .. }
            | StorageError::CorruptFrame(_)
            | StorageError::Channel(_)
            | StorageError::Io(_) => ErrorKind::Io,
            StorageError::Config(_) => ErrorKind::Configuration,
            StorageError::WithContext { source, .. } => source.kind(),
        }
    }

    /// Whether the error must be escalated to the supervisor
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Io | ErrorKind::Configuration)
    }

    /// Whether the error only means "nothing available yet"
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| StorageError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| StorageError::Io(e).with_context(f()))
    }
}
