//! Storage backends
//!
//! A backend keeps the stored records of every registered type. The engine
//! owns exactly one backend and calls it from the worker thread only, so
//! backends need no internal locking.
//!
//! # Components
//!
//! - [`StorageBackend`] - Common interface used by the engine
//! - [`RamBackend`] - One fixed-capacity byte ring per type, lost on restart
//! - [`CircularLogBackend`] - Per-type log files with persistent read/write offsets
//! - [`ByteRing`] - Byte ring buffer used by the RAM backend
//!
//! Both backends keep at most `max_records_per_type` records per type. Storing
//! into a full store discards the oldest record first, so `store` never fails
//! for lack of space.
//!
//! # Example
//!
//! ```ignore
//! use telemetry_store::backend::{RamBackend, StorageBackend};
//!
//! let mut backend = RamBackend::new(32);
//! backend.init(&registry)?;
//! backend.store(battery, &record)?;
//! let mut buf = [0u8; 8];
//! let len = backend.retrieve(battery, &mut buf)?;
//! ```

pub mod circular_log;
pub mod ram;
pub mod ring;

pub use circular_log::{
    next_offset, offset_modulus, partition_requirement, required_blocks, slot_position,
    CircularLogBackend, LogHeader, SlotPosition, COW_BLOCKS, METADATA_BLOCKS,
};
pub use ram::RamBackend;
pub use ring::ByteRing;

use crate::config::{BackendKind, StorageConfig};
use crate::error::Result;
use crate::registry::{TypeDescriptor, TypeRegistry};

/// Common interface for storage backends
///
/// Every operation addresses one registered type. Errors follow the engine's
/// error classification: an empty store is [`StorageError::NoData`], a wrong
/// record or buffer size is a capacity error, and anything that touches the
/// medium and fails is an I/O error.
///
/// [`StorageError::NoData`]: crate::error::StorageError::NoData
pub trait StorageBackend: Send {
    /// Short backend name for logs and stats
    fn name(&self) -> &'static str;

    /// Prepare per-type storage for every registered type
    fn init(&mut self, registry: &TypeRegistry) -> Result<()>;

    /// Append one record, discarding the oldest when full
    fn store(&mut self, ty: &TypeDescriptor, record: &[u8]) -> Result<()>;

    /// Size of the oldest record, copying it into `buf` when one is given
    ///
    /// Never consumes the record.
    fn peek(&self, ty: &TypeDescriptor, buf: Option<&mut [u8]>) -> Result<usize>;

    /// Remove the oldest record into `buf` and return its size
    fn retrieve(&mut self, ty: &TypeDescriptor, buf: &mut [u8]) -> Result<usize>;

    /// Number of records stored for the type
    fn count(&self, ty: &TypeDescriptor) -> Result<usize>;

    /// Remove all records of all types
    fn clear(&mut self) -> Result<()>;

    /// Sum of the counts of every registered type
    fn total_count(&self, registry: &TypeRegistry) -> Result<usize> {
        registry
            .iter()
            .try_fold(0usize, |total, ty| Ok(total + self.count(ty)?))
    }
}

/// Create the backend selected by the configuration
///
/// The backend is not initialized; the engine calls `init` with its registry.
pub fn create_backend(config: &StorageConfig) -> Box<dyn StorageBackend> {
    match config.backend.kind {
        BackendKind::Ram => Box::new(RamBackend::new(config.max_records_per_type)),
        BackendKind::CircularLog => Box::new(CircularLogBackend::new(
            config.backend.log.clone(),
            config.max_records_per_type,
        )),
    }
}
