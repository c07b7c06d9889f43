//! Type registry
//!
//! The registry is the list of record types the engine knows about. It is built
//! once at startup with [`TypeRegistry::builder`] and never changes afterwards.
//! Ids are dense and assigned in registration order, so every per-type array in
//! the backends can be indexed by [`TypeId`].
//!
//! Each type names the producer channel it listens to and an extractor that
//! turns an accepted producer message into exactly `record_size` bytes.

use crate::error::{Result, StorageError};
use crate::types::TypeId;
use std::fmt;
use std::sync::Arc;

/// Name of a producer channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub &'static str);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A message published by a producer component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerMessage {
    /// Channel the message was published on
    pub channel: ChannelId,
    /// Raw message body
    pub payload: Vec<u8>,
}

impl ProducerMessage {
    /// Create a new producer message
    pub fn new(channel: ChannelId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }
}

/// Filters and extracts a record from a producer message
///
/// Returning `None` means the message is not a sample of this type and is
/// ignored.
pub trait RecordExtractor: Send + Sync {
    fn extract(&self, message: &[u8]) -> Option<Vec<u8>>;
}

impl<F> RecordExtractor for F
where
    F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync,
{
    fn extract(&self, message: &[u8]) -> Option<Vec<u8>> {
        self(message)
    }
}

/// Immutable description of one record type
#[derive(Clone)]
pub struct TypeDescriptor {
    /// Dense id, also the frame type byte
    pub id: TypeId,
    /// Unique name, used for file names and stats
    pub name: String,
    /// Exact size of one record in bytes
    pub record_size: usize,
    /// Producer channel the type listens to
    pub source: ChannelId,
    extractor: Arc<dyn RecordExtractor>,
}

impl TypeDescriptor {
    /// Run the extractor and check the record length
    ///
    /// A record of the wrong size is dropped with a warning.
    pub fn extract(&self, message: &[u8]) -> Option<Vec<u8>> {
        let record = self.extractor.extract(message)?;
        if record.len() != self.record_size {
            tracing::warn!(
                "Extractor for {} produced {} bytes, expected {}",
                self.name,
                record.len(),
                self.record_size
            );
            return None;
        }
        Some(record)
    }

    /// Check that a record has this type's size
    pub fn check_size(&self, len: usize) -> Result<()> {
        if len != self.record_size {
            return Err(StorageError::RecordSize {
                type_name: self.name.clone(),
                expected: self.record_size,
                actual: len,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("record_size", &self.record_size)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

struct PendingType {
    name: String,
    record_size: usize,
    source: ChannelId,
    extractor: Arc<dyn RecordExtractor>,
}

/// Builder for [`TypeRegistry`]
pub struct RegistryBuilder {
    max_types: usize,
    pending: Vec<PendingType>,
}

impl RegistryBuilder {
    /// Register a record type
    pub fn register(
        mut self,
        name: impl Into<String>,
        record_size: usize,
        source: ChannelId,
        extractor: impl RecordExtractor + 'static,
    ) -> Self {
        self.pending.push(PendingType {
            name: name.into(),
            record_size,
            source,
            extractor: Arc::new(extractor),
        });
        self
    }

    /// Validate the registrations and assign ids
    pub fn build(self) -> Result<TypeRegistry> {
        if self.max_types > usize::from(u8::MAX) + 1 {
            return Err(StorageError::Config(format!(
                "max_types {} exceeds the 256 ids a frame can carry",
                self.max_types
            )));
        }

        if self.pending.len() > self.max_types {
            return Err(StorageError::Config(format!(
                "{} types registered but max_types is {}",
                self.pending.len(),
                self.max_types
            )));
        }

        let mut types: Vec<TypeDescriptor> = Vec::with_capacity(self.pending.len());
        for (index, pending) in self.pending.into_iter().enumerate() {
            if pending.record_size == 0 {
                return Err(StorageError::Config(format!(
                    "Type {} has a zero record size",
                    pending.name
                )));
            }
            if pending.record_size > usize::from(u16::MAX) {
                return Err(StorageError::Config(format!(
                    "Type {} record size {} does not fit a frame",
                    pending.name, pending.record_size
                )));
            }
            if types.iter().any(|t| t.name == pending.name) {
                return Err(StorageError::Config(format!(
                    "Type {} registered twice",
                    pending.name
                )));
            }

            // index < 256 is guaranteed by the max_types check
            let id = TypeId(index as u8);
            tracing::debug!(
                "Registered type {} {} ({} bytes from {})",
                id,
                pending.name,
                pending.record_size,
                pending.source
            );
            types.push(TypeDescriptor {
                id,
                name: pending.name,
                record_size: pending.record_size,
                source: pending.source,
                extractor: pending.extractor,
            });
        }

        Ok(TypeRegistry { types })
    }
}

/// Registry of record types, indexed by [`TypeId`]
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: Vec<TypeDescriptor>,
}

impl TypeRegistry {
    /// Create a builder accepting at most `max_types` registrations
    pub fn builder(max_types: usize) -> RegistryBuilder {
        RegistryBuilder {
            max_types,
            pending: Vec::new(),
        }
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no types are registered
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Iterate over the types in id order
    pub fn iter(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.iter()
    }

    /// Look up a type by id
    pub fn get(&self, id: TypeId) -> Option<&TypeDescriptor> {
        self.types.get(id.index())
    }

    /// Look up a type by name
    pub fn by_name(&self, name: &str) -> Option<&TypeDescriptor> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Types listening to a producer channel
    pub fn by_channel(&self, channel: ChannelId) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.iter().filter(move |t| t.source == channel)
    }

    /// Largest record size of any registered type
    pub fn max_record_size(&self) -> usize {
        self.types.iter().map(|t| t.record_size).max().unwrap_or(0)
    }
}
