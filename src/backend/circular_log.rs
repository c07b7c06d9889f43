//! Persistent circular-log backend
//!
//! Each type owns a header file and a set of data files inside the storage
//! root:
//!
//! - `<root>/<name>.header` - 8 bytes, little-endian `read_offset` then `write_offset`
//! - `<root>/<name>_<index>.bin` - up to `entries_per_block` records each
//!
//! The offsets count modulo [`offset_modulus`], the largest multiple of
//! `capacity` that fits a `u32`, so the physical slot `offset mod capacity`
//! stays continuous when the counters wrap. The log holds
//! `write_offset - read_offset` records (modulo the same value), never more
//! than `capacity`. A store into a full log advances `read_offset` so the
//! oldest record is overwritten.
//!
//! The partition is modeled by `block_size` and `block_count`. Each data file
//! is sized to one block, so a type needs `ceil(record_size * capacity / block_size)`
//! blocks. The filesystem additionally needs [`METADATA_BLOCKS`] and
//! [`COW_BLOCKS`].

use super::StorageBackend;
use crate::config::CircularLogSettings;
use crate::error::{Result, ResultExt, StorageError};
use crate::registry::{TypeDescriptor, TypeRegistry};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Blocks reserved for filesystem metadata
pub const METADATA_BLOCKS: usize = 2;

/// Block reserved for copy-on-write updates
pub const COW_BLOCKS: usize = 1;

/// Size of a header file in bytes
pub const HEADER_LEN: usize = 8;

/// Read and write counters of one type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogHeader {
    pub read_offset: u32,
    pub write_offset: u32,
}

impl LogHeader {
    /// Encode for the header file
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&self.read_offset.to_le_bytes());
        out[4..].copy_from_slice(&self.write_offset.to_le_bytes());
        out
    }

    /// Decode a header file
    pub fn from_bytes(bytes: [u8; HEADER_LEN]) -> Self {
        let [r0, r1, r2, r3, w0, w1, w2, w3] = bytes;
        Self {
            read_offset: u32::from_le_bytes([r0, r1, r2, r3]),
            write_offset: u32::from_le_bytes([w0, w1, w2, w3]),
        }
    }

    /// Records between the counters, modulo [`offset_modulus`]
    fn distance(&self, capacity: usize) -> usize {
        let modulus = offset_modulus(capacity);
        let write = u64::from(self.write_offset);
        let read = u64::from(self.read_offset);
        ((write + modulus - read) % modulus) as usize
    }

    /// Records currently held, clamped to `capacity`
    pub fn stored(&self, capacity: usize) -> usize {
        self.distance(capacity).min(capacity)
    }

    /// Whether the counters satisfy the log invariants
    pub fn is_consistent(&self, capacity: usize) -> bool {
        let modulus = offset_modulus(capacity);
        u64::from(self.read_offset) < modulus
            && u64::from(self.write_offset) < modulus
            && self.distance(capacity) <= capacity
    }
}

/// Value at which log offsets wrap back to zero
///
/// A multiple of `capacity`, so every slot keeps its place in the sequence
/// across the wrap.
pub fn offset_modulus(capacity: usize) -> u64 {
    let capacity = capacity.max(1) as u64;
    capacity * (u64::from(u32::MAX) / capacity).max(1)
}

/// Offset following `offset`
pub fn next_offset(offset: u32, capacity: usize) -> u32 {
    ((u64::from(offset) + 1) % offset_modulus(capacity)) as u32
}

/// Physical location of a record slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPosition {
    /// Data file index
    pub file_index: usize,
    /// Byte offset inside the data file
    pub byte_offset: u64,
}

/// Map a log offset to its data file and byte position
pub fn slot_position(
    offset: u32,
    capacity: usize,
    record_size: usize,
    entries_per_block: usize,
) -> SlotPosition {
    let wrapped = offset as usize % capacity;
    SlotPosition {
        file_index: wrapped / entries_per_block,
        byte_offset: ((wrapped % entries_per_block) * record_size) as u64,
    }
}

/// Blocks needed by one type's data files
pub fn required_blocks(record_size: usize, capacity: usize, block_size: usize) -> usize {
    (record_size * capacity).div_ceil(block_size)
}

/// Blocks the partition needs for every registered type plus filesystem overhead
pub fn partition_requirement(registry: &TypeRegistry, capacity: usize, block_size: usize) -> usize {
    registry
        .iter()
        .map(|ty| required_blocks(ty.record_size, capacity, block_size))
        .sum::<usize>()
        + METADATA_BLOCKS
        + COW_BLOCKS
}

#[derive(Debug, Clone)]
struct TypeLog {
    name: String,
    record_size: usize,
    entries_per_block: usize,
    header: LogHeader,
}

/// Circular log of fixed-size records per type, persisted in files
#[derive(Debug)]
pub struct CircularLogBackend {
    settings: CircularLogSettings,
    capacity: usize,
    logs: Vec<TypeLog>,
}

impl CircularLogBackend {
    /// Create a new backend storing up to `capacity` records per type
    pub fn new(settings: CircularLogSettings, capacity: usize) -> Self {
        Self {
            settings,
            capacity,
            logs: Vec::new(),
        }
    }

    /// Storage root directory
    pub fn root(&self) -> &Path {
        &self.settings.root
    }

    /// Current counters of a type
    pub fn header(&self, ty: &TypeDescriptor) -> Result<LogHeader> {
        Ok(self.log(ty)?.header)
    }

    fn header_path(&self, name: &str) -> PathBuf {
        self.settings.root.join(format!("{}.header", name))
    }

    fn data_path(&self, name: &str, file_index: usize) -> PathBuf {
        self.settings.root.join(format!("{}_{}.bin", name, file_index))
    }

    fn log(&self, ty: &TypeDescriptor) -> Result<&TypeLog> {
        self.logs
            .get(ty.id.index())
            .ok_or(StorageError::UnknownType(ty.id))
    }

    fn verify_partition(&self, registry: &TypeRegistry) -> Result<()> {
        let needed = partition_requirement(registry, self.capacity, self.settings.block_size);
        if needed > self.settings.block_count {
            return Err(StorageError::Config(format!(
                "Storage partition too small: need at least {} blocks, partition has {}",
                needed, self.settings.block_count
            )));
        }
        info!(
            "Storage partition size verified: need {} blocks, have {} blocks",
            needed, self.settings.block_count
        );
        Ok(())
    }

    fn entries_per_block(&self, ty: &TypeDescriptor) -> Result<usize> {
        let epb = self.settings.block_size / ty.record_size;
        if epb == 0 {
            return Err(StorageError::Config(format!(
                "Record size {} of {} exceeds block size {}",
                ty.record_size, ty.name, self.settings.block_size
            )));
        }
        Ok(epb)
    }

    fn read_header_file(&self, name: &str) -> Result<Option<LogHeader>> {
        let path = self.header_path(name);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::Io(e)
                    .with_context(format!("Failed to open header file {:?}", path)))
            }
        };

        let mut bytes = [0u8; HEADER_LEN];
        match file.read_exact(&mut bytes) {
            Ok(()) => Ok(Some(LogHeader::from_bytes(bytes))),
            Err(e) if e.kind() == IoErrorKind::UnexpectedEof => Err(StorageError::CorruptHeader {
                type_name: name.to_string(),
                read_offset: 0,
                write_offset: 0,
            }),
            Err(e) => Err(StorageError::Io(e)
                .with_context(format!("Failed to read header file {:?}", path))),
        }
    }

    fn write_header_file(&self, name: &str, header: &LogHeader) -> Result<()> {
        let path = self.header_path(name);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open header file {:?}", path))?;
        file.write_all(&header.to_bytes())
            .with_context(|| format!("Failed to write header file {:?}", path))?;
        if self.settings.sync_writes {
            file.sync_data()
                .with_context(|| format!("Failed to sync header file {:?}", path))?;
        }
        Ok(())
    }

    fn load_or_create_header(&self, ty: &TypeDescriptor) -> Result<LogHeader> {
        match self.read_header_file(&ty.name)? {
            Some(header) => {
                if !header.is_consistent(self.capacity) {
                    return Err(StorageError::CorruptHeader {
                        type_name: ty.name.clone(),
                        read_offset: header.read_offset,
                        write_offset: header.write_offset,
                    });
                }
                debug!(
                    "Reusing header for {}: read_offset={}, write_offset={}",
                    ty.name, header.read_offset, header.write_offset
                );
                Ok(header)
            }
            None => {
                let header = LogHeader::default();
                self.write_header_file(&ty.name, &header)?;
                debug!("Created header for {}", ty.name);
                Ok(header)
            }
        }
    }

    fn read_slot(&self, log: &TypeLog, offset: u32, buf: &mut [u8]) -> Result<()> {
        let pos = slot_position(offset, self.capacity, log.record_size, log.entries_per_block);
        let path = self.data_path(&log.name, pos.file_index);
        let mut file =
            File::open(&path).with_context(|| format!("Failed to open data file {:?}", path))?;
        file.seek(SeekFrom::Start(pos.byte_offset))
            .with_context(|| format!("Failed to seek in data file {:?}", path))?;
        file.read_exact(&mut buf[..log.record_size])
            .with_context(|| format!("Failed to read data file {:?}", path))
    }

    fn write_slot(&self, log: &TypeLog, offset: u32, record: &[u8]) -> Result<()> {
        let pos = slot_position(offset, self.capacity, log.record_size, log.entries_per_block);
        let path = self.data_path(&log.name, pos.file_index);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open data file {:?}", path))?;
        file.seek(SeekFrom::Start(pos.byte_offset))
            .with_context(|| format!("Failed to seek in data file {:?}", path))?;
        file.write_all(record)
            .with_context(|| format!("Failed to write data file {:?}", path))?;
        if self.settings.sync_writes {
            file.sync_data()
                .with_context(|| format!("Failed to sync data file {:?}", path))?;
        }
        Ok(())
    }

    fn check_readable(&self, ty: &TypeDescriptor, log: &TypeLog, buf_len: usize) -> Result<()> {
        if log.header.stored(self.capacity) == 0 {
            return Err(StorageError::NoData(ty.id));
        }
        if buf_len < log.record_size {
            return Err(StorageError::BufferTooSmall {
                needed: log.record_size,
                available: buf_len,
            });
        }
        Ok(())
    }
}

impl StorageBackend for CircularLogBackend {
    fn name(&self) -> &'static str {
        "circular_log"
    }

    fn init(&mut self, registry: &TypeRegistry) -> Result<()> {
        fs::create_dir_all(&self.settings.root).with_context(|| {
            format!("Failed to create storage directory {:?}", self.settings.root)
        })?;

        self.verify_partition(registry)?;

        let mut logs = Vec::with_capacity(registry.len());
        for ty in registry.iter() {
            let entries_per_block = self.entries_per_block(ty)?;
            let header = self.load_or_create_header(ty)?;
            logs.push(TypeLog {
                name: ty.name.clone(),
                record_size: ty.record_size,
                entries_per_block,
                header,
            });
        }
        self.logs = logs;

        info!(
            "Circular log backend ready at {:?} with {} types",
            self.settings.root,
            self.logs.len()
        );
        Ok(())
    }

    fn store(&mut self, ty: &TypeDescriptor, record: &[u8]) -> Result<()> {
        ty.check_size(record.len())?;
        let mut log = self.log(ty)?.clone();

        let was_full = log.header.distance(self.capacity) >= self.capacity;
        self.write_slot(&log, log.header.write_offset, record)?;

        log.header.write_offset = next_offset(log.header.write_offset, self.capacity);
        if was_full {
            log.header.read_offset = next_offset(log.header.read_offset, self.capacity);
            warn!("{} log full, overwrote oldest record", ty.name);
        }
        self.write_header_file(&log.name, &log.header)?;

        debug!(
            "Stored {} record: read_offset={}, write_offset={}",
            ty.name, log.header.read_offset, log.header.write_offset
        );
        self.logs[ty.id.index()] = log;
        Ok(())
    }

    fn peek(&self, ty: &TypeDescriptor, buf: Option<&mut [u8]>) -> Result<usize> {
        let log = self.log(ty)?;
        match buf {
            None => {
                self.check_readable(ty, log, log.record_size)?;
                Ok(log.record_size)
            }
            Some(buf) => {
                self.check_readable(ty, log, buf.len())?;
                self.read_slot(log, log.header.read_offset, buf)?;
                Ok(log.record_size)
            }
        }
    }

    fn retrieve(&mut self, ty: &TypeDescriptor, buf: &mut [u8]) -> Result<usize> {
        let mut log = self.log(ty)?.clone();
        self.check_readable(ty, &log, buf.len())?;
        self.read_slot(&log, log.header.read_offset, buf)?;

        log.header.read_offset = next_offset(log.header.read_offset, self.capacity);
        self.write_header_file(&log.name, &log.header)?;

        let size = log.record_size;
        self.logs[ty.id.index()] = log;
        Ok(size)
    }

    fn count(&self, ty: &TypeDescriptor) -> Result<usize> {
        Ok(self.log(ty)?.header.stored(self.capacity))
    }

    fn clear(&mut self) -> Result<()> {
        let root = self.settings.root.clone();
        let entries =
            fs::read_dir(&root).with_context(|| format!("Failed to list {:?}", root))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("Failed to list {:?}", root))?;
            let path = entry.path();
            if path.is_file() {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to delete {:?}", path))?;
                debug!("Deleted {:?}", path);
            }
        }

        for log in &self.logs {
            self.write_header_file(&log.name, &LogHeader::default())?;
        }
        for log in &mut self.logs {
            log.header = LogHeader::default();
        }

        info!("Circular log storage cleared");
        Ok(())
    }
}
