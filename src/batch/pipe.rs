//! Bounded byte pipe carrying length-framed records
//!
//! Every item is written and read as one frame:
//!
//! ```text
//! +------+-----------------+------------------------+
//! | type | data_size (LE)  | payload[data_size]     |
//! | u8   | u16             |                        |
//! +------+-----------------+------------------------+
//! ```
//!
//! Frames are only enqueued when the whole frame fits, so a reader never sees
//! a partial frame unless the pipe is corrupt.

use crate::error::{Result, StorageError};
use crate::types::TypeId;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Bytes in a frame header
pub const FRAME_HEADER_LEN: usize = 3;

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub data_type: u8,
    pub data_size: u16,
}

impl FrameHeader {
    /// Encode the header
    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_LEN] {
        let [lo, hi] = self.data_size.to_le_bytes();
        [self.data_type, lo, hi]
    }

    /// Decode a header
    pub fn from_bytes(bytes: [u8; FRAME_HEADER_LEN]) -> Self {
        Self {
            data_type: bytes[0],
            data_size: u16::from_le_bytes([bytes[1], bytes[2]]),
        }
    }
}

/// One record read from the pipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    /// Type id of the record
    pub data_type: TypeId,
    /// Record bytes
    pub payload: Vec<u8>,
}

/// Bounded FIFO of framed records shared by the worker and a consumer
#[derive(Debug)]
pub struct BatchPipe {
    capacity: usize,
    max_record_size: usize,
    bytes: Mutex<VecDeque<u8>>,
    readable: Condvar,
    writable: Condvar,
}

impl BatchPipe {
    /// Create a new pipe of `capacity` bytes accepting payloads up to `max_record_size`
    pub fn new(capacity: usize, max_record_size: usize) -> Self {
        Self {
            capacity,
            max_record_size,
            bytes: Mutex::new(VecDeque::with_capacity(capacity)),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    /// Byte capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffered bytes
    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    /// Whether no bytes are buffered
    pub fn is_empty(&self) -> bool {
        self.bytes.lock().is_empty()
    }

    /// Whether a frame with this payload length fits right now
    pub fn fits(&self, payload_len: usize) -> bool {
        let bytes = self.bytes.lock();
        self.capacity - bytes.len() >= FRAME_HEADER_LEN + payload_len
    }

    /// Write one frame, waiting up to `timeout` for space
    pub fn enqueue_framed(
        &self,
        data_type: TypeId,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<()> {
        let frame_len = FRAME_HEADER_LEN + payload.len();
        if frame_len > self.capacity {
            return Err(StorageError::BufferTooSmall {
                needed: frame_len,
                available: self.capacity,
            });
        }
        let data_size = u16::try_from(payload.len()).map_err(|_| StorageError::BufferTooSmall {
            needed: payload.len(),
            available: usize::from(u16::MAX),
        })?;

        let deadline = Instant::now() + timeout;
        let mut bytes = self.bytes.lock();
        while self.capacity - bytes.len() < frame_len {
            if self.writable.wait_until(&mut bytes, deadline).timed_out()
                && self.capacity - bytes.len() < frame_len
            {
                return Err(StorageError::Timeout(format!(
                    "batch pipe full, {} bytes needed",
                    frame_len
                )));
            }
        }

        let header = FrameHeader {
            data_type: data_type.0,
            data_size,
        };
        bytes.extend(header.to_bytes());
        bytes.extend(payload.iter().copied());
        drop(bytes);

        self.readable.notify_one();
        Ok(())
    }

    /// Read one frame, waiting up to `timeout` for data
    pub fn dequeue_framed(&self, timeout: Duration) -> Result<BatchItem> {
        let deadline = Instant::now() + timeout;
        let mut bytes = self.bytes.lock();
        while bytes.len() < FRAME_HEADER_LEN {
            if self.readable.wait_until(&mut bytes, deadline).timed_out()
                && bytes.len() < FRAME_HEADER_LEN
            {
                if !bytes.is_empty() {
                    let stray = bytes.len();
                    bytes.clear();
                    drop(bytes);
                    self.writable.notify_all();
                    return Err(StorageError::CorruptFrame(format!(
                        "{} stray bytes without a frame header",
                        stray
                    )));
                }
                return Err(StorageError::Timeout(format!(
                    "no batch data within {} ms",
                    timeout.as_millis()
                )));
            }
        }

        let header = FrameHeader::from_bytes([bytes[0], bytes[1], bytes[2]]);
        let data_size = usize::from(header.data_size);
        let problem = if data_size > self.max_record_size {
            Some(format!(
                "frame size {} exceeds maximum record size {}",
                data_size, self.max_record_size
            ))
        } else if bytes.len() - FRAME_HEADER_LEN < data_size {
            Some(format!(
                "frame advertises {} bytes, only {} buffered",
                data_size,
                bytes.len() - FRAME_HEADER_LEN
            ))
        } else {
            None
        };

        if let Some(problem) = problem {
            // Frame boundaries are lost, nothing after this point can be trusted
            error!("Corrupt batch frame, dropping {} bytes: {}", bytes.len(), problem);
            bytes.clear();
            drop(bytes);
            self.writable.notify_all();
            return Err(StorageError::CorruptFrame(problem));
        }

        let payload: Vec<u8> = bytes
            .drain(..FRAME_HEADER_LEN + data_size)
            .skip(FRAME_HEADER_LEN)
            .collect();
        drop(bytes);
        self.writable.notify_all();

        Ok(BatchItem {
            data_type: TypeId(header.data_type),
            payload,
        })
    }

    /// Discard all buffered bytes, returning how many were dropped
    pub fn drain(&self) -> usize {
        let mut bytes = self.bytes.lock();
        let dropped = bytes.len();
        bytes.clear();
        drop(bytes);
        if dropped > 0 {
            debug!("Drained {} unread bytes from batch pipe", dropped);
        }
        self.writable.notify_all();
        dropped
    }

    #[cfg(test)]
    fn push_raw(&self, raw: &[u8]) {
        self.bytes.lock().extend(raw.iter().copied());
        self.readable.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn test_frame_header_layout() {
        let header = FrameHeader {
            data_type: 2,
            data_size: 0x0120,
        };
        assert_eq!(header.to_bytes(), [2, 0x20, 0x01]);
        assert_eq!(FrameHeader::from_bytes([2, 0x20, 0x01]), header);
    }

    #[test]
    fn test_enqueue_dequeue() {
        let pipe = BatchPipe::new(64, 32);
        pipe.enqueue_framed(TypeId(1), &[1, 2, 3, 4], SHORT).unwrap();
        pipe.enqueue_framed(TypeId(0), &[9; 8], SHORT).unwrap();
        assert_eq!(pipe.len(), 3 + 4 + 3 + 8);

        let first = pipe.dequeue_framed(SHORT).unwrap();
        assert_eq!(first.data_type, TypeId(1));
        assert_eq!(first.payload, vec![1, 2, 3, 4]);
        let second = pipe.dequeue_framed(SHORT).unwrap();
        assert_eq!(second.payload, vec![9; 8]);
        assert!(pipe.is_empty());
    }

    #[test]
    fn test_empty_pipe_times_out() {
        let pipe = BatchPipe::new(16, 8);
        let err = pipe.dequeue_framed(SHORT).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_full_pipe_times_out_and_oversize_rejected() {
        let pipe = BatchPipe::new(12, 8);
        assert!(pipe.fits(8));
        pipe.enqueue_framed(TypeId(0), &[0; 8], SHORT).unwrap();
        assert!(!pipe.fits(1));
        assert!(matches!(
            pipe.enqueue_framed(TypeId(0), &[0; 1], SHORT),
            Err(StorageError::Timeout(_))
        ));
        assert!(matches!(
            pipe.enqueue_framed(TypeId(0), &[0; 10], SHORT),
            Err(StorageError::BufferTooSmall { needed: 13, available: 12 })
        ));
    }

    #[test]
    fn test_oversized_frame_is_corrupt() {
        let pipe = BatchPipe::new(64, 8);
        pipe.push_raw(&[0, 40, 0]);
        pipe.push_raw(&[0; 40]);
        let err = pipe.dequeue_framed(SHORT).unwrap_err();
        assert!(matches!(err, StorageError::CorruptFrame(_)));
        assert!(pipe.is_empty());
    }

    #[test]
    fn test_short_frame_is_corrupt() {
        let pipe = BatchPipe::new(64, 32);
        pipe.push_raw(&[1, 8, 0, 1, 2]);
        assert!(matches!(
            pipe.dequeue_framed(SHORT),
            Err(StorageError::CorruptFrame(_))
        ));
    }

    #[test]
    fn test_drain_unblocks_writer() {
        let pipe = Arc::new(BatchPipe::new(11, 8));
        pipe.enqueue_framed(TypeId(0), &[0; 8], SHORT).unwrap();

        let writer = {
            let pipe = Arc::clone(&pipe);
            thread::spawn(move || pipe.enqueue_framed(TypeId(1), &[1; 8], Duration::from_secs(2)))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(pipe.drain(), 11);

        writer.join().unwrap().unwrap();
        let item = pipe.dequeue_framed(SHORT).unwrap();
        assert_eq!(item.data_type, TypeId(1));
    }

    #[test]
    fn test_reader_wakes_on_write() {
        let pipe = Arc::new(BatchPipe::new(32, 8));
        let reader = {
            let pipe = Arc::clone(&pipe);
            thread::spawn(move || pipe.dequeue_framed(Duration::from_secs(2)))
        };
        thread::sleep(Duration::from_millis(20));
        pipe.enqueue_framed(TypeId(3), &[7; 8], SHORT).unwrap();
        let item = reader.join().unwrap().unwrap();
        assert_eq!(item.data_type, TypeId(3));
    }
}
