//! Batch streaming protocol
//!
//! Large amounts of buffered data are extracted through a session. A consumer
//! asks the engine for a batch with a nonzero session id; the engine moves as
//! many stored records as fit into a bounded [`BatchPipe`] and replies with the
//! item count and whether more data remains. The consumer then reads frames
//! with a [`BatchReader`], requests a refill with the same id while
//! `more_data` is set, and finally closes the session.
//!
//! # Components
//!
//! - [`BatchPipe`] - Bounded byte FIFO of `{type, data_size, payload}` frames
//! - [`BatchSession`] - Session bookkeeping and pipe population
//! - [`BatchReader`] - Consumer handle that reads whole frames

pub mod pipe;
pub mod session;

pub use pipe::{BatchItem, BatchPipe, FrameHeader, FRAME_HEADER_LEN};
pub use session::{BatchSession, PopulateOutcome};

use crate::error::{Result, StorageError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Consumer handle for reading batch frames
///
/// The reader only returns data while a session is open. Session id 0 means
/// no session.
#[derive(Debug, Clone)]
pub struct BatchReader {
    pipe: Arc<BatchPipe>,
    active_session: Arc<AtomicU32>,
}

impl BatchReader {
    /// Create a new reader over a pipe and the engine's active-session slot
    pub fn new(pipe: Arc<BatchPipe>, active_session: Arc<AtomicU32>) -> Self {
        Self {
            pipe,
            active_session,
        }
    }

    /// Id of the open session, if any
    pub fn session_id(&self) -> Option<u32> {
        match self.active_session.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    /// Read the next frame, waiting up to `timeout`
    ///
    /// Returns [`StorageError::Timeout`] when nothing arrives in time. The
    /// caller decides whether to retry, request a refill, or close.
    pub fn read_next(&self, timeout: Duration) -> Result<BatchItem> {
        if self.session_id().is_none() {
            return Err(StorageError::NoSession);
        }
        self.pipe.dequeue_framed(timeout)
    }

    /// Read frames until the pipe stays empty for `idle_timeout`
    pub fn read_available(&self, idle_timeout: Duration) -> Result<Vec<BatchItem>> {
        let mut items = Vec::new();
        loop {
            match self.read_next(idle_timeout) {
                Ok(item) => items.push(item),
                Err(e) if e.is_transient() => return Ok(items),
                Err(e) => return Err(e),
            }
        }
    }

    /// Bytes waiting in the pipe
    pub fn pending_bytes(&self) -> usize {
        self.pipe.len()
    }
}
