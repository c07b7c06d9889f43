//! Batch session bookkeeping and pipe population

use super::BatchPipe;
use super::pipe::FRAME_HEADER_LEN;
use crate::backend::StorageBackend;
use crate::error::{Result, ResultExt, StorageError};
use crate::registry::TypeRegistry;
use std::time::Duration;
use tracing::debug;

/// The one open batch retrieval session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSession {
    /// Nonzero id chosen by the consumer
    pub session_id: u32,
    /// Records stored when the session was last filled
    pub total_items: usize,
    /// Records moved into the pipe over the session's lifetime
    pub items_sent: usize,
    /// Whether records were left behind on the last fill
    pub more_data: bool,
}

impl BatchSession {
    /// Create a new session, rejecting the reserved id 0
    pub fn new(session_id: u32) -> Result<Self> {
        if session_id == 0 {
            return Err(StorageError::InvalidSession(session_id));
        }
        Ok(Self {
            session_id,
            total_items: 0,
            items_sent: 0,
            more_data: false,
        })
    }

    /// Move as many stored records as fit into the pipe
    ///
    /// Types are visited in registry order, oldest record first. The fill stops
    /// at the first record whose frame does not fit, leaving it stored.
    pub fn populate(
        &mut self,
        backend: &mut dyn StorageBackend,
        registry: &TypeRegistry,
        pipe: &BatchPipe,
        write_timeout: Duration,
    ) -> Result<PopulateOutcome> {
        let total = backend.total_count(registry)?;
        self.total_items = total;
        if total == 0 {
            self.more_data = false;
            return Ok(PopulateOutcome::Empty);
        }

        let mut buf = vec![0u8; registry.max_record_size()];
        let mut items = 0usize;
        let mut more_data = false;

        'types: for ty in registry.iter() {
            let stored = backend.count(ty)?;
            for _ in 0..stored {
                let size = backend.peek(ty, None)?;
                if !pipe.fits(size) {
                    debug!(
                        "Batch pipe full after {} items, {} bytes needed for next {} record",
                        items,
                        FRAME_HEADER_LEN + size,
                        ty.name
                    );
                    more_data = true;
                    break 'types;
                }

                // Consume only once the frame is queued, so a failed write
                // leaves the record stored
                let len = backend
                    .peek(ty, Some(&mut buf))
                    .with_context(|| format!("Failed to read {} record", ty.name))?;
                pipe.enqueue_framed(ty.id, &buf[..len], write_timeout)?;
                backend
                    .retrieve(ty, &mut buf)
                    .with_context(|| format!("Failed to retrieve {} record", ty.name))?;
                items += 1;
            }
        }

        self.items_sent += items;
        self.more_data = more_data;
        debug!(
            "Session 0x{:X}: {} of {} items queued, more_data={}",
            self.session_id, items, total, more_data
        );

        Ok(PopulateOutcome::Available { items, more_data })
    }
}

/// Result of filling the pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulateOutcome {
    /// Nothing was stored
    Empty,
    /// `items` records were queued
    Available { items: usize, more_data: bool },
}
