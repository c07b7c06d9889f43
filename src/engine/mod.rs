//! Storage engine
//!
//! The engine runs on one dedicated worker thread that owns the backend, the
//! mode state machine and the batch session. Everything else talks to it
//! through channels:
//!
//! - [`Inbound`] - Control requests, producer samples and shutdown, into the worker
//! - [`ControlReply`] - Exactly one reply per control request
//! - [`DataMessage`] - Records forwarded in passthrough mode or by a flush
//! - [`SupervisorEvent`] - Liveness heartbeats and fatal errors
//!
//! Batch frames bypass the channels and travel through the shared
//! [`BatchPipe`](crate::batch::BatchPipe), read with a [`BatchReader`].
//!
//! # Example
//!
//! ```ignore
//! use telemetry_store::engine::{ControlRequest, StorageService};
//!
//! let (service, client) = StorageService::new(config, registry)?;
//! let handle = service.spawn()?;
//!
//! client.publish(BatterySample { percentage: 80.0 }.to_message())?;
//! let reply = client.request(ControlRequest::Stats, Duration::from_secs(1))?;
//!
//! client.shutdown();
//! handle.join().ok();
//! ```

pub mod state;
pub mod worker;

pub use state::{Level, Outcome, StorageState};
pub use worker::StorageWorker;

use crate::backend::{create_backend, StorageBackend};
use crate::batch::{BatchPipe, BatchReader, FRAME_HEADER_LEN};
use crate::config::StorageConfig;
use crate::error::{Result, ResultExt, StorageError};
use crate::registry::{ProducerMessage, TypeRegistry};
use crate::types::{StorageMode, StorageStats, TypeId};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Capacity of the inbound channel
pub const INBOUND_CHANNEL_CAPACITY: usize = 64;
/// Capacity of the reply channel
pub const REPLY_CHANNEL_CAPACITY: usize = 32;
/// Capacity of the data channel
pub const DATA_CHANNEL_CAPACITY: usize = 256;
/// Capacity of the supervisor channel
pub const SUPERVISOR_CHANNEL_CAPACITY: usize = 16;

/// Administrative request to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    /// Switch to passthrough mode
    ModePassthrough,
    /// Switch to buffer mode
    ModeBuffer,
    /// Publish every stored record on the data channel
    Flush,
    /// Open or refill a batch session
    BatchRequest { session_id: u32 },
    /// Close a batch session
    BatchClose { session_id: u32 },
    /// Delete all stored records
    Clear,
    /// Report a statistics snapshot
    Stats,
}

/// Why a mode change or clear was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// A batch session is open
    BatchActive,
}

/// Why a batch request or close failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchErrorReason {
    /// Session id 0 is reserved
    InvalidSessionId,
    /// Close named a session that is not the open one
    SessionMismatch,
    /// Batches are only served in buffer mode
    NotInBufferMode,
    /// The backend or pipe failed
    Storage(String),
}

/// Why a batch request was deferred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyReason {
    /// Another session is open
    OtherSession { active: u32 },
    /// The consumer has not read everything from the last fill
    UnreadData,
}

/// Reply to a [`ControlRequest`]
#[derive(Debug, Clone)]
pub enum ControlReply {
    ModeConfirmed(StorageMode),
    ModeChangeRejected {
        requested: StorageMode,
        reason: RejectReason,
    },
    BatchAvailable {
        session_id: u32,
        items: usize,
        more_data: bool,
    },
    BatchEmpty {
        session_id: u32,
    },
    BatchBusy {
        session_id: u32,
        reason: BusyReason,
    },
    BatchError {
        session_id: u32,
        reason: BatchErrorReason,
    },
    BatchClosed {
        session_id: u32,
    },
    Cleared,
    ClearRejected {
        reason: RejectReason,
    },
    Flushed {
        records: usize,
    },
    Stats(StorageStats),
    Failed {
        operation: String,
        error: String,
    },
}

/// A record published on the data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    pub data_type: TypeId,
    pub payload: Vec<u8>,
}

impl DataMessage {
    /// Length of the record in bytes
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Message into the worker
#[derive(Debug, Clone)]
pub enum Inbound {
    Control(ControlRequest),
    Sample(ProducerMessage),
    Shutdown,
}

/// Message to the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// The worker loop is alive
    Heartbeat,
    /// An unrecoverable storage failure
    Fatal { reason: String },
}

/// The storage engine before it starts running
pub struct StorageService {
    worker: StorageWorker,
    thread_name: String,
    stack_size: usize,
}

impl StorageService {
    /// Create a new service with the backend selected by the configuration
    pub fn new(config: StorageConfig, registry: TypeRegistry) -> Result<(Self, StorageClient)> {
        let backend = create_backend(&config);
        Self::with_backend(config, registry, backend)
    }

    /// Create a new service around an existing backend
    ///
    /// Validates the configuration, initializes the backend and wires the
    /// channels. Any failure here aborts startup.
    pub fn with_backend(
        config: StorageConfig,
        registry: TypeRegistry,
        mut backend: Box<dyn StorageBackend>,
    ) -> Result<(Self, StorageClient)> {
        config.validate()?;

        if registry.len() > config.max_types {
            return Err(StorageError::Config(format!(
                "{} types registered but max_types is {}",
                registry.len(),
                config.max_types
            )));
        }

        let max_record_size = registry.max_record_size();
        if config.batch_buffer_size < FRAME_HEADER_LEN + max_record_size {
            return Err(StorageError::Config(format!(
                "batch_buffer_size {} cannot hold a {} byte record frame",
                config.batch_buffer_size,
                FRAME_HEADER_LEN + max_record_size
            )));
        }

        backend
            .init(&registry)
            .with_context(|| format!("Failed to initialize {} backend", backend.name()))?;

        let registry = Arc::new(registry);
        let pipe = Arc::new(BatchPipe::new(config.batch_buffer_size, max_record_size));
        let active_session = Arc::new(AtomicU32::new(0));
        let running = Arc::new(AtomicBool::new(true));

        let (inbound_tx, inbound_rx) = bounded(INBOUND_CHANNEL_CAPACITY);
        let (reply_tx, reply_rx) = bounded(REPLY_CHANNEL_CAPACITY);
        let (data_tx, data_rx) = bounded(DATA_CHANNEL_CAPACITY);
        let (supervisor_tx, supervisor_rx) = bounded(SUPERVISOR_CHANNEL_CAPACITY);

        let client = StorageClient {
            inbound_tx,
            reply_rx,
            data_rx,
            supervisor_rx,
            batch_reader: BatchReader::new(Arc::clone(&pipe), Arc::clone(&active_session)),
            registry: Arc::clone(&registry),
            running: Arc::clone(&running),
        };

        let thread_name = config.worker.thread_name.clone();
        let stack_size = config.worker.stack_size;
        let worker = StorageWorker::new(
            config,
            registry,
            backend,
            pipe,
            active_session,
            worker::WorkerChannels {
                inbound_rx,
                reply_tx,
                data_tx,
                supervisor_tx,
            },
            running,
        );

        Ok((
            Self {
                worker,
                thread_name,
                stack_size,
            },
            client,
        ))
    }

    /// Run the worker loop on the calling thread until shutdown
    pub fn run(mut self) {
        self.worker.run();
    }

    /// Run the worker loop on a dedicated thread
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let name = self.thread_name.clone();
        std::thread::Builder::new()
            .name(self.thread_name.clone())
            .stack_size(self.stack_size)
            .spawn(move || self.run())
            .with_context(|| format!("Failed to spawn storage thread {}", name))
    }
}

/// Handle for talking to a running engine
///
/// Replies are delivered in request order on a single channel. Clones share
/// that channel, so concurrent requesters should each wait for their reply
/// before the next request.
#[derive(Clone)]
pub struct StorageClient {
    inbound_tx: Sender<Inbound>,
    reply_rx: Receiver<ControlReply>,
    data_rx: Receiver<DataMessage>,
    supervisor_rx: Receiver<SupervisorEvent>,
    batch_reader: BatchReader,
    registry: Arc<TypeRegistry>,
    running: Arc<AtomicBool>,
}

impl StorageClient {
    fn send_inbound(&self, msg: Inbound) -> Result<()> {
        self.inbound_tx
            .send(msg)
            .map_err(|_| StorageError::Channel("storage worker is not running".to_string()))
    }

    /// Send a control request without waiting for the reply
    pub fn send(&self, request: ControlRequest) -> Result<()> {
        self.send_inbound(Inbound::Control(request))
    }

    /// Publish a producer message
    pub fn publish(&self, message: ProducerMessage) -> Result<()> {
        self.send_inbound(Inbound::Sample(message))
    }

    /// Wait for the next reply
    pub fn recv_reply(&self, timeout: Duration) -> Result<ControlReply> {
        self.reply_rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => {
                StorageError::Timeout(format!("no reply within {} ms", timeout.as_millis()))
            }
            RecvTimeoutError::Disconnected => {
                StorageError::Channel("storage worker is not running".to_string())
            }
        })
    }

    /// Send a control request and wait for its reply
    pub fn request(&self, request: ControlRequest, timeout: Duration) -> Result<ControlReply> {
        self.send(request)?;
        self.recv_reply(timeout)
    }

    /// Request a mode change
    pub fn set_mode(&self, mode: StorageMode, timeout: Duration) -> Result<ControlReply> {
        let request = match mode {
            StorageMode::Passthrough => ControlRequest::ModePassthrough,
            StorageMode::Buffer => ControlRequest::ModeBuffer,
        };
        self.request(request, timeout)
    }

    /// Open or refill a batch session
    pub fn request_batch(&self, session_id: u32, timeout: Duration) -> Result<ControlReply> {
        self.request(ControlRequest::BatchRequest { session_id }, timeout)
    }

    /// Close a batch session
    pub fn close_batch(&self, session_id: u32, timeout: Duration) -> Result<ControlReply> {
        self.request(ControlRequest::BatchClose { session_id }, timeout)
    }

    /// Fetch a statistics snapshot
    pub fn stats(&self, timeout: Duration) -> Result<StorageStats> {
        match self.request(ControlRequest::Stats, timeout)? {
            ControlReply::Stats(stats) => Ok(stats),
            ControlReply::Failed { error, .. } => Err(StorageError::Channel(error)),
            other => Err(StorageError::Channel(format!(
                "unexpected reply to stats request: {:?}",
                other
            ))),
        }
    }

    /// Data channel receiver
    pub fn data(&self) -> &Receiver<DataMessage> {
        &self.data_rx
    }

    /// Take every data message currently queued
    pub fn drain_data(&self) -> Vec<DataMessage> {
        self.data_rx.try_iter().collect()
    }

    /// Supervisor channel receiver
    pub fn supervisor(&self) -> &Receiver<SupervisorEvent> {
        &self.supervisor_rx
    }

    /// Reader for batch frames
    pub fn batch_reader(&self) -> BatchReader {
        self.batch_reader.clone()
    }

    /// Registry the engine was started with
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Whether the worker loop is still running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the worker to stop
    pub fn shutdown(&self) {
        let _ = self.inbound_tx.send(Inbound::Shutdown);
    }
}
