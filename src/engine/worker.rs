//! Storage worker loop
//!
//! The worker owns all engine state and processes one inbound message at a
//! time, to completion. Between messages it waits on the inbound channel for
//! at most `liveness_timeout - max_message_processing_time`, so a heartbeat is
//! emitted often enough for the supervisor.

use super::state::{transition_path, Level, Outcome, StorageState};
use super::{
    BatchErrorReason, BusyReason, ControlReply, ControlRequest, DataMessage, Inbound,
    RejectReason, SupervisorEvent,
};
use crate::backend::StorageBackend;
use crate::batch::{BatchPipe, BatchSession, PopulateOutcome};
use crate::config::StorageConfig;
use crate::error::{Result, StorageError};
use crate::registry::{ProducerMessage, TypeRegistry};
use crate::types::{StorageMode, StorageStats, TypeStats};
use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Channel ends owned by the worker
pub struct WorkerChannels {
    pub inbound_rx: Receiver<Inbound>,
    pub reply_tx: Sender<ControlReply>,
    pub data_tx: Sender<DataMessage>,
    pub supervisor_tx: Sender<SupervisorEvent>,
}

/// Event offered to the state levels
#[derive(Debug, Clone, Copy)]
enum Event<'a> {
    Control(ControlRequest),
    Sample(&'a ProducerMessage),
}

/// The engine's worker
pub struct StorageWorker {
    config: StorageConfig,
    registry: Arc<TypeRegistry>,
    backend: Box<dyn StorageBackend>,
    state: StorageState,
    pipe: Arc<BatchPipe>,
    active_session: Arc<AtomicU32>,
    channels: WorkerChannels,
    running: Arc<AtomicBool>,
}

impl StorageWorker {
    /// Create a new worker around an initialized backend
    pub fn new(
        config: StorageConfig,
        registry: Arc<TypeRegistry>,
        backend: Box<dyn StorageBackend>,
        pipe: Arc<BatchPipe>,
        active_session: Arc<AtomicU32>,
        channels: WorkerChannels,
        running: Arc<AtomicBool>,
    ) -> Self {
        let state = StorageState::initial(config.initial_mode);
        Self {
            config,
            registry,
            backend,
            state,
            pipe,
            active_session,
            channels,
            running,
        }
    }

    /// Current state
    pub fn state(&self) -> &StorageState {
        &self.state
    }

    /// Run the main worker loop
    pub fn run(&mut self) {
        info!(
            "Storage worker started: backend={}, state={}",
            self.backend.name(),
            self.state.name()
        );
        for level in self.state.leaf().path_from_root() {
            self.enter(level);
        }

        let wait = self.config.worker.message_wait();
        let budget = self.config.worker.max_message_processing();

        while self.running.load(Ordering::SeqCst) {
            self.heartbeat();

            match self.channels.inbound_rx.recv_timeout(wait) {
                Ok(Inbound::Shutdown) => {
                    info!("Storage worker shutdown requested");
                    break;
                }
                Ok(msg) => {
                    let started = Instant::now();
                    self.handle_inbound(msg);
                    let elapsed = started.elapsed();
                    if elapsed > budget {
                        warn!(
                            "Message processing took {} ms, budget is {} ms",
                            elapsed.as_millis(),
                            budget.as_millis()
                        );
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("All storage clients dropped");
                    break;
                }
            }
        }

        // Leave the state tree so an open session is torn down
        for level in self.state.leaf().chain() {
            self.exit(level);
        }
        self.running.store(false, Ordering::SeqCst);
        info!("Storage worker stopped");
    }

    fn heartbeat(&self) {
        match self.channels.supervisor_tx.try_send(SupervisorEvent::Heartbeat) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                debug!("Supervisor channel closed, heartbeat not delivered");
            }
        }
    }

    /// Handle a single inbound message
    fn handle_inbound(&mut self, msg: Inbound) {
        match msg {
            Inbound::Control(request) => {
                debug!("Control request {:?} in {}", request, self.state.name());
                self.dispatch(Event::Control(request));
            }
            Inbound::Sample(sample) => self.dispatch(Event::Sample(&sample)),
            Inbound::Shutdown => {}
        }
    }

    /// Offer an event to each level from the leaf up
    fn dispatch(&mut self, event: Event<'_>) {
        for level in self.state.leaf().chain() {
            match self.handle_at(level, event) {
                Outcome::Handled { next, reply } => {
                    if let Some(next) = next {
                        self.transition(next);
                    }
                    if let Some(reply) = reply {
                        self.reply(reply);
                    }
                    return;
                }
                Outcome::Propagate => {}
            }
        }
        debug!("Unhandled event {:?} in {}", event, self.state.name());
    }

    fn transition(&mut self, next: StorageState) {
        let path = transition_path(self.state.leaf(), next.leaf());
        for level in &path.exits {
            self.exit(*level);
        }
        if self.state.leaf() != next.leaf() {
            info!("{} -> {}", self.state.name(), next.name());
        }
        self.state = next;
        for level in &path.entries {
            self.enter(*level);
        }
    }

    fn enter(&mut self, level: Level) {
        match level {
            Level::Passthrough => info!("Passthrough mode: records are forwarded"),
            Level::Buffer => info!("Buffer mode: records are stored in {}", self.backend.name()),
            Level::BufferPipeActive => {
                if let Some(session) = self.state.session() {
                    self.active_session
                        .store(session.session_id, Ordering::Release);
                    info!("Batch session 0x{:X} opened", session.session_id);
                }
            }
            Level::Running | Level::BufferIdle => {}
        }
    }

    fn exit(&mut self, level: Level) {
        if level == Level::BufferPipeActive {
            let dropped = self.pipe.drain();
            self.active_session.store(0, Ordering::Release);
            if let Some(session) = self.state.session() {
                info!(
                    "Batch session 0x{:X} closed: {} items sent, {} unread bytes discarded",
                    session.session_id, session.items_sent, dropped
                );
            }
        }
    }

    fn handle_at(&mut self, level: Level, event: Event<'_>) -> Outcome {
        match level {
            Level::Running => self.running_level(event),
            Level::Passthrough => self.passthrough_level(event),
            Level::Buffer => self.buffer_level(event),
            Level::BufferIdle => self.buffer_idle_level(event),
            Level::BufferPipeActive => self.pipe_active_level(event),
        }
    }

    // ==================== Levels ====================

    fn running_level(&mut self, event: Event<'_>) -> Outcome {
        let Event::Control(request) = event else {
            return Outcome::consumed();
        };

        match request {
            ControlRequest::Clear => match self.backend.clear() {
                Ok(()) => {
                    info!("Storage cleared");
                    Outcome::reply(ControlReply::Cleared)
                }
                Err(e) => Outcome::reply(self.failed("clear", e)),
            },
            ControlRequest::Flush => match self.flush() {
                Ok(records) => {
                    info!("Flushed {} records", records);
                    Outcome::reply(ControlReply::Flushed { records })
                }
                Err(e) => Outcome::reply(self.failed("flush", e)),
            },
            ControlRequest::Stats => match self.stats() {
                Ok(stats) => {
                    self.log_stats(&stats);
                    Outcome::reply(ControlReply::Stats(stats))
                }
                Err(e) => Outcome::reply(self.failed("stats", e)),
            },
            ControlRequest::BatchRequest { session_id } => {
                debug!("Batch request 0x{:X} outside buffer mode", session_id);
                Outcome::reply(ControlReply::BatchError {
                    session_id,
                    reason: BatchErrorReason::NotInBufferMode,
                })
            }
            ControlRequest::BatchClose { session_id } => {
                if session_id == 0 {
                    Outcome::reply(ControlReply::BatchError {
                        session_id,
                        reason: BatchErrorReason::InvalidSessionId,
                    })
                } else {
                    debug!("Close of 0x{:X} with no open session", session_id);
                    Outcome::reply(ControlReply::BatchClosed { session_id })
                }
            }
            ControlRequest::ModePassthrough | ControlRequest::ModeBuffer => {
                Outcome::Propagate
            }
        }
    }

    fn passthrough_level(&mut self, event: Event<'_>) -> Outcome {
        match event {
            Event::Sample(sample) => {
                self.forward(sample);
                Outcome::consumed()
            }
            Event::Control(ControlRequest::ModePassthrough) => {
                Outcome::reply(ControlReply::ModeConfirmed(StorageMode::Passthrough))
            }
            Event::Control(ControlRequest::ModeBuffer) => Outcome::transition(
                StorageState::BufferIdle,
                ControlReply::ModeConfirmed(StorageMode::Buffer),
            ),
            Event::Control(_) => Outcome::Propagate,
        }
    }

    fn buffer_level(&mut self, event: Event<'_>) -> Outcome {
        match event {
            Event::Sample(sample) => {
                self.store(sample);
                Outcome::consumed()
            }
            Event::Control(ControlRequest::ModeBuffer) => {
                Outcome::reply(ControlReply::ModeConfirmed(StorageMode::Buffer))
            }
            Event::Control(ControlRequest::ModePassthrough) => Outcome::transition(
                StorageState::Passthrough,
                ControlReply::ModeConfirmed(StorageMode::Passthrough),
            ),
            Event::Control(_) => Outcome::Propagate,
        }
    }

    fn buffer_idle_level(&mut self, event: Event<'_>) -> Outcome {
        let Event::Control(ControlRequest::BatchRequest { session_id }) = event else {
            return Outcome::Propagate;
        };

        let mut session = match BatchSession::new(session_id) {
            Ok(session) => session,
            Err(_) => {
                warn!("Rejected batch request with session id 0");
                return Outcome::reply(ControlReply::BatchError {
                    session_id,
                    reason: BatchErrorReason::InvalidSessionId,
                });
            }
        };

        match self.populate(&mut session) {
            Ok(PopulateOutcome::Empty) => {
                debug!("Batch request 0x{:X}: nothing stored", session_id);
                Outcome::reply(ControlReply::BatchEmpty { session_id })
            }
            Ok(PopulateOutcome::Available { items, more_data }) => Outcome::transition(
                StorageState::BufferPipeActive(session),
                ControlReply::BatchAvailable {
                    session_id,
                    items,
                    more_data,
                },
            ),
            Err(e) => {
                // Frames already queued would otherwise linger without a session
                self.pipe.drain();
                Outcome::reply(self.batch_failed(session_id, e))
            }
        }
    }

    fn pipe_active_level(&mut self, event: Event<'_>) -> Outcome {
        let Event::Control(request) = event else {
            return Outcome::Propagate;
        };
        let Some(active) = self.state.session().cloned() else {
            return Outcome::Propagate;
        };

        match request {
            ControlRequest::ModePassthrough => {
                warn!(
                    "Mode change rejected, batch session 0x{:X} is open",
                    active.session_id
                );
                Outcome::reply(ControlReply::ModeChangeRejected {
                    requested: StorageMode::Passthrough,
                    reason: RejectReason::BatchActive,
                })
            }
            ControlRequest::Clear => {
                warn!(
                    "Clear rejected, batch session 0x{:X} is open",
                    active.session_id
                );
                Outcome::reply(ControlReply::ClearRejected {
                    reason: RejectReason::BatchActive,
                })
            }
            ControlRequest::BatchRequest { session_id } => self.refill(active, session_id),
            ControlRequest::BatchClose { session_id } => {
                if session_id == 0 {
                    Outcome::reply(ControlReply::BatchError {
                        session_id,
                        reason: BatchErrorReason::InvalidSessionId,
                    })
                } else if session_id != active.session_id {
                    warn!(
                        "Close of 0x{:X} rejected, open session is 0x{:X}",
                        session_id, active.session_id
                    );
                    Outcome::reply(ControlReply::BatchError {
                        session_id,
                        reason: BatchErrorReason::SessionMismatch,
                    })
                } else {
                    Outcome::transition(
                        StorageState::BufferIdle,
                        ControlReply::BatchClosed { session_id },
                    )
                }
            }
            _ => Outcome::Propagate,
        }
    }

    fn refill(&mut self, mut session: BatchSession, session_id: u32) -> Outcome {
        if session_id == 0 {
            return Outcome::reply(ControlReply::BatchError {
                session_id,
                reason: BatchErrorReason::InvalidSessionId,
            });
        }
        if session_id != session.session_id {
            debug!(
                "Batch request 0x{:X} busy, session 0x{:X} is open",
                session_id, session.session_id
            );
            return Outcome::reply(ControlReply::BatchBusy {
                session_id,
                reason: BusyReason::OtherSession {
                    active: session.session_id,
                },
            });
        }
        if !self.pipe.is_empty() {
            debug!(
                "Refill of 0x{:X} deferred, {} unread bytes",
                session_id,
                self.pipe.len()
            );
            return Outcome::reply(ControlReply::BatchBusy {
                session_id,
                reason: BusyReason::UnreadData,
            });
        }

        match self.populate(&mut session) {
            Ok(PopulateOutcome::Empty) => {
                // Keep the session open; the consumer still closes it
                Outcome::transition(
                    StorageState::BufferPipeActive(session),
                    ControlReply::BatchEmpty { session_id },
                )
            }
            Ok(PopulateOutcome::Available { items, more_data }) => Outcome::transition(
                StorageState::BufferPipeActive(session),
                ControlReply::BatchAvailable {
                    session_id,
                    items,
                    more_data,
                },
            ),
            Err(e) => Outcome::reply(self.batch_failed(session_id, e)),
        }
    }

    // ==================== Operations ====================

    fn populate(&mut self, session: &mut BatchSession) -> Result<PopulateOutcome> {
        session.populate(
            self.backend.as_mut(),
            &self.registry,
            &self.pipe,
            self.config.worker.batch_write_timeout(),
        )
    }

    /// Forward every record extracted from a sample
    fn forward(&mut self, sample: &ProducerMessage) {
        let registry = Arc::clone(&self.registry);
        for ty in registry.by_channel(sample.channel) {
            if let Some(record) = ty.extract(&sample.payload) {
                debug!("Forwarding {} record ({} bytes)", ty.name, record.len());
                if let Err(e) = self.publish(DataMessage {
                    data_type: ty.id,
                    payload: record,
                }) {
                    warn!("Dropped {} record: {}", ty.name, e);
                }
            }
        }
    }

    /// Store every record extracted from a sample
    fn store(&mut self, sample: &ProducerMessage) {
        let registry = Arc::clone(&self.registry);
        for ty in registry.by_channel(sample.channel) {
            let Some(record) = ty.extract(&sample.payload) else {
                continue;
            };
            match self.backend.store(ty, &record) {
                Ok(()) => debug!("Stored {} record", ty.name),
                Err(e) if e.is_fatal() => self.escalate(&e),
                Err(e) => warn!("Failed to store {} record: {}", ty.name, e),
            }
        }
    }

    /// Publish every stored record, oldest first per type
    ///
    /// A record leaves the backend only after it was delivered. The first
    /// failed delivery stops the flush and leaves the rest stored.
    fn flush(&mut self) -> Result<usize> {
        let registry = Arc::clone(&self.registry);
        let mut buf = vec![0u8; registry.max_record_size()];
        let mut records = 0;

        for ty in registry.iter() {
            loop {
                let len = match self.backend.peek(ty, Some(&mut buf)) {
                    Ok(len) => len,
                    Err(e) if e.is_transient() => break,
                    Err(e) => return Err(e),
                };
                let msg = DataMessage {
                    data_type: ty.id,
                    payload: buf[..len].to_vec(),
                };
                if let Err(e) = self.publish(msg) {
                    return Err(e.with_context(format!(
                        "flush stopped after {} records at {}",
                        records, ty.name
                    )));
                }
                self.backend.retrieve(ty, &mut buf)?;
                records += 1;
            }
        }
        Ok(records)
    }

    fn stats(&self) -> Result<StorageStats> {
        let mut types = Vec::with_capacity(self.registry.len());
        for ty in self.registry.iter() {
            types.push(TypeStats {
                id: ty.id,
                name: ty.name.clone(),
                record_size: ty.record_size,
                count: self.backend.count(ty)?,
            });
        }

        Ok(StorageStats {
            backend: self.backend.name().to_string(),
            state: self.state.name().to_string(),
            total_records: types.iter().map(|t| t.count).sum(),
            types,
            max_records_per_type: self.config.max_records_per_type,
            active_session: self.state.session().map(|s| s.session_id),
            generated_at: Utc::now(),
        })
    }

    fn log_stats(&self, stats: &StorageStats) {
        info!(
            "Storage stats: backend={}, state={}, total={} records",
            stats.backend, stats.state, stats.total_records
        );
        for ty in &stats.types {
            info!(
                "  {} {}: {}/{} records of {} bytes",
                ty.id, ty.name, ty.count, stats.max_records_per_type, ty.record_size
            );
        }
        if let Some(session) = stats.active_session {
            info!("  batch session 0x{:X} open", session);
        }
    }

    // ==================== Outbound ====================

    fn publish(&self, msg: DataMessage) -> Result<()> {
        let timeout = self.config.worker.publish_timeout();
        match self.channels.data_tx.send_timeout(msg, timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(msg)) => Err(StorageError::Timeout(format!(
                "data channel full, {} record of {} bytes not delivered",
                msg.data_type,
                msg.payload_len()
            ))),
            Err(SendTimeoutError::Disconnected(_)) => {
                Err(StorageError::Channel("data channel closed".to_string()))
            }
        }
    }

    fn reply(&self, reply: ControlReply) {
        let timeout = self.config.worker.publish_timeout();
        if let Err(e) = self.channels.reply_tx.send_timeout(reply, timeout) {
            warn!("Failed to deliver reply: {:?}", e.into_inner());
        }
    }

    fn escalate(&self, err: &StorageError) {
        error!("Fatal storage error: {}", err);
        let event = SupervisorEvent::Fatal {
            reason: err.to_string(),
        };
        let timeout = self.config.worker.publish_timeout();
        if self.channels.supervisor_tx.send_timeout(event, timeout).is_err() {
            error!("Supervisor channel unavailable, fatal error not delivered");
        }
    }

    fn failed(&self, operation: &str, err: StorageError) -> ControlReply {
        if err.is_fatal() {
            self.escalate(&err);
        } else {
            warn!("{} failed: {}", operation, err);
        }
        ControlReply::Failed {
            operation: operation.to_string(),
            error: err.to_string(),
        }
    }

    fn batch_failed(&self, session_id: u32, err: StorageError) -> ControlReply {
        if err.is_fatal() {
            self.escalate(&err);
        } else {
            warn!("Batch 0x{:X} failed: {}", session_id, err);
        }
        ControlReply::BatchError {
            session_id,
            reason: BatchErrorReason::Storage(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RamBackend;
    use crate::sources::{standard_registry, BatterySample};
    use crossbeam_channel::bounded;

    struct Harness {
        worker: StorageWorker,
        reply_rx: Receiver<ControlReply>,
        data_rx: Receiver<DataMessage>,
        active_session: Arc<AtomicU32>,
        pipe: Arc<BatchPipe>,
        _inbound_tx: Sender<Inbound>,
        _supervisor_rx: Receiver<SupervisorEvent>,
    }

    fn harness(mode: StorageMode, batch_buffer_size: usize) -> Harness {
        let config = StorageConfig {
            initial_mode: mode,
            max_records_per_type: 4,
            batch_buffer_size,
            ..StorageConfig::default()
        };
        let registry = standard_registry(4).unwrap();
        let mut backend = RamBackend::new(config.max_records_per_type);
        backend.init(&registry).unwrap();

        let pipe = Arc::new(BatchPipe::new(batch_buffer_size, registry.max_record_size()));
        let active_session = Arc::new(AtomicU32::new(0));
        let (inbound_tx, inbound_rx) = bounded(8);
        let (reply_tx, reply_rx) = bounded(8);
        let (data_tx, data_rx) = bounded(64);
        let (supervisor_tx, supervisor_rx) = bounded(8);

        let worker = StorageWorker::new(
            config,
            Arc::new(registry),
            Box::new(backend),
            Arc::clone(&pipe),
            Arc::clone(&active_session),
            WorkerChannels {
                inbound_rx,
                reply_tx,
                data_tx,
                supervisor_tx,
            },
            Arc::new(AtomicBool::new(true)),
        );

        Harness {
            worker,
            reply_rx,
            data_rx,
            active_session,
            pipe,
            _inbound_tx: inbound_tx,
            _supervisor_rx: supervisor_rx,
        }
    }

    impl Harness {
        fn control(&mut self, request: ControlRequest) -> ControlReply {
            self.worker.handle_inbound(Inbound::Control(request));
            self.reply_rx.try_recv().unwrap()
        }

        fn sample(&mut self, percentage: f64) {
            let msg = BatterySample { percentage }.to_message();
            self.worker.handle_inbound(Inbound::Sample(msg));
        }
    }

    #[test]
    fn test_passthrough_forwards_one_message() {
        let mut h = harness(StorageMode::Passthrough, 256);
        h.sample(55.0);

        let msg = h.data_rx.try_recv().unwrap();
        assert_eq!(msg.payload_len(), 8);
        assert!(h.data_rx.try_recv().is_err());

        match h.control(ControlRequest::Stats) {
            ControlReply::Stats(stats) => assert_eq!(stats.total_records, 0),
            other => panic!("expected stats, got {:?}", other),
        }
    }

    #[test]
    fn test_mode_round_trip() {
        let mut h = harness(StorageMode::Passthrough, 256);
        assert!(matches!(
            h.control(ControlRequest::ModeBuffer),
            ControlReply::ModeConfirmed(StorageMode::Buffer)
        ));
        assert_eq!(h.worker.state(), &StorageState::BufferIdle);
        assert!(matches!(
            h.control(ControlRequest::ModeBuffer),
            ControlReply::ModeConfirmed(StorageMode::Buffer)
        ));
        assert!(matches!(
            h.control(ControlRequest::ModePassthrough),
            ControlReply::ModeConfirmed(StorageMode::Passthrough)
        ));
        assert_eq!(h.worker.state(), &StorageState::Passthrough);
    }

    #[test]
    fn test_batch_zero_id_rejected_without_transition() {
        let mut h = harness(StorageMode::Buffer, 256);
        h.sample(10.0);
        let reply = h.control(ControlRequest::BatchRequest { session_id: 0 });
        assert!(matches!(
            reply,
            ControlReply::BatchError {
                reason: BatchErrorReason::InvalidSessionId,
                ..
            }
        ));
        assert_eq!(h.worker.state(), &StorageState::BufferIdle);
    }

    #[test]
    fn test_batch_lifecycle_sets_and_clears_session() {
        let mut h = harness(StorageMode::Buffer, 256);
        h.sample(10.0);
        h.sample(20.0);

        let reply = h.control(ControlRequest::BatchRequest { session_id: 0xAA });
        assert!(matches!(
            reply,
            ControlReply::BatchAvailable {
                session_id: 0xAA,
                items: 2,
                more_data: false
            }
        ));
        assert_eq!(h.active_session.load(Ordering::Acquire), 0xAA);

        assert!(matches!(
            h.control(ControlRequest::Clear),
            ControlReply::ClearRejected {
                reason: RejectReason::BatchActive
            }
        ));
        assert!(matches!(
            h.control(ControlRequest::ModePassthrough),
            ControlReply::ModeChangeRejected { .. }
        ));
        assert!(matches!(
            h.control(ControlRequest::BatchRequest { session_id: 0xBB }),
            ControlReply::BatchBusy {
                reason: BusyReason::OtherSession { active: 0xAA },
                ..
            }
        ));
        assert!(matches!(
            h.control(ControlRequest::BatchClose { session_id: 0xBB }),
            ControlReply::BatchError {
                reason: BatchErrorReason::SessionMismatch,
                ..
            }
        ));

        assert!(matches!(
            h.control(ControlRequest::BatchClose { session_id: 0xAA }),
            ControlReply::BatchClosed { session_id: 0xAA }
        ));
        assert_eq!(h.active_session.load(Ordering::Acquire), 0);
        assert!(h.pipe.is_empty());
        assert_eq!(h.worker.state(), &StorageState::BufferIdle);
    }

    #[test]
    fn test_empty_batch_stays_idle() {
        let mut h = harness(StorageMode::Buffer, 256);
        assert!(matches!(
            h.control(ControlRequest::BatchRequest { session_id: 3 }),
            ControlReply::BatchEmpty { session_id: 3 }
        ));
        assert_eq!(h.worker.state(), &StorageState::BufferIdle);
    }

    #[test]
    fn test_batch_in_passthrough_and_idle_close() {
        let mut h = harness(StorageMode::Passthrough, 256);
        assert!(matches!(
            h.control(ControlRequest::BatchRequest { session_id: 1 }),
            ControlReply::BatchError {
                reason: BatchErrorReason::NotInBufferMode,
                ..
            }
        ));
        assert!(matches!(
            h.control(ControlRequest::BatchClose { session_id: 1 }),
            ControlReply::BatchClosed { session_id: 1 }
        ));
        assert!(matches!(
            h.control(ControlRequest::BatchClose { session_id: 0 }),
            ControlReply::BatchError {
                reason: BatchErrorReason::InvalidSessionId,
                ..
            }
        ));
    }

    #[test]
    fn test_flush_publishes_oldest_first() {
        let mut h = harness(StorageMode::Buffer, 256);
        h.sample(1.0);
        h.sample(2.0);
        h.sample(3.0);

        assert!(matches!(
            h.control(ControlRequest::Flush),
            ControlReply::Flushed { records: 3 }
        ));
        let values: Vec<f64> = h
            .data_rx
            .try_iter()
            .filter_map(|m| BatterySample::from_record(&m.payload))
            .map(|s| s.percentage)
            .collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_refill_requires_drained_pipe() {
        // Room for three 11-byte battery frames
        let mut h = harness(StorageMode::Buffer, 35);
        h.sample(1.0);
        h.sample(2.0);
        h.sample(3.0);
        h.sample(4.0);

        assert!(matches!(
            h.control(ControlRequest::BatchRequest { session_id: 9 }),
            ControlReply::BatchAvailable {
                items: 3,
                more_data: true,
                ..
            }
        ));
        assert!(matches!(
            h.control(ControlRequest::BatchRequest { session_id: 9 }),
            ControlReply::BatchBusy {
                reason: BusyReason::UnreadData,
                ..
            }
        ));

        h.pipe.drain();
        assert!(matches!(
            h.control(ControlRequest::BatchRequest { session_id: 9 }),
            ControlReply::BatchAvailable {
                session_id: 9,
                items: 1,
                more_data: false
            }
        ));
        let Some(session) = h.worker.state().session() else {
            panic!("session should stay open");
        };
        assert_eq!(session.items_sent, 4);
    }
}
