//! # telemetry-store: On-device Telemetry Storage Engine
//!
//! A storage engine for a battery-powered tracker. Producer components publish
//! typed samples; the engine either forwards them at once ("passthrough") or
//! keeps them for later bulk retrieval ("buffer").
//!
//! ## Architecture
//!
//! - **Registry**: Record types `{id, name, size, source}` fixed at startup
//! - **Backends**: RAM ring buffers or persistent circular-log files behind one trait
//! - **Batch**: Bounded pipe of length-framed records for one retrieval session
//! - **Engine**: Worker thread running the hierarchical mode state machine
//! - **Communication**: Crossbeam channels between the worker and everyone else
//!
//! ## Configuration
//!
//! Settings are read from a TOML file; see [`config::StorageConfig`]. The
//! circular-log backend stores its files under `dev.telemetry-store` in the
//! platform data directory unless configured otherwise.
//!
//! ## Example
//!
//! ```ignore
//! use telemetry_store::{
//!     config::StorageConfig,
//!     engine::{ControlReply, StorageService},
//!     sources::{standard_registry, BatterySample},
//!     types::StorageMode,
//! };
//!
//! let config = StorageConfig::default();
//! let registry = standard_registry(config.max_types)?;
//! let (service, client) = StorageService::new(config, registry)?;
//! let handle = service.spawn()?;
//!
//! client.set_mode(StorageMode::Buffer, timeout)?;
//! client.publish(BatterySample { percentage: 92.0 }.to_message())?;
//!
//! if let ControlReply::BatchAvailable { items, .. } = client.request_batch(0x42, timeout)? {
//!     let reader = client.batch_reader();
//!     for _ in 0..items {
//!         let item = reader.read_next(timeout)?;
//!     }
//!     client.close_batch(0x42, timeout)?;
//! }
//! ```

pub mod backend;
pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod sources;
pub mod types;

// Re-export commonly used types
pub use backend::{CircularLogBackend, RamBackend, StorageBackend};
pub use batch::{BatchItem, BatchReader};
pub use config::StorageConfig;
pub use engine::{
    ControlReply, ControlRequest, DataMessage, StorageClient, StorageService, SupervisorEvent,
};
pub use error::{Result, StorageError};
pub use registry::{ChannelId, ProducerMessage, TypeDescriptor, TypeRegistry};
pub use types::{StorageMode, StorageStats, TypeId};
