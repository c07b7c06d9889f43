//! Test data builders for creating engine configurations and samples

use std::path::Path;
use telemetry_store::config::{BackendKind, StorageConfig};
use telemetry_store::sources::{BatterySample, LocationSample, NetworkQualitySample};
use telemetry_store::types::StorageMode;
use telemetry_store::ProducerMessage;

/// Builder for creating test configurations
pub struct ConfigBuilder {
    config: StorageConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = StorageConfig::default();
        config.worker.thread_name = "storage-test".to_string();
        config.worker.liveness_timeout_ms = 200;
        config.worker.max_message_processing_ms = 100;
        config.worker.publish_timeout_ms = 100;
        Self { config }
    }

    pub fn mode(mut self, mode: StorageMode) -> Self {
        self.config.initial_mode = mode;
        self
    }

    pub fn records_per_type(mut self, records: usize) -> Self {
        self.config.max_records_per_type = records;
        self
    }

    pub fn batch_buffer(mut self, bytes: usize) -> Self {
        self.config.batch_buffer_size = bytes;
        self
    }

    pub fn circular_log(mut self, root: &Path, block_size: usize, block_count: usize) -> Self {
        self.config.backend.kind = BackendKind::CircularLog;
        self.config.backend.log.root = root.to_path_buf();
        self.config.backend.log.block_size = block_size;
        self.config.backend.log.block_count = block_count;
        self.config.backend.log.sync_writes = false;
        self
    }

    pub fn build(self) -> StorageConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Battery sample message with the given percentage
pub fn battery(percentage: f64) -> ProducerMessage {
    BatterySample { percentage }.to_message()
}

/// Location fix message
pub fn location(n: i64) -> ProducerMessage {
    LocationSample {
        latitude: 59.9,
        longitude: 10.7,
        accuracy: 5.0,
        timestamp_ms: n,
    }
    .to_message()
}

/// Network quality message
pub fn network(rsrp: i32) -> ProducerMessage {
    NetworkQualitySample { rsrp, snr: 10 }.to_message()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .mode(StorageMode::Buffer)
            .records_per_type(5)
            .batch_buffer(64)
            .build();

        assert_eq!(config.initial_mode, StorageMode::Buffer);
        assert_eq!(config.max_records_per_type, 5);
        assert_eq!(config.batch_buffer_size, 64);
        assert!(config.validate().is_ok());
    }
}
