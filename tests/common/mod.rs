//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use std::thread::JoinHandle;
use std::time::Duration;
use telemetry_store::{StorageClient, SupervisorEvent};

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_millis(500)
}

/// Short timeout for reads that are expected to find nothing
pub fn idle_timeout() -> Duration {
    Duration::from_millis(50)
}

/// Stop the worker and wait for its thread
pub fn shutdown(client: StorageClient, handle: JoinHandle<()>) {
    client.shutdown();
    handle.join().expect("storage worker should exit cleanly");
}

/// Wait until the worker has processed everything sent so far
///
/// Messages are handled in order, so the reply to a stats request arrives only
/// after every earlier sample was handled.
pub fn sync(client: &StorageClient) {
    client
        .stats(test_timeout())
        .expect("stats request should be answered");
}

/// Fatal reasons reported to the supervisor so far
pub fn fatal_events(client: &StorageClient) -> Vec<String> {
    client
        .supervisor()
        .try_iter()
        .filter_map(|event| match event {
            SupervisorEvent::Fatal { reason } => Some(reason),
            SupervisorEvent::Heartbeat => None,
        })
        .collect()
}
