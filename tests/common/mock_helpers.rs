//! Mock construction helpers

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use telemetry_store::backend::{RamBackend, StorageBackend};
use telemetry_store::{Result, StorageError, TypeDescriptor, TypeRegistry};

/// RAM backend whose medium can be made to fail on demand
pub struct FailingBackend {
    inner: RamBackend,
    failing: Arc<AtomicBool>,
}

impl FailingBackend {
    /// Create a backend and the switch that breaks it
    pub fn new(records_per_type: usize) -> (Self, Arc<AtomicBool>) {
        let failing = Arc::new(AtomicBool::new(false));
        (
            Self {
                inner: RamBackend::new(records_per_type),
                failing: Arc::clone(&failing),
            },
            failing,
        )
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "flash write failed",
            )));
        }
        Ok(())
    }
}

impl StorageBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn init(&mut self, registry: &TypeRegistry) -> Result<()> {
        self.inner.init(registry)
    }

    fn store(&mut self, ty: &TypeDescriptor, record: &[u8]) -> Result<()> {
        self.check()?;
        self.inner.store(ty, record)
    }

    fn peek(&self, ty: &TypeDescriptor, buf: Option<&mut [u8]>) -> Result<usize> {
        self.check()?;
        self.inner.peek(ty, buf)
    }

    fn retrieve(&mut self, ty: &TypeDescriptor, buf: &mut [u8]) -> Result<usize> {
        self.check()?;
        self.inner.retrieve(ty, buf)
    }

    fn count(&self, ty: &TypeDescriptor) -> Result<usize> {
        self.inner.count(ty)
    }

    fn clear(&mut self) -> Result<()> {
        self.check()?;
        self.inner.clear()
    }
}
