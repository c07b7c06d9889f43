//! RAM backend
//!
//! One [`ByteRing`] per registered type, sized for `records_per_type` records
//! and allocated once in `init`. Records are lost on restart.

use super::{ByteRing, StorageBackend};
use crate::error::{Result, StorageError};
use crate::registry::{TypeDescriptor, TypeRegistry};
use tracing::{debug, warn};

/// Per-type ring buffers in memory
#[derive(Debug)]
pub struct RamBackend {
    records_per_type: usize,
    rings: Vec<ByteRing>,
}

impl RamBackend {
    /// Create a new RAM backend holding `records_per_type` records of each type
    pub fn new(records_per_type: usize) -> Self {
        Self {
            records_per_type,
            rings: Vec::new(),
        }
    }

    fn ring(&self, ty: &TypeDescriptor) -> Result<&ByteRing> {
        self.rings
            .get(ty.id.index())
            .ok_or(StorageError::UnknownType(ty.id))
    }

    fn ring_mut(&mut self, ty: &TypeDescriptor) -> Result<&mut ByteRing> {
        self.rings
            .get_mut(ty.id.index())
            .ok_or(StorageError::UnknownType(ty.id))
    }
}

impl StorageBackend for RamBackend {
    fn name(&self) -> &'static str {
        "ram"
    }

    fn init(&mut self, registry: &TypeRegistry) -> Result<()> {
        self.rings = registry
            .iter()
            .map(|ty| ByteRing::new(ty.record_size * self.records_per_type))
            .collect();
        debug!(
            "RAM backend ready: {} types, {} records each",
            self.rings.len(),
            self.records_per_type
        );
        Ok(())
    }

    fn store(&mut self, ty: &TypeDescriptor, record: &[u8]) -> Result<()> {
        ty.check_size(record.len())?;
        let ring = self.ring_mut(ty)?;

        if ring.free() < record.len() {
            ring.get(None, record.len());
            warn!("{} store full, dropped oldest record", ty.name);
        }

        let written = ring.put(record);
        if written != record.len() {
            // Only reachable when capacity is smaller than one record
            ring.get(None, written);
            return Err(StorageError::BufferTooSmall {
                needed: record.len(),
                available: ring.capacity(),
            });
        }
        Ok(())
    }

    fn peek(&self, ty: &TypeDescriptor, buf: Option<&mut [u8]>) -> Result<usize> {
        let ring = self.ring(ty)?;
        if ring.len() < ty.record_size {
            return Err(StorageError::NoData(ty.id));
        }
        match buf {
            None => Ok(ty.record_size),
            Some(buf) => {
                if buf.len() < ty.record_size {
                    return Err(StorageError::BufferTooSmall {
                        needed: ty.record_size,
                        available: buf.len(),
                    });
                }
                Ok(ring.peek(buf, ty.record_size))
            }
        }
    }

    fn retrieve(&mut self, ty: &TypeDescriptor, buf: &mut [u8]) -> Result<usize> {
        let size = ty.record_size;
        let ring = self.ring_mut(ty)?;
        if ring.len() < size {
            return Err(StorageError::NoData(ty.id));
        }
        if buf.len() < size {
            return Err(StorageError::BufferTooSmall {
                needed: size,
                available: buf.len(),
            });
        }
        Ok(ring.get(Some(buf), size))
    }

    fn count(&self, ty: &TypeDescriptor) -> Result<usize> {
        Ok(self.ring(ty)?.len() / ty.record_size)
    }

    fn clear(&mut self) -> Result<()> {
        for ring in &mut self.rings {
            ring.reset();
        }
        debug!("RAM backend cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ChannelId;
    use crate::types::TypeId;
    use proptest::prelude::*;

    fn battery_registry() -> TypeRegistry {
        TypeRegistry::builder(2)
            .register("battery", 8, ChannelId("power"), |m: &[u8]| Some(m.to_vec()))
            .register("location", 32, ChannelId("location"), |m: &[u8]| {
                Some(m.to_vec())
            })
            .build()
            .unwrap()
    }

    fn record(n: u8) -> [u8; 8] {
        [n; 8]
    }

    #[test]
    fn test_drop_oldest_keeps_capacity() {
        let registry = battery_registry();
        let battery = registry.get(TypeId(0)).unwrap();
        let mut backend = RamBackend::new(3);
        backend.init(&registry).unwrap();

        for n in 1..=4 {
            backend.store(battery, &record(n)).unwrap();
        }
        assert_eq!(backend.count(battery).unwrap(), 3);

        let mut buf = [0u8; 8];
        assert_eq!(backend.retrieve(battery, &mut buf).unwrap(), 8);
        assert_eq!(buf, record(2));
        assert_eq!(backend.count(battery).unwrap(), 2);
    }

    #[test]
    fn test_empty_is_no_data() {
        let registry = battery_registry();
        let battery = registry.get(TypeId(0)).unwrap();
        let mut backend = RamBackend::new(3);
        backend.init(&registry).unwrap();

        let mut buf = [0u8; 8];
        assert!(matches!(
            backend.retrieve(battery, &mut buf),
            Err(StorageError::NoData(_))
        ));
        assert!(matches!(backend.peek(battery, None), Err(StorageError::NoData(_))));
    }

    #[test]
    fn test_peek_reports_size_and_keeps_record() {
        let registry = battery_registry();
        let battery = registry.get(TypeId(0)).unwrap();
        let mut backend = RamBackend::new(3);
        backend.init(&registry).unwrap();
        backend.store(battery, &record(7)).unwrap();

        assert_eq!(backend.peek(battery, None).unwrap(), 8);
        let mut buf = [0u8; 8];
        assert_eq!(backend.peek(battery, Some(&mut buf)).unwrap(), 8);
        assert_eq!(buf, record(7));
        assert_eq!(backend.count(battery).unwrap(), 1);
    }

    #[test]
    fn test_size_errors() {
        let registry = battery_registry();
        let battery = registry.get(TypeId(0)).unwrap();
        let mut backend = RamBackend::new(3);
        backend.init(&registry).unwrap();

        assert!(matches!(
            backend.store(battery, &[0; 4]),
            Err(StorageError::RecordSize { .. })
        ));

        backend.store(battery, &record(1)).unwrap();
        let mut small = [0u8; 4];
        assert!(matches!(
            backend.retrieve(battery, &mut small),
            Err(StorageError::BufferTooSmall { needed: 8, available: 4 })
        ));
        assert_eq!(backend.count(battery).unwrap(), 1);
    }

    #[test]
    fn test_clear_empties_all_types() {
        let registry = battery_registry();
        let mut backend = RamBackend::new(3);
        backend.init(&registry).unwrap();
        let battery = registry.get(TypeId(0)).unwrap();
        let location = registry.get(TypeId(1)).unwrap();

        backend.store(battery, &record(1)).unwrap();
        backend.store(location, &[5; 32]).unwrap();
        backend.clear().unwrap();

        assert_eq!(backend.count(battery).unwrap(), 0);
        assert_eq!(backend.count(location).unwrap(), 0);
    }

    proptest! {
        #[test]
        fn prop_count_tracks_stores_and_retrieves(
            capacity in 1usize..8,
            ops in proptest::collection::vec(any::<bool>(), 0..64),
        ) {
            let registry = battery_registry();
            let battery = registry.get(TypeId(0)).unwrap();
            let mut backend = RamBackend::new(capacity);
            backend.init(&registry).unwrap();

            let (mut stored, mut retrieved, mut dropped) = (0usize, 0usize, 0usize);
            let mut next = 0u8;
            let mut oldest = 0u8;

            for is_store in ops {
                if is_store {
                    if backend.count(battery).unwrap() == capacity {
                        dropped += 1;
                        oldest = oldest.wrapping_add(1);
                    }
                    backend.store(battery, &record(next)).unwrap();
                    next = next.wrapping_add(1);
                    stored += 1;
                } else {
                    let mut buf = [0u8; 8];
                    match backend.retrieve(battery, &mut buf) {
                        Ok(_) => {
                            prop_assert_eq!(buf, record(oldest));
                            oldest = oldest.wrapping_add(1);
                            retrieved += 1;
                        }
                        Err(e) => prop_assert!(e.is_transient()),
                    }
                }
                let count = backend.count(battery).unwrap();
                prop_assert_eq!(count, stored - retrieved - dropped);
                prop_assert!(count <= capacity);
            }
        }
    }
}
