//! Benchmarks for backend and batch pipe throughput
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;
use telemetry_store::backend::{CircularLogBackend, RamBackend, StorageBackend};
use telemetry_store::batch::{BatchPipe, BatchSession};
use telemetry_store::config::CircularLogSettings;
use telemetry_store::sources::standard_registry;

fn bench_ram_store(c: &mut Criterion) {
    let registry = standard_registry(4).unwrap();
    let battery = registry.by_name("battery").unwrap();
    let record = [0x5Au8; 8];

    let mut group = c.benchmark_group("ram_store");
    for capacity in [32usize, 1024].iter() {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("store_full", capacity),
            capacity,
            |b, &capacity| {
                let mut backend = RamBackend::new(capacity);
                backend.init(&registry).unwrap();
                for _ in 0..capacity {
                    backend.store(battery, &record).unwrap();
                }
                // Every store now also drops the oldest record
                b.iter(|| backend.store(battery, black_box(&record)).unwrap());
            },
        );
    }
    group.finish();
}

fn bench_ram_round_trip(c: &mut Criterion) {
    let registry = standard_registry(4).unwrap();
    let location = registry.by_name("location").unwrap();
    let record = [0xA5u8; 32];
    let mut buf = [0u8; 32];

    let mut backend = RamBackend::new(64);
    backend.init(&registry).unwrap();

    c.bench_function("ram_store_retrieve", |b| {
        b.iter(|| {
            backend.store(location, black_box(&record)).unwrap();
            backend.retrieve(location, &mut buf).unwrap();
        })
    });
}

fn bench_circular_log_store(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let registry = standard_registry(4).unwrap();
    let battery = registry.by_name("battery").unwrap();
    let settings = CircularLogSettings {
        root: dir.path().to_path_buf(),
        block_size: 4096,
        block_count: 64,
        sync_writes: false,
    };
    let mut backend = CircularLogBackend::new(settings, 256);
    backend.init(&registry).unwrap();
    let record = [0x11u8; 8];

    c.bench_function("circular_log_store", |b| {
        b.iter(|| backend.store(battery, black_box(&record)).unwrap())
    });
}

fn bench_batch_populate(c: &mut Criterion) {
    let registry = standard_registry(4).unwrap();
    let battery = registry.by_name("battery").unwrap();
    let timeout = Duration::from_millis(10);

    let mut group = c.benchmark_group("batch_populate");
    for records in [16usize, 128].iter() {
        group.throughput(Throughput::Elements(*records as u64));
        group.bench_with_input(
            BenchmarkId::new("fill_and_read", records),
            records,
            |b, &records| {
                let mut backend = RamBackend::new(records);
                backend.init(&registry).unwrap();
                let pipe = BatchPipe::new(records * 11, registry.max_record_size());

                b.iter(|| {
                    for _ in 0..records {
                        backend.store(battery, &[1u8; 8]).unwrap();
                    }
                    let mut session = BatchSession::new(1).unwrap();
                    session
                        .populate(&mut backend, &registry, &pipe, timeout)
                        .unwrap();
                    while let Ok(item) = pipe.dequeue_framed(Duration::ZERO) {
                        black_box(item);
                    }
                })
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_ram_store,
    bench_ram_round_trip,
    bench_circular_log_store,
    bench_batch_populate
);
criterion_main!(benches);
