//! Benchmarks for plcdaq hot paths
//!
//! Run with: cargo bench

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use plcdaq::acquisition::{AcquisitionEngine, EngineConfig, ManualClock};
use plcdaq::codec::{decode, decode_array, PrecisionPolicy};
use plcdaq::layout::{Allocator, BaseType, TypeSizes, VariableDescriptor, VariableRow};
use plcdaq::storage::{PartitionConfig, StoragePartitioner};
use plcdaq::transport::{Endpoint, SimulatedPlc};
use plcdaq::LayoutMap;
use std::sync::Arc;
use tempfile::tempdir;

fn create_rows(count: usize) -> Vec<VariableRow> {
    (0..count)
        .map(|i| {
            let ty = match i % 4 {
                0 => "BOOL",
                1 => "INT",
                2 => "REAL",
                _ => "REAL[16]",
            };
            VariableRow::new(format!("Var_{}", i), ty)
        })
        .collect()
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let policy = PrecisionPolicy::default();

    let scalar = 12.345678f32.to_be_bytes();
    group.bench_function("decode_real", |b| {
        b.iter(|| decode(black_box(&scalar), 0, BaseType::Real, "StableWeight", &policy).unwrap())
    });

    for count in [100, 600] {
        let buf: Vec<u8> = (0..count)
            .flat_map(|i| (i as f32 * 0.1).to_be_bytes())
            .collect();
        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(format!("decode_array_{}", count), |b| {
            b.iter(|| decode_array(black_box(&buf), 0, BaseType::Real, count, &policy).unwrap())
        });
    }

    group.finish();
}

fn bench_allocator(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocator");
    let allocator = Allocator::new(TypeSizes::default());

    for size in [100, 1000] {
        let rows = create_rows(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("allocate_{}", size), |b| {
            b.iter(|| allocator.allocate(black_box(&rows), 9, 0))
        });
    }

    group.finish();
}

fn bench_storage(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage");
    let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap();

    group.bench_function("append_sample_50", |b| {
        let dir = tempdir().unwrap();
        let mut storage = StoragePartitioner::new(PartitionConfig::new(dir.path(), "Bench"));
        storage.open(ts.date()).unwrap();
        let rows: Vec<(String, f64)> = (0..50).map(|i| (format!("Var_{}", i), i as f64)).collect();

        b.iter(|| storage.append_sample(ts, black_box(&rows)).unwrap());
    });

    group.finish();
}

fn bench_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");

    group.bench_function("cycle_50_scalars", |b| {
        let dir = tempdir().unwrap();
        let layout: LayoutMap = (0..50u32)
            .map(|i| VariableDescriptor::scalar(format!("Var_{}", i), 9, i * 4, BaseType::Real))
            .collect();
        let plc = SimulatedPlc::for_layout(&layout, &TypeSizes::default());
        let clock = ManualClock::new(
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
        );
        let config = EngineConfig::new(Endpoint::new("sim"), PartitionConfig::new(dir.path(), "Bench"));
        let mut engine =
            AcquisitionEngine::new(config, layout, Box::new(plc), Arc::new(clock)).unwrap();
        engine.start().unwrap();

        b.iter(|| engine.cycle());
    });

    group.finish();
}

criterion_group!(benches, bench_codec, bench_allocator, bench_storage, bench_cycle);
criterion_main!(benches);
