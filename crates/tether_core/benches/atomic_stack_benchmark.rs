//! # Lifecycle Handoff Benchmark
//!
//! Measures the cost of the lock-free handoff path:
//! - Push + whole-list drain of request nodes
//! - Node recycling through a free pool
//! - Record allocation in the reference store
//!
//! Run with: `cargo bench --package tether_core`

// Benchmarks don't need docs
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tether_core::{
    ArchetypeDescriptor, AtomicStack, ComponentLayout, EntityParent, EntityStore, InstanceCount,
    Node, RecordStore,
};

/// Benchmark: push N values, then drain them in one swap.
fn bench_push_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_drain");

    for count in [1_000usize, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let stack = AtomicStack::new();
            b.iter(|| {
                for i in 0..count {
                    stack.push(i);
                }
                black_box(stack.take_all().count())
            });
        });
    }

    group.finish();
}

/// Benchmark: steady-state recycling, no allocation after warm-up.
fn bench_pool_recycle(c: &mut Criterion) {
    let pool = AtomicStack::new();
    let queue = AtomicStack::new();
    for _ in 0..1_024 {
        pool.push_node(Node::new(0u64));
    }

    c.bench_function("pool_recycle_1024", |b| {
        b.iter(|| {
            while let Some(mut node) = pool.pop_node() {
                node.replace(black_box(1));
                queue.push_node(node);
            }
            for node in queue.take_all() {
                pool.push_node(node);
            }
        });
    });
}

/// Benchmark: allocate and destroy records carrying the bookkeeping components.
fn bench_record_churn(c: &mut Criterion) {
    let descriptor = ArchetypeDescriptor::new([
        ComponentLayout::field::<InstanceCount>(),
        ComponentLayout::buffer::<EntityParent>(),
    ]);

    c.bench_function("record_churn_10k", |b| {
        let mut store = RecordStore::new(10_000);
        let mut handles = Vec::with_capacity(10_000);
        b.iter(|| {
            for _ in 0..10_000 {
                if let Ok(handle) = store.allocate_record(&descriptor) {
                    handles.push(handle);
                }
            }
            for handle in handles.drain(..) {
                store.destroy_record(handle);
            }
            black_box(store.alive_count())
        });
    });
}

criterion_group!(benches, bench_push_drain, bench_pool_recycle, bench_record_churn);
criterion_main!(benches);
