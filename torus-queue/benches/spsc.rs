//! Benchmarks for the unbounded SPSC queue.
//!
//! Compares torus-queue against crossbeam-queue's SegQueue, the closest
//! unbounded comparison point.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use crossbeam_queue::SegQueue;
use std::thread;

#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
struct Medium([u64; 16]); // 128 bytes

// ============================================================================
// Single-threaded latency benchmarks
// ============================================================================

fn bench_single_thread_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_thread_latency");

    group.bench_function("torus/u64", |b| {
        let (mut tx, mut rx) = torus_queue::queue::<u64>(1024);
        b.iter(|| {
            tx.push(black_box(42));
            black_box(rx.pop().unwrap())
        });
    });

    group.bench_function("segqueue/u64", |b| {
        let q = SegQueue::<u64>::new();
        b.iter(|| {
            q.push(black_box(42));
            black_box(q.pop().unwrap())
        });
    });

    group.bench_function("torus/128b", |b| {
        let (mut tx, mut rx) = torus_queue::queue::<Medium>(1024);
        let msg = Medium([0; 16]);
        b.iter(|| {
            tx.push(black_box(msg));
            black_box(rx.pop().unwrap())
        });
    });

    group.bench_function("segqueue/128b", |b| {
        let q = SegQueue::<Medium>::new();
        let msg = Medium([0; 16]);
        b.iter(|| {
            q.push(black_box(msg));
            black_box(q.pop().unwrap())
        });
    });

    group.finish();
}

// ============================================================================
// Cross-thread throughput benchmarks
// ============================================================================

fn bench_cross_thread_throughput(c: &mut Criterion) {
    const COUNT: u64 = 100_000;

    let mut group = c.benchmark_group("cross_thread_throughput");
    group.throughput(Throughput::Elements(COUNT));

    group.bench_function("torus/u64", |b| {
        b.iter(|| {
            let (mut tx, mut rx) = torus_queue::queue::<u64>(1024);

            let producer = thread::spawn(move || {
                for i in 0..COUNT {
                    tx.push(i);
                }
            });

            let mut received = 0u64;
            while received < COUNT {
                if rx.pop().is_some() {
                    received += 1;
                } else {
                    std::hint::spin_loop();
                }
            }

            producer.join().unwrap();
        });
    });

    group.bench_function("segqueue/u64", |b| {
        b.iter(|| {
            let q = std::sync::Arc::new(SegQueue::<u64>::new());
            let q2 = std::sync::Arc::clone(&q);

            let producer = thread::spawn(move || {
                for i in 0..COUNT {
                    q2.push(i);
                }
            });

            let mut received = 0u64;
            while received < COUNT {
                if q.pop().is_some() {
                    received += 1;
                } else {
                    std::hint::spin_loop();
                }
            }

            producer.join().unwrap();
        });
    });

    group.finish();
}

// ============================================================================
// Growth benchmarks
// ============================================================================

fn bench_growth(c: &mut Criterion) {
    const COUNT: u64 = 10_000;

    let mut group = c.benchmark_group("growth");
    group.throughput(Throughput::Elements(COUNT));

    // Small initial capacity forces the full doubling ladder every iteration.
    group.bench_function("torus/push_from_capacity_1", |b| {
        b.iter(|| {
            let (mut tx, _rx) = torus_queue::queue::<u64>(1);
            for i in 0..COUNT {
                tx.push(black_box(i));
            }
        });
    });

    // Pre-sized queue never allocates after construction.
    group.bench_function("torus/push_presized", |b| {
        b.iter(|| {
            let (mut tx, _rx) = torus_queue::queue::<u64>(COUNT as usize);
            for i in 0..COUNT {
                tx.push(black_box(i));
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_thread_latency,
    bench_cross_thread_throughput,
    bench_growth
);
criterion_main!(benches);
