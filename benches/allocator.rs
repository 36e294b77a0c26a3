//! Segment allocator benchmarks.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use shmheap::arena::Backing;
use shmheap::heap::{HeapConfig, SegmentAllocator};
use std::sync::Arc;

fn bench_allocate_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_free");

    for size in [64, 1024, 16 * 1024] {
        let heap = SegmentAllocator::new(HeapConfig::default()).unwrap();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let block = heap.allocate(size).unwrap();
                heap.free(std::hint::black_box(block)).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_fragmented_best_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragmented_best_fit");

    for holes in [16, 256, 4096] {
        let heap = SegmentAllocator::new(HeapConfig::large().with_backing(Backing::Heap)).unwrap();
        // Free every other block, with varied sizes, so many lengths exist.
        let blocks: Vec<_> = (0..holes * 2)
            .map(|i| heap.allocate(8 + (i % 97) * 8).unwrap())
            .collect();
        for block in blocks.iter().step_by(2) {
            heap.free(*block).unwrap();
        }

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(holes), &heap, |b, heap| {
            b.iter(|| {
                let block = heap.allocate(300).unwrap();
                heap.free(block).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_concurrent_buffers(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_buffers");

    let heap = Arc::new(SegmentAllocator::new(HeapConfig::default()).unwrap());

    group.throughput(Throughput::Elements(400));
    group.bench_function("4_threads_100_ops_each", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let heap = Arc::clone(&heap);
                    std::thread::spawn(move || {
                        for _ in 0..100 {
                            let mut buf = heap.allocate_buffer(256).unwrap();
                            buf.as_mut_slice()[0] = 1;
                            std::hint::black_box(buf.as_slice());
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_allocate_free,
    bench_fragmented_best_fit,
    bench_concurrent_buffers
);
criterion_main!(benches);
