use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use databus::ring_queue::RingQueue;

const OPS: u64 = 100_000;

fn bench_put_single_threaded(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_queue_put");
    group.throughput(Throughput::Elements(OPS));
    for &capacity in &[16_usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &capacity| {
            b.iter(|| {
                let queue = RingQueue::new(capacity);
                for i in 0..OPS {
                    queue.put(black_box(i));
                }
            });
        });
    }
    group.finish();
}

/// Capacity large enough relative to `OPS` that the consumer drains
/// faster than the producer fills, so no item is dropped and the
/// benchmark measures put+take throughput rather than the drop path.
fn bench_put_take_one_producer_one_consumer(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_queue_spsc");
    group.throughput(Throughput::Elements(OPS));
    group.bench_function("capacity_1024", |b| {
        b.iter_custom(|iters| {
            let queue = Arc::new(RingQueue::new(1024));
            let total = OPS * iters;
            let consumer_queue = Arc::clone(&queue);
            let consumer = thread::spawn(move || {
                let mut seen = 0u64;
                while consumer_queue.take().is_some() {
                    seen += 1;
                }
                seen
            });

            let start = std::time::Instant::now();
            for i in 0..total {
                queue.put(black_box(i));
            }
            queue.shutdown();
            consumer.join().unwrap();
            start.elapsed()
        });
    });
    group.finish();
}

criterion_group!(benches, bench_put_single_threaded, bench_put_take_one_producer_one_consumer);
criterion_main!(benches);
