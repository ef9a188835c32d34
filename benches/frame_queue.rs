//! Frame queue benchmark suite.
//!
//! Benchmarks the receive-side FIFO at different batch sizes:
//! - Same-task push then pop
//! - Deadline pop when a frame is already queued
//! - Cross-task producer/consumer handoff
//!
//! Run with: cargo bench --bench frame_queue
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tokio::runtime::Runtime;

use diaglink::{Frame, FrameQueue};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const BATCH_SIZES: &[usize] = &[16, 256, 4096];

/// Single-frame read-DID response, a typical payload shape.
const PAYLOAD: &[u8] = &[0x62, 0xF1, 0x90, 0x57, 0x30, 0x4C, 0x30, 0x30];

// ============================================================================
// Benchmark: Push Then Pop
// ============================================================================

fn bench_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_pop");

    for &count in BATCH_SIZES {
        group.bench_with_input(BenchmarkId::new("batch", count), &count, |b, &count| {
            b.iter(|| {
                let queue = FrameQueue::new();
                for _ in 0..count {
                    queue.push(Frame::copy_from(PAYLOAD));
                }
                for _ in 0..count {
                    black_box(queue.try_pop());
                }
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Deadline Pop, Frame Ready
// ============================================================================

fn bench_pop_ready(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("pop_ready", |b| {
        b.to_async(&rt).iter(|| async {
            let queue = FrameQueue::new();
            queue.push(Frame::copy_from(PAYLOAD));
            black_box(queue.pop_within(Duration::from_secs(1)).await)
        });
    });
}

// ============================================================================
// Benchmark: Producer/Consumer Handoff
// ============================================================================

fn bench_handoff(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("handoff");
    group.sample_size(30); // Cross-task batches are slower to sample

    for &count in BATCH_SIZES {
        group.bench_with_input(BenchmarkId::new("frames", count), &count, |b, &count| {
            b.to_async(&rt).iter(|| async move {
                let queue = Arc::new(FrameQueue::new());

                let producer = {
                    let queue = Arc::clone(&queue);
                    tokio::spawn(async move {
                        for _ in 0..count {
                            queue.push(Frame::copy_from(PAYLOAD));
                        }
                    })
                };

                for _ in 0..count {
                    black_box(queue.pop_within(Duration::from_secs(1)).await);
                }

                producer.await.unwrap();
            });
        });
    }

    group.finish();
}

// ============================================================================
// Criterion Setup
// ============================================================================

criterion_group!(benches, bench_push_pop, bench_pop_ready, bench_handoff);
criterion_main!(benches);
