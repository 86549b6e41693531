//! Event publishing and coalescing benchmarks
//!
//! - in-memory publish throughput, with and without a trimmed log
//! - history reads at several depths
//! - text coalescing in the chunk buffer

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;
use std::time::Duration;
use stepline::core::{EventPublisher, NewStreamEvent, StreamChunk, StreamEventType};
use stepline::runtime::buffer::CoalescingBuffer;
use stepline::store::{InMemoryEventPublisher, StreamConfig};
use tokio::runtime::Runtime;

fn bench_publish(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("event_publish");
    group.throughput(Throughput::Elements(1));

    group.bench_function("stream_event", |b| {
        let publisher = InMemoryEventPublisher::default();
        b.to_async(&rt).iter(|| async {
            let event = NewStreamEvent::new(StreamEventType::StepStart, 0, json!({}));
            black_box(publisher.publish_stream_event("op-bench", event).await.unwrap())
        })
    });

    group.bench_function("stream_chunk", |b| {
        let publisher = InMemoryEventPublisher::default();
        b.to_async(&rt).iter(|| async {
            let chunk = StreamChunk::text("token ");
            black_box(publisher.publish_stream_chunk("op-bench", 0, &chunk).await.unwrap())
        })
    });

    group.bench_function("trimmed_log", |b| {
        let publisher = InMemoryEventPublisher::new(StreamConfig::default().with_max_len(64));
        b.to_async(&rt).iter(|| async {
            let event = NewStreamEvent::new(StreamEventType::StepStart, 0, json!({}));
            black_box(publisher.publish_stream_event("op-bench", event).await.unwrap())
        })
    });

    group.finish();
}

fn bench_history(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("event_history");

    for depth in [10usize, 100, 1000] {
        let publisher = InMemoryEventPublisher::default();
        rt.block_on(async {
            for i in 0..depth {
                let event = NewStreamEvent::new(StreamEventType::StepStart, i as u32, json!({}));
                publisher.publish_stream_event("op-bench", event).await.unwrap();
            }
        });

        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.to_async(&rt).iter(|| async {
                black_box(publisher.get_stream_history("op-bench", depth).await.unwrap())
            })
        });
    }

    group.finish();
}

fn bench_coalescing(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_coalescing");
    group.measurement_time(Duration::from_secs(5));

    let deltas: Vec<String> = (0..256).map(|i| format!("tok{i} ")).collect();
    group.throughput(Throughput::Elements(deltas.len() as u64));

    group.bench_function("push_and_drain", |b| {
        b.iter(|| {
            let mut buffer = CoalescingBuffer::new(Duration::from_millis(50));
            for delta in &deltas {
                buffer.push(delta);
            }
            black_box(buffer.take())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_publish, bench_history, bench_coalescing);
criterion_main!(benches);
