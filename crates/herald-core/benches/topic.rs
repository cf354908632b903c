//! Ring and topic fan-out benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use herald_core::{Cursor, Hub, Ring, Subscriber, TopicConfig, TopicKey};
use std::time::{Duration, Instant};

fn bench_ring_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_append");
    group.throughput(Throughput::Elements(1));

    group.bench_function("full_1024", |b| {
        let mut ring = Ring::new(1024);
        for n in 0..1024u64 {
            ring.append(n);
        }
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            ring.append(black_box(n))
        });
    });

    group.finish();
}

fn bench_publish_fanout(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let _guard = runtime.enter();

    let mut group = c.benchmark_group("publish_fanout");
    group.throughput(Throughput::Elements(1));

    for subscribers in [1usize, 10, 100] {
        group.bench_function(format!("{subscribers}_subscribers"), |b| {
            b.iter_custom(|iters| {
                let hub = Hub::new(TopicConfig {
                    capacity: 100,
                    ttl: Duration::from_secs(60),
                });
                let key = TopicKey::new("bench", "fanout");
                let mut receivers: Vec<_> = (0..subscribers)
                    .map(|_| {
                        let (subscriber, rx) = Subscriber::channel();
                        hub.subscribe(&key, &subscriber, Cursor::Nothing);
                        rx
                    })
                    .collect();
                let body = Bytes::from_static(br#"{"text":"hello"}"#);

                let start = Instant::now();
                for _ in 0..iters {
                    hub.publish(&key, black_box(body.clone()));
                    for rx in &mut receivers {
                        let _ = rx.try_recv();
                    }
                }
                start.elapsed()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_ring_append, bench_publish_fanout);
criterion_main!(benches);
