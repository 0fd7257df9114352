use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use commander_events::{Command, RawMessage};
use commander_infra::Multiplexer;
use commander_observability::CommanderMetrics;

const MESSAGES: usize = 1_000;

fn messages() -> Vec<RawMessage> {
    (0..MESSAGES)
        .map(|i| Command::new("bench", i.to_string().into_bytes()).to_message("commands"))
        .collect()
}

fn bench_fan_out(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let batch = messages();

    let mut group = c.benchmark_group("multiplexer_fan_out");
    group.throughput(Throughput::Elements(MESSAGES as u64));

    for subscribers in [1usize, 4, 16] {
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, &subscribers| {
                b.iter(|| {
                    runtime.block_on(async {
                        let (source, stream) = mpsc::unbounded_channel();
                        let closing = CancellationToken::new();
                        let tracker = TaskTracker::new();
                        let multiplexer = Multiplexer::start(
                            stream,
                            closing.clone(),
                            tracker.clone(),
                            64,
                            Arc::new(CommanderMetrics::new()),
                        );

                        let mut subscriptions: Vec<_> =
                            (0..subscribers).map(|_| multiplexer.subscribe("commands")).collect();

                        for message in &batch {
                            source.send(message.clone()).unwrap();
                        }
                        for subscription in &mut subscriptions {
                            for _ in 0..MESSAGES {
                                black_box(subscription.recv().await);
                            }
                        }

                        closing.cancel();
                        tracker.close();
                        tracker.wait().await;
                    })
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_fan_out);
criterion_main!(benches);
