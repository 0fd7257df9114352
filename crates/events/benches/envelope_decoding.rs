use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use commander_events::{Command, Event, RawMessage};

fn command_message(payload_len: usize) -> RawMessage {
    Command::new("inventory.adjust", vec![b'x'; payload_len])
        .with_header("trace", "bench")
        .to_message("commands")
}

fn event_message(payload_len: usize) -> RawMessage {
    Command::new("inventory.adjust", Vec::new())
        .new_event("inventory.adjusted", 1, vec![b'x'; payload_len])
        .to_message("events")
}

fn bench_populate(c: &mut Criterion) {
    let mut group = c.benchmark_group("populate");

    for payload_len in [0usize, 1024, 64 * 1024] {
        group.throughput(Throughput::Bytes(payload_len as u64));

        let message = command_message(payload_len);
        group.bench_with_input(BenchmarkId::new("command", payload_len), &message, |b, m| {
            b.iter(|| Command::populate(black_box(m)))
        });

        let message = event_message(payload_len);
        group.bench_with_input(BenchmarkId::new("event", payload_len), &message, |b, m| {
            b.iter(|| Event::populate(black_box(m)))
        });
    }

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let command = Command::new("inventory.adjust", vec![b'x'; 1024]);
    let event = command.new_event("inventory.adjusted", 1, vec![b'x'; 1024]);

    c.bench_function("encode/command", |b| b.iter(|| black_box(&command).to_message("commands")));
    c.bench_function("encode/event", |b| b.iter(|| black_box(&event).to_message("events")));
}

criterion_group!(benches, bench_populate, bench_encode);
criterion_main!(benches);
