/// Benchmarks for inbound frame deserialization.
///
/// `task_status` and `agent_update` frames dominate traffic while tasks are running, so those
/// are the paths worth watching.
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use cto_realtime::Message;
use cto_realtime::types::parse_messages;

fn bench_single_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("messages/single");

    let frames = [
        (
            "task_status",
            r#"{"type":"task_status","timestamp":1753314064237,"data":{"task_id":"7","status":"running","progress":42.5}}"#,
        ),
        (
            "agent_update",
            r#"{"type":"agent_update","timestamp":1753314064237,"data":{"agent_id":"a1","task_id":"7","status":"thinking","message":"Reading repository","tokens":1200}}"#,
        ),
        (
            "notification_iso_timestamp",
            r#"{"type":"notification","timestamp":"2025-07-25T14:49:35.801Z","data":{"title":"Done","message":"Task 7 completed","level":"success"}}"#,
        ),
        ("heartbeat", r#"{"type":"heartbeat","timestamp":1753314064237}"#),
    ];

    for (name, frame) in frames {
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(BenchmarkId::new("parse_messages", name), frame, |b, frame| {
            b.iter(|| {
                parse_messages(std::hint::black_box(frame.as_bytes()))
                    .expect("Deserialization should succeed")
            });
        });
    }

    group.finish();
}

fn bench_batches(c: &mut Criterion) {
    let mut group = c.benchmark_group("messages/batch");

    for size in [10_usize, 100] {
        let batch = format!(
            "[{}]",
            (0..size)
                .map(|n| format!(
                    r#"{{"type":"task_status","timestamp":{n},"data":{{"task_id":{n},"status":"completed"}}}}"#
                ))
                .collect::<Vec<_>>()
                .join(",")
        );

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &batch, |b, batch| {
            b.iter(|| {
                parse_messages(std::hint::black_box(batch.as_bytes()))
                    .expect("Deserialization should succeed")
            });
        });
    }

    group.finish();
}

fn bench_typed_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("messages/payload");

    let message: Message = serde_json::from_str(
        r#"{"type":"task_status","timestamp":1,"data":{"task_id":"7","status":"failed","error":"worker crashed"}}"#,
    )
    .expect("Deserialization should succeed");

    group.bench_function("as_task_status", |b| {
        b.iter(|| std::hint::black_box(&message).as_task_status());
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_frames,
    bench_batches,
    bench_typed_payload
);
criterion_main!(benches);
