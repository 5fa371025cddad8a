//! Benchmarks for the hot path pieces that run on every request.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use warmpool::control::{Frame, Message, PoolSummary, RequestHead, StatusReport, WorkerStatus};
use warmpool::server::resolve_request_path;
use warmpool::supervisor::Phase;
use warmpool::worker::WorkerState;

fn bench_resolve_request_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_request_path");

    let cases = [
        ("plain", "/assets/css/site.css"),
        ("dot_segments", "/assets/./img/../css//site.css"),
        ("escape", "/assets/../../etc/passwd"),
        ("deep", "/a/b/c/d/e/f/g/h/i/j/k/l/m/n/o/p/q/r/s/t/u/v/w/x/y/z.txt"),
    ];
    for (name, path) in cases {
        group.bench_with_input(BenchmarkId::from_parameter(name), path, |b, path| {
            b.iter(|| black_box(resolve_request_path(black_box(path))));
        });
    }

    group.finish();
}

fn dispatch_frame(body_len: usize) -> Frame {
    let mut head = RequestHead::new("POST", "/api/items?page=2");
    head.headers = vec![
        ("host".to_string(), "localhost:8080".to_string()),
        ("content-type".to_string(), "application/json".to_string()),
        ("user-agent".to_string(), "bench/1.0".to_string()),
        ("x-request-id".to_string(), "9f8e7d6c-0000-4000-8000-000000000000".to_string()),
    ];
    Frame::with_body(Message::Dispatch { request: head }, vec![b'x'; body_len])
}

fn bench_dispatch_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_frame");

    for body_len in [0usize, 4 * 1024, 256 * 1024] {
        let frame = dispatch_frame(body_len);
        let encoded = frame.encode().unwrap();
        group.throughput(Throughput::Bytes(encoded.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", body_len), &frame, |b, frame| {
            b.iter(|| black_box(frame.encode().unwrap()));
        });
        group.bench_with_input(
            BenchmarkId::new("decode", body_len),
            &encoded[4..],
            |b, payload| {
                b.iter(|| black_box(Frame::decode(black_box(payload)).unwrap()));
            },
        );
    }

    group.finish();
}

fn bench_status_reply(c: &mut Criterion) {
    let workers: Vec<_> = (0..64)
        .map(|id| WorkerStatus {
            id,
            pid: Some(40_000 + id as u32),
            state: if id % 4 == 0 {
                WorkerState::Busy
            } else {
                WorkerState::Ready
            },
            requests_served: id as u64 * 17,
            age_seconds: 120,
        })
        .collect();
    let report = StatusReport {
        summary: PoolSummary {
            phase: Phase::Running,
            total: workers.len(),
            spawning: 0,
            ready: 48,
            busy: 16,
            draining: 0,
            terminated: 0,
            queued: 3,
            reloading: false,
            total_requests: 10_000,
            total_restarts: 12,
            uptime_seconds: 3600,
        },
        workers,
    };
    let frame = Frame::new(Message::StatusReply(report));

    c.bench_function("status_reply_encode_64_workers", |b| {
        b.iter(|| black_box(frame.encode().unwrap()));
    });
}

criterion_group!(
    benches,
    bench_resolve_request_path,
    bench_dispatch_frame,
    bench_status_reply
);
criterion_main!(benches);
