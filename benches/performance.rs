use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use http::Method;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use idempotency_engine::idempotency::{
    BufferedResponse, EngineConfig, Fingerprint, Handler, IdempotencyEngine, IdempotencyKey,
    IdempotentRequest, ResponseSink,
};
use idempotency_engine::store::InMemoryCacheStore;

struct StaticHandler;

#[async_trait]
impl Handler for StaticHandler {
    async fn handle(
        &self,
        _request: &IdempotentRequest,
        sink: &mut dyn ResponseSink,
    ) -> anyhow::Result<()> {
        sink.set_status(201);
        sink.set_header("content-type", "application/json");
        sink.write(br#"{"id":"pay_1","status":"accepted"}"#)?;
        Ok(())
    }
}

fn engine() -> IdempotencyEngine {
    IdempotencyEngine::new(Arc::new(InMemoryCacheStore::new()), EngineConfig::default())
        .expect("default config is valid")
}

fn request(key: &str) -> IdempotentRequest {
    IdempotentRequest::new(Method::POST, "/payments")
        .with_idempotency_key(key)
        .expect("header-safe idempotency key")
        .with_body(r#"{"amount":100,"currency":"USD"}"#)
}

fn benchmark_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");

    for size in [64usize, 1024, 64 * 1024].iter() {
        let body = vec![b'x'; *size];
        group.bench_with_input(BenchmarkId::new("sha256", size), &body, |b, body| {
            b.iter(|| {
                black_box(Fingerprint::compute(
                    black_box(&Method::POST),
                    black_box("/payments"),
                    black_box(body),
                ))
            });
        });
    }

    group.bench_function("key_parse", |b| {
        b.iter(|| black_box(IdempotencyKey::parse(black_box("order-2024-000123"), 255)));
    });

    group.finish();
}

fn benchmark_engine(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("engine");
    group.measurement_time(Duration::from_secs(10));

    let replay_engine = engine();
    runtime.block_on(async {
        replay_engine
            .handle(&request("order-replay"), &StaticHandler, &mut BufferedResponse::new())
            .await
            .expect("first execution succeeds");
    });
    group.bench_function("replay", |b| {
        let request = request("order-replay");
        b.to_async(&runtime).iter(|| async {
            let mut sink = BufferedResponse::new();
            black_box(
                replay_engine
                    .handle(&request, &StaticHandler, &mut sink)
                    .await
                    .expect("replay succeeds"),
            );
        });
    });

    let fresh_engine = engine();
    let counter = AtomicU64::new(0);
    group.bench_function("fresh_key", |b| {
        b.to_async(&runtime).iter(|| async {
            let key = format!("order-{}", counter.fetch_add(1, Ordering::Relaxed));
            let mut sink = BufferedResponse::new();
            black_box(
                fresh_engine
                    .handle(&request(&key), &StaticHandler, &mut sink)
                    .await
                    .expect("fresh execution succeeds"),
            );
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_fingerprint, benchmark_engine);
criterion_main!(benches);
