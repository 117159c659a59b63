use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use http::Response;
use idempotency_engine::error::AppError;
use idempotency_engine::idempotency::{
    DigestFingerprintStrategy, EntryCodec, FingerprintStrategy, IdempotencyCoordinator,
    IdempotencyEntry, IdempotencyFingerprint, IdempotencyResponse, InMemoryKeyStore, KeyStore,
};

fn sample_entry(body_size: usize) -> IdempotencyEntry {
    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), vec!["application/json".to_string()]);
    let response = IdempotencyResponse::new(201, headers, Some(vec![b'x'; body_size]));

    IdempotencyEntry::completed(
        "order-1",
        IdempotencyFingerprint::from_digest("9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"),
        response,
    )
}

fn benchmark_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let codec = EntryCodec::new();

    for size in [64, 4096, 65536].iter() {
        let entry = sample_entry(*size);
        let encoded = codec.encode(&entry).unwrap();

        group.bench_with_input(BenchmarkId::new("encode", size), &entry, |b, entry| {
            b.iter(|| black_box(codec.encode(black_box(entry)).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("decode", size), &encoded, |b, encoded| {
            b.iter(|| black_box(codec.decode("order-1", black_box(encoded)).unwrap()));
        });
    }

    group.finish();
}

fn benchmark_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");
    let strategy = DigestFingerprintStrategy::new();

    for size in [64, 4096, 65536].iter() {
        let body = vec![b'{'; *size];
        group.bench_with_input(BenchmarkId::new("sha256", size), &body, |b, body| {
            b.iter(|| black_box(strategy.create(Some(black_box(body.as_slice())))));
        });
    }

    group.finish();
}

fn benchmark_memory_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_store");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    group.bench_function("claim_new_key", |b| {
        let store = InMemoryKeyStore::default();
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let key = format!("key-{}", counter);
            runtime.block_on(async { black_box(store.claim(&key, None).await.unwrap()) })
        });
    });

    group.bench_function("claim_existing_key", |b| {
        let store = InMemoryKeyStore::default();
        runtime.block_on(async { store.save(&sample_entry(256)).await.unwrap() });
        b.iter(|| {
            runtime.block_on(async { black_box(store.claim("order-1", None).await.unwrap()) })
        });
    });

    group.finish();
}

fn benchmark_replay(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let coordinator = IdempotencyCoordinator::new(Arc::new(InMemoryKeyStore::default()));
    let body: &[u8] = br#"{"customer_id":"c-1","amount":100}"#;

    runtime.block_on(async {
        coordinator
            .process(Some("order-1"), Some(body), || async {
                Ok::<_, AppError>(Response::builder()
                    .status(201)
                    .header("content-type", "application/json")
                    .body(Bytes::from_static(b"{\"id\":1}"))
                    .unwrap())
            })
            .await
            .unwrap();
    });

    c.bench_function("coordinator_replay", |b| {
        b.iter(|| {
            runtime.block_on(async {
                black_box(
                    coordinator
                        .process(Some("order-1"), Some(body), || async {
                            Ok::<_, AppError>(Response::new(Bytes::new()))
                        })
                        .await
                        .unwrap(),
                )
            })
        });
    });
}

criterion_group!(
    benches,
    benchmark_codec,
    benchmark_fingerprint,
    benchmark_memory_store,
    benchmark_replay,
);
criterion_main!(benches);
