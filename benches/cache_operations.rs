//! Benchmarks for L1 store operations: the hot path that must stay in
//! the sub-millisecond range for every cache hit.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rpc_cache_gateway::{L1Config, L1Store, Ttl};
use std::time::Duration;

fn test_payload(size_bytes: usize) -> Vec<u8> {
    vec![b'x'; size_bytes]
}

fn bench_l1_set(c: &mut Criterion) {
    let store = L1Store::new(L1Config::default());
    let mut group = c.benchmark_group("l1_set");
    group.measurement_time(Duration::from_secs(5));

    for size in &[64, 1024, 16_384] {
        let payload = test_payload(*size);
        group.bench_with_input(BenchmarkId::new("payload_bytes", size), size, |b, _| {
            b.iter(|| {
                let key = format!("bench:set:{}", rand::random::<u32>());
                let entry = rpc_cache_gateway::CacheEntry::new(
                    black_box(payload.clone()),
                    Ttl { fresh: 60, stale: 0 },
                    rpc_cache_gateway::entry::now_secs(),
                );
                store.set(&key, entry);
            });
        });
    }
    group.finish();
}

fn bench_l1_get_hit_vs_miss(c: &mut Criterion) {
    let store = L1Store::new(L1Config::default());
    let entry = rpc_cache_gateway::CacheEntry::new(
        test_payload(1024),
        Ttl { fresh: 300, stale: 0 },
        rpc_cache_gateway::entry::now_secs(),
    );
    store.set("bench:hit", entry);

    let mut group = c.benchmark_group("l1_get");
    group.bench_function("hit", |b| {
        b.iter(|| black_box(store.get("bench:hit")));
    });
    group.bench_function("miss", |b| {
        b.iter(|| black_box(store.get("bench:does-not-exist")));
    });
    group.finish();
}

criterion_group!(benches, bench_l1_set, bench_l1_get_hit_vs_miss);
criterion_main!(benches);
