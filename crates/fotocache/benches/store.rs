use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use fotocache::{CacheStore, FilterOp, QueryDescriptor, ScopeConfig};
use serde_json::{json, Value};

fn photo_page(page: usize) -> Value {
    json!((0..50)
        .map(|i| json!({"id": format!("p{}-{}", page, i), "title": "photo"}))
        .collect::<Vec<_>>())
}

fn queries(n: usize) -> Vec<QueryDescriptor> {
    (0..n)
        .map(|page| QueryDescriptor::new("photos").filter("page", FilterOp::Eq, page as u64))
        .collect()
}

fn bench_cached_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_get");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_50_record_page_cached", |b| {
        let store = CacheStore::new()
            .with_scope("photos", ScopeConfig::new(60 * 60_000, 200, false));
        let queries = queries(100);

        for (page, q) in queries.iter().enumerate() {
            store.set("photos", &photo_page(page), None, Some(q), Some("u1"));
        }

        let mut counter = 0;
        b.iter(|| {
            let q = &queries[counter % 100];
            black_box(store.get::<Value>("photos", Some(q), Some("u1")));
            counter += 1;
        });
    });

    group.finish();
}

fn bench_mixed_50_50(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("50_read_50_write", |b| {
        let store = CacheStore::new()
            .with_scope("photos", ScopeConfig::new(60 * 60_000, 200, false));
        let queries = queries(100);
        let page = photo_page(0);

        for q in &queries {
            store.set("photos", &page, None, Some(q), Some("u1"));
        }

        let mut counter = 0u64;
        b.iter(|| {
            let q = &queries[(counter as usize) % 100];
            if counter % 2 == 0 {
                black_box(store.get::<Value>("photos", Some(q), Some("u1")));
            } else {
                store.set("photos", &page, None, Some(q), Some("u1"));
            }
            counter += 1;
        });
    });

    group.finish();
}

fn bench_eviction_pressure(c: &mut Criterion) {
    let mut group = c.benchmark_group("eviction");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_over_capacity", |b| {
        // Small scope so every write runs the capacity eviction path
        let store = CacheStore::new()
            .with_scope("photos", ScopeConfig::new(60 * 60_000, 10, false));
        let queries = queries(100);
        let page = photo_page(0);

        let mut counter = 0;
        b.iter(|| {
            let q = &queries[counter % 100];
            store.set("photos", &page, None, Some(q), Some("u1"));
            counter += 1;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_cached_get,
    bench_mixed_50_50,
    bench_eviction_pressure
);
criterion_main!(benches);
