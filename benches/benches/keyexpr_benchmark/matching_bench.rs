use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use zmesh::{matches, KeyExprRegistry};

const KEY: &str = "demo/building/floor3/room12/sensor/temp";

fn bench_matches(c: &mut Criterion) {
    let mut group = c.benchmark_group("matches");
    for pattern in [
        KEY,
        "demo/*/floor3/*/sensor/temp",
        "demo/**",
        "**/temp",
        "demo/**/room12/**/temp",
        "other/**",
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(pattern), pattern, |b, pattern| {
            b.iter(|| matches(black_box(KEY), black_box(pattern)))
        });
    }
    group.finish();
}

fn bench_intern(c: &mut Criterion) {
    let registry = KeyExprRegistry::new();
    registry.intern(KEY).unwrap();

    c.bench_function("intern_existing", |b| {
        b.iter(|| registry.intern(black_box(KEY)).unwrap())
    });

    let keys: Vec<String> = (0..1024).map(|i| format!("demo/bench/{i}")).collect();
    c.bench_function("intern_fresh_registry_1k", |b| {
        b.iter(|| {
            let registry = KeyExprRegistry::new();
            for key in &keys {
                black_box(registry.intern(key).unwrap());
            }
        })
    });
}

criterion_group!(benches, bench_matches, bench_intern);
criterion_main!(benches);
