use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use zmesh::{DeliveryMode, Domain, SessionConfig};

fn bench_put_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_push");
    for subscribers in [0usize, 1, 10, 100] {
        let session = Domain::new().open(SessionConfig::default());
        for i in 0..subscribers {
            let pattern = if i % 2 == 0 { "bench/*" } else { "bench/**" };
            session
                .declare_subscription(
                    pattern,
                    DeliveryMode::push(|sample| {
                        black_box(sample.payload.len());
                        Ok(())
                    }),
                )
                .unwrap();
        }
        let publication = session
            .declare_publication(session.intern("bench/key").unwrap())
            .unwrap();

        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, _| b.iter(|| session.put(publication, black_box(&b"payload"[..])).unwrap()),
        );
    }
    group.finish();
}

fn bench_put_pull_overflow(c: &mut Criterion) {
    let session = Domain::new().open(SessionConfig::default());
    session
        .declare_subscription("bench/**", DeliveryMode::pull_with_capacity(64))
        .unwrap();
    let publication = session
        .declare_publication(session.intern("bench/pull/key").unwrap())
        .unwrap();

    c.bench_function("put_pull_drop_oldest", |b| {
        b.iter(|| session.put(publication, black_box(&b"payload"[..])).unwrap())
    });
}

fn bench_declare_undeclare(c: &mut Criterion) {
    let session = Domain::new().open(SessionConfig::default());
    c.bench_function("declare_undeclare_subscription", |b| {
        b.iter(|| {
            let sub = session
                .declare_subscription("bench/*", DeliveryMode::pull())
                .unwrap();
            session.undeclare(sub).unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_put_push,
    bench_put_pull_overflow,
    bench_declare_undeclare
);
criterion_main!(benches);
