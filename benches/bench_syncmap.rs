use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use syncmap::*;

fn criterion_benchmark(c: &mut Criterion) {
    let count = 1 << 20;
    c.bench_with_input(
        BenchmarkId::new("insert_into_syncmap", count),
        &count,
        |b, &count| {
            b.iter(|| {
                let map = SyncMap::with_capacity(1 << 15);
                for i in 0..count {
                    map.set(i, i);
                }
            })
        },
    );

    let map = SyncMap::from_map((0..1 << 16).map(|i| (i, i)));
    c.bench_function("live_iter_sorted", |b| {
        b.iter(|| {
            let mut it = map.iter_by(|a, b| a < b);
            let mut sum = 0u64;
            while it.next() {
                sum += *it.val().unwrap() as u64;
            }
            it.close();
            sum
        })
    });
    c.bench_function("snapshot_iter", |b| {
        b.iter(|| {
            let mut it = map.snapshot();
            let mut sum = 0u64;
            while it.next() {
                sum += *it.val().unwrap() as u64;
            }
            sum
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
