//! First-level cache merge benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use repotx_bench::utils::{generate_items, shuffled_ids};
use repotx_core::TxManager;
use repotx_testkit::{Item, TestRepository};
use std::collections::HashSet;

/// Benchmark `find_many` with a cold cache and with every id cached.
fn bench_find_many(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_many");

    for count in [10, 100, 1000] {
        let items = generate_items(count);
        let ids: HashSet<_> = shuffled_ids(&items).into_iter().collect();
        let env = TestRepository::seeded(items);
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("cold", count), &ids, |b, ids| {
            b.iter(|| {
                let found = env.tx(|tx| tx.table::<Item>().find_many(ids)).unwrap();
                black_box(found);
            });
        });

        group.bench_with_input(BenchmarkId::new("warm", count), &ids, |b, ids| {
            b.iter(|| {
                let found = env
                    .tx(|tx| {
                        let table = tx.table::<Item>();
                        table.find_many(ids)?;
                        table.find_many(ids)
                    })
                    .unwrap();
                black_box(found);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_find_many);
criterion_main!(benches);
