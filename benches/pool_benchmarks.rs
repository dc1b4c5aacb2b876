use async_storm::{reactor::Reactor, Config, Pool};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use tokio::time::Duration;

// Benchmark 1: submit + join overhead for work that never suspends
fn bench_submit_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_overhead");
    let reactor = Reactor::new().unwrap();

    for size in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(size as u64));

        for workers in [1, 4, 16] {
            group.bench_with_input(
                BenchmarkId::new(format!("workers_{}", workers), size),
                &size,
                |b, &size| {
                    b.iter(|| {
                        reactor.block_on(async {
                            let pool = Pool::<usize>::with_size(workers).unwrap();
                            for i in 0..size {
                                pool.spawn(move || async move { Ok(black_box(i)) })
                                    .await
                                    .unwrap();
                            }
                            pool.join_all().await.unwrap();
                        })
                    });
                },
            );
        }
    }
    group.finish();
}

// Benchmark 2: blocking admission versus queueing for work that yields once
fn bench_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission");
    let reactor = Reactor::new().unwrap();

    for block_on_full in [false, true] {
        group.bench_function(BenchmarkId::new("block_on_full", block_on_full), |b| {
            b.iter(|| {
                reactor.block_on(async {
                    let pool = Pool::<()>::new(Config::new(8).block_on_full(block_on_full)).unwrap();
                    for _ in 0..1000 {
                        pool.spawn(|| async {
                            tokio::task::yield_now().await;
                            Ok(())
                        })
                        .await
                        .unwrap();
                    }
                    pool.join_all().await.unwrap();
                })
            });
        });
    }
    group.finish();
}

// Benchmark 3: cost of running every execution under a deadline
fn bench_timeout_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("timeout_overhead");
    let reactor = Reactor::new().unwrap();

    for timeout in [None, Some(Duration::from_secs(1))] {
        let label = if timeout.is_some() { "with_timeout" } else { "without_timeout" };
        group.bench_function(label, |b| {
            b.iter(|| {
                reactor.block_on(async {
                    let mut config = Config::<u32>::new(8);
                    if let Some(timeout) = timeout {
                        config = config.timeout(timeout);
                    }
                    let pool = Pool::new(config).unwrap();
                    for i in 0..1000u32 {
                        pool.spawn(move || async move { Ok(black_box(i)) }).await.unwrap();
                    }
                    pool.join_all().await.unwrap();
                })
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_submit_overhead, bench_admission, bench_timeout_overhead);
criterion_main!(benches);
