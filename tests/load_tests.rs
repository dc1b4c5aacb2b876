#[cfg(test)]
mod tests {
    use async_storm::{
        pool::{sleep, Config, Pool},
        reactor::Reactor,
    };
    use std::{
        cell::Cell,
        future::Future,
        rc::Rc,
        time::{Duration, Instant},
    };
    use tokio::task::LocalSet;

    async fn measure<F, Fut, T>(name: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let start = Instant::now();
        let result = f().await;
        let elapsed = start.elapsed();
        println!("✓ {}: {:?}", name, elapsed);
        result
    }

    #[tokio::test]
    async fn load_test_1_many_short_executions() {
        println!("\n=== LOAD TEST 1: 1k выполнений (по 1ms) на 16 воркерах ===");
        LocalSet::new()
            .run_until(async {
                let pool = Pool::<usize>::with_size(16).unwrap();

                measure("1k executions @ 1ms", || async {
                    for i in 0..1_000 {
                        pool.spawn(move || async move {
                            sleep(Duration::from_millis(1)).await;
                            Ok(i * 2)
                        })
                        .await
                        .unwrap();
                    }
                    pool.join_all().await.unwrap();
                })
                .await;

                let metrics = pool.metrics();
                assert_eq!(metrics.submitted, 1_000);
                assert_eq!(metrics.succeeded, 1_000);
                assert_eq!(metrics.queued, 0);
                let results: Vec<_> = pool.executions().iter().filter_map(|e| e.result()).collect();
                assert_eq!(results, (0..1_000).map(|i| i * 2).collect::<Vec<_>>());
                println!("  Успешность: {:.1}%", metrics.success_rate() * 100.0);
            })
            .await;
    }

    #[tokio::test]
    async fn load_test_2_concurrency_never_exceeds_pool_size() {
        println!("\n=== LOAD TEST 2: 200 выполнений, ограниченная конкурентность ===");
        for block_on_full in [false, true] {
            LocalSet::new()
                .run_until(async move {
                    let pool = Pool::<()>::new(Config::new(4).block_on_full(block_on_full)).unwrap();
                    let running = Rc::new(Cell::new(0usize));
                    let peak = Rc::new(Cell::new(0usize));

                    measure(&format!("200 executions, block_on_full={}", block_on_full), || async {
                        for _ in 0..200 {
                            let running = Rc::clone(&running);
                            let peak = Rc::clone(&peak);
                            pool.spawn(move || async move {
                                running.set(running.get() + 1);
                                peak.set(peak.get().max(running.get()));
                                sleep(Duration::from_millis(1)).await;
                                running.set(running.get() - 1);
                                Ok(())
                            })
                            .await
                            .unwrap();
                            if block_on_full {
                                assert_eq!(pool.metrics().queued, 0);
                            }
                        }
                        pool.join_all().await.unwrap();
                    })
                    .await;

                    assert_eq!(running.get(), 0);
                    assert_eq!(peak.get(), 4);
                    assert_eq!(pool.metrics().succeeded, 200);
                })
                .await;
        }
    }

    #[tokio::test]
    async fn load_test_3_mixed_timeouts() {
        println!("\n=== LOAD TEST 3: 100 выполнений, половина за дедлайном ===");
        LocalSet::new()
            .run_until(async {
                let pool = Pool::<u32>::new(
                    Config::new(8)
                        .timeout(Duration::from_millis(20))
                        .reraise_on_join(false)
                        .default_result(0),
                )
                .unwrap();

                measure("100 mixed executions", || async {
                    for i in 0..100u32 {
                        pool.spawn(move || async move {
                            let ms = if i % 2 == 0 { 1 } else { 200 };
                            sleep(Duration::from_millis(ms)).await;
                            Ok(i + 1)
                        })
                        .await
                        .unwrap();
                    }
                    pool.join_all().await.unwrap();
                })
                .await;

                let metrics = pool.metrics();
                assert_eq!(metrics.succeeded, 50);
                assert_eq!(metrics.timed_out, 50);
                assert_eq!(metrics.failed, 0);
                assert!(pool
                    .executions()
                    .iter()
                    .filter(|e| e.timed_out())
                    .all(|e| e.result() == Some(0)));
                println!("  По таймауту: {}/{}", metrics.timed_out, metrics.submitted);
            })
            .await;
    }

    #[test]
    fn load_test_4_reactor_driven() {
        println!("\n=== LOAD TEST 4: 500 выполнений на Reactor ===");
        let reactor = Reactor::new().unwrap();
        let total = reactor.block_on(async {
            let pool = Pool::<u64>::new(Config::per_cpu()).unwrap();
            for i in 0..500u64 {
                pool.spawn(move || async move {
                    tokio::task::yield_now().await;
                    Ok(i)
                })
                .await
                .unwrap();
            }
            pool.join_all().await.unwrap();
            pool.shutdown().await;
            pool.executions().iter().filter_map(|e| e.result()).sum::<u64>()
        });
        assert_eq!(total, (0..500).sum::<u64>());
    }
}
