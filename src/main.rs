use async_storm::{reactor, Config, Pool, State};
use std::{cell::Cell, rc::Rc, time::{Duration, Instant}};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "async_storm=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::<usize>::from_env()
        .on_state_enter(State::Finished, |execution| {
            tracing::info!(
                execution = execution.id(),
                ran_for = ?execution.duration(State::Started),
                "finished"
            );
            Ok(())
        });

    reactor::run(async move {
        let now = Instant::now();
        let pool = Pool::new(config)?;
        let done = Rc::new(Cell::new(0));

        for i in 0..20 {
            let done = Rc::clone(&done);
            pool.spawn(move || async move {
                async_storm::sleep(Duration::from_millis(10 * (i % 5) as u64)).await;
                done.set(done.get() + 1);
                Ok(i)
            })
            .await?;
        }
        pool.join_all().await?;
        pool.shutdown().await;

        let metrics = pool.metrics();
        tracing::info!(
            completed = done.get(),
            success_rate = metrics.success_rate(),
            elapsed = ?now.elapsed(),
            "demo finished"
        );
        Ok::<_, anyhow::Error>(())
    })?
}
