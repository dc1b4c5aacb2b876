//! Single-threaded reactor the pool runs on.
//!
//! A thin layer over a tokio `current_thread` runtime and a [`LocalSet`]:
//! timers, next-tick callbacks, and "run until stopped". Everything in this
//! crate that spawns tasks expects to be running inside it.

use super::errors::{PoolError, PoolResult};
use std::{future::Future, time::Duration};
use tokio::{
    runtime::{Builder, Runtime},
    task::{JoinHandle, LocalSet},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct Reactor {
    // Dropped before the runtime so pending local tasks release their timers first.
    local: LocalSet,
    runtime: Runtime,
    stop: CancellationToken,
}

impl Reactor {
    pub fn new() -> PoolResult<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| PoolError::InvalidConfig(format!("reactor runtime: {e}")))?;
        Ok(Self {
            local: LocalSet::new(),
            runtime,
            stop: CancellationToken::new(),
        })
    }

    /// Drives `fut` to completion, together with every local task it spawns.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.local.block_on(&self.runtime, fut)
    }

    /// Spawns `entry` and keeps the reactor running until [`stop`](Self::stop)
    /// is called, whether or not `entry` has finished.
    pub fn run_until_stopped<F>(&self, entry: F)
    where
        F: Future<Output = ()> + 'static,
    {
        let stop = self.stop.clone();
        self.block_on(async move {
            tokio::task::spawn_local(entry);
            stop.cancelled().await;
        });
        debug!("reactor stopped");
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// A handle that stops this reactor from inside a task.
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }
}

/// Runs `fut` on a fresh reactor.
pub fn run<F: Future>(fut: F) -> PoolResult<F::Output> {
    Ok(Reactor::new()?.block_on(fut))
}

/// Pending callback created by [`after`].
pub struct Timer {
    handle: JoinHandle<()>,
}

impl Timer {
    /// Prevents the callback from running if it has not fired yet.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Runs `callback` once `duration` has elapsed.
pub fn after<F>(duration: Duration, callback: F) -> Timer
where
    F: FnOnce() + 'static,
{
    let handle = tokio::task::spawn_local(async move {
        tokio::time::sleep(duration).await;
        callback();
    });
    Timer { handle }
}

/// Runs `callback` on a later scheduling tick, after the current task yields.
pub fn next_tick<F>(callback: F)
where
    F: FnOnce() + 'static,
{
    tokio::task::spawn_local(async move {
        tokio::task::yield_now().await;
        callback();
    });
}
