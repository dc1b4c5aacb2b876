//! Cooperative deadline for a unit of work.
//!
//! The work runs on its own local task (the racer) while the caller waits on
//! whichever finishes first: the racer or a deadline timer. When the timer
//! wins, the racer is abandoned through a [`CancellationToken`]: it never
//! reports back, and its work future is dropped at the next point where it
//! suspends.
//!
//! # Limitations
//!
//! Scheduling is cooperative. Work that never awaits cannot be interrupted;
//! it runs to completion on the racer's first poll, reports back before the
//! caller observes the timer, and its result is accepted even if it overran
//! the deadline. Work that does suspend may still hold whatever it acquired
//! up to that point until the racer is next polled, so it must be safe to
//! abandon.
//!
//! Both functions must be called from within a [`tokio::task::LocalSet`].

use super::errors::{PoolError, PoolResult};
use futures::FutureExt;
use std::{future::Future, panic::AssertUnwindSafe, time::Duration};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Runs `work` under a deadline of `duration`.
///
/// Returns the work's output, the error it raised, or
/// [`PoolError::TimedOut`] if the deadline elapsed first.
pub async fn timeout<T, F, Fut>(duration: Duration, work: F) -> PoolResult<T>
where
    T: 'static,
    F: FnOnce() -> Fut + 'static,
    Fut: Future<Output = anyhow::Result<T>> + 'static,
{
    let token = CancellationToken::new();
    // Abandons the racer on timeout, and also if this future is dropped.
    let guard = token.clone().drop_guard();
    let (tx, rx) = oneshot::channel::<PoolResult<T>>();

    tokio::task::spawn_local(race(token, tx, work));

    let deadline = tokio::time::sleep(duration);
    tokio::select! {
        biased;
        reported = rx => {
            guard.disarm();
            reported.unwrap_or_else(|_| {
                Err(PoolError::WorkFailed("racer exited without reporting".into()))
            })
        }
        _ = deadline => {
            debug!(?duration, "deadline reached, abandoning racer");
            drop(guard);
            Err(PoolError::TimedOut(duration))
        }
    }
}

/// Same as [`timeout`] but takes the deadline in seconds.
pub async fn timeout_secs<T, F, Fut>(seconds: f64, work: F) -> PoolResult<T>
where
    T: 'static,
    F: FnOnce() -> Fut + 'static,
    Fut: Future<Output = anyhow::Result<T>> + 'static,
{
    let duration = Duration::try_from_secs_f64(seconds)
        .map_err(|e| PoolError::InvalidConfig(format!("timeout of {seconds}s: {e}")))?;
    timeout(duration, work).await
}

async fn race<T, F, Fut>(token: CancellationToken, tx: oneshot::Sender<PoolResult<T>>, work: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => {
            trace!("abandoned racer dropped its work");
            return;
        }
        caught = AssertUnwindSafe(async move { work().await }).catch_unwind() => match caught {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(PoolError::work(err)),
            Err(payload) => Err(PoolError::from_panic(payload)),
        },
    };

    // An abandoned racer never resumes its caller.
    if token.is_cancelled() {
        trace!("abandoned racer finished late; outcome discarded");
        return;
    }
    let _ = tx.send(outcome);
}
