use super::errors::{PoolError, PoolResult};
use std::cell::RefCell;
use tokio::sync::oneshot;
use tracing::error;

/// Single-waiter suspend/resume primitive.
///
/// `wait` parks the calling task until `signal` is called. The waiter is not
/// resumed inline: `signal` only wakes it, and the reactor polls it again on
/// a later tick.
///
/// At most one task may wait at a time. A second concurrent `wait` fails with
/// [`PoolError::ConcurrentWait`] instead of replacing the first waiter.
#[derive(Debug, Default)]
pub struct WaitSignal {
    waiter: RefCell<Option<oneshot::Sender<()>>>,
}

impl WaitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live waiter is currently parked on this signal.
    pub fn is_waiting(&self) -> bool {
        self.waiter
            .borrow()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    pub async fn wait(&self) -> PoolResult<()> {
        let rx = {
            let mut slot = self.waiter.borrow_mut();
            // A closed sender means the previous waiter was dropped unsignaled.
            if slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
                error!("second concurrent wait on a single-waiter signal");
                return Err(PoolError::ConcurrentWait);
            }
            let (tx, rx) = oneshot::channel();
            *slot = Some(tx);
            rx
        };

        // The sender only disappears through `signal` or by dropping the
        // signal itself; both end the wait.
        let _ = rx.await;
        Ok(())
    }

    /// Schedules the waiter, if any, to resume. Returns whether one was woken.
    pub fn signal(&self) -> bool {
        match self.waiter.borrow_mut().take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}
