use super::pool::Shared;
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};
use tokio::{sync::Notify, task::JoinHandle};
use tracing::debug;

/// One cooperative task bound to the pool's queue.
///
/// Runs at most one execution at a time and only dequeues the next one after
/// the current one has finished.
pub(crate) struct Worker {
    id: usize,
    busy: Cell<bool>,
    // Set by the pool when it dispatches to this worker, cleared once the
    // worker resumes. Keeps two submitters from picking the same worker.
    woken: Cell<bool>,
    stopped: Cell<bool>,
    notify: Notify,
    handle: RefCell<Option<JoinHandle<()>>>,
}

impl Worker {
    pub(crate) fn spawn<T: Clone + 'static>(id: usize, shared: Rc<Shared<T>>) -> Rc<Self> {
        let worker = Rc::new(Self {
            id,
            busy: Cell::new(false),
            woken: Cell::new(false),
            stopped: Cell::new(false),
            notify: Notify::new(),
            handle: RefCell::new(None),
        });
        let handle = tokio::task::spawn_local(Rc::clone(&worker).run(shared));
        *worker.handle.borrow_mut() = Some(handle);
        worker
    }

    async fn run<T: Clone + 'static>(self: Rc<Self>, shared: Rc<Shared<T>>) {
        debug!(worker = self.id, "worker started");
        loop {
            self.woken.set(false);
            if let Some(execution) = shared.queue.pop() {
                self.busy.set(true);
                debug!(worker = self.id, execution = execution.id(), "running execution");
                execution.run().await;
                self.busy.set(false);
                shared.record(&execution);
                continue;
            }
            if self.stopped.get() {
                break;
            }
            // Let a blocked submitter know there is capacity again.
            shared.capacity.signal();
            self.notify.notified().await;
        }
        debug!(worker = self.id, "worker stopped");
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.busy.get()
    }

    /// Idle, running, and not already dispatched to.
    pub(crate) fn is_available(&self) -> bool {
        !self.busy.get() && !self.woken.get() && !self.stopped.get()
    }

    pub(crate) fn resume(&self) {
        self.woken.set(true);
        self.notify.notify_one();
    }

    /// Asks the worker to exit at its next empty-queue check.
    pub(crate) fn stop(&self) {
        self.stopped.set(true);
        self.notify.notify_one();
    }

    pub(crate) fn take_handle(&self) -> Option<JoinHandle<()>> {
        self.handle.borrow_mut().take()
    }
}
