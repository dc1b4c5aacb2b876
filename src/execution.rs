use super::{
    errors::{panic_message, PoolError, PoolResult},
    model::State,
    signal::WaitSignal,
    timeout,
};
use futures::{future::LocalBoxFuture, FutureExt};
use std::{
    any::Any,
    cell::RefCell,
    collections::BTreeMap,
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};
use tracing::{debug, trace, warn};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type Work<T> = Box<dyn FnOnce() -> LocalBoxFuture<'static, anyhow::Result<T>>>;

/// Hook invoked each time an execution enters a state.
pub type StateCallback<T> = Rc<dyn Fn(&Execution<T>) -> anyhow::Result<()>>;

/// One optional callback per lifecycle state, indexed by [`State::index`].
pub struct Callbacks<T> {
    table: [Option<StateCallback<T>>; 4],
}

impl<T> Callbacks<T> {
    pub fn get(&self, state: State) -> Option<StateCallback<T>> {
        self.table[state.index()].clone()
    }

    pub fn set(&mut self, state: State, callback: StateCallback<T>) {
        self.table[state.index()] = Some(callback);
    }

    /// Fills every empty slot from `fallback`.
    fn inherit(&mut self, fallback: &Callbacks<T>) {
        for (slot, inherited) in self.table.iter_mut().zip(fallback.table.iter()) {
            if slot.is_none() {
                *slot = inherited.clone();
            }
        }
    }
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Self {
            table: [None, None, None, None],
        }
    }
}

impl<T> Clone for Callbacks<T> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
        }
    }
}

/// Per-execution options. Unset fields are inherited from the pool at
/// submission time.
pub struct ExecutionOptions<T> {
    /// `None` inherits the pool deadline, `Some(None)` runs without one.
    pub timeout: Option<Option<Duration>>,
    pub default_result: Option<T>,
    pub reraise_on_join: Option<bool>,
    pub callbacks: Callbacks<T>,
}

impl<T> Default for ExecutionOptions<T> {
    fn default() -> Self {
        Self {
            timeout: None,
            default_result: None,
            reraise_on_join: None,
            callbacks: Callbacks::default(),
        }
    }
}

impl<T: Clone> Clone for ExecutionOptions<T> {
    fn clone(&self) -> Self {
        Self {
            timeout: self.timeout,
            default_result: self.default_result.clone(),
            reraise_on_join: self.reraise_on_join,
            callbacks: self.callbacks.clone(),
        }
    }
}

impl<T: Clone> ExecutionOptions<T> {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(Some(timeout));
        self
    }

    /// Runs without a deadline even when the pool sets one.
    pub fn no_timeout(mut self) -> Self {
        self.timeout = Some(None);
        self
    }

    pub fn default_result(mut self, value: T) -> Self {
        self.default_result = Some(value);
        self
    }

    pub fn reraise_on_join(mut self, reraise: bool) -> Self {
        self.reraise_on_join = Some(reraise);
        self
    }

    pub fn on_state_enter<F>(mut self, state: State, callback: F) -> Self
    where
        F: Fn(&Execution<T>) -> anyhow::Result<()> + 'static,
    {
        self.callbacks.set(state, Rc::new(callback));
        self
    }

    /// Own values win; anything unset is taken from `fallback`.
    pub(crate) fn inherit(&mut self, fallback: &ExecutionOptions<T>) {
        self.timeout = self.timeout.or(fallback.timeout);
        if self.default_result.is_none() {
            self.default_result = fallback.default_result.clone();
        }
        self.reraise_on_join = self.reraise_on_join.or(fallback.reraise_on_join);
        self.callbacks.inherit(&fallback.callbacks);
    }
}

struct Core<T> {
    work: Option<Work<T>>,
    arg_count: usize,
    args: Option<Rc<dyn Any>>,
    options: ExecutionOptions<T>,
    state: State,
    entered_at: [Option<Instant>; 4],
    result: Option<T>,
    failure: Option<PoolError>,
    callback_errors: BTreeMap<State, PoolError>,
}

struct Inner<T> {
    id: u64,
    core: RefCell<Core<T>>,
    done: WaitSignal,
}

/// A unit of deferred work and its lifecycle.
///
/// `Execution` is a cheap handle: clones share the same state. The pool and
/// the worker running it hold clones; callers keep one to `join` it and
/// inspect the outcome.
pub struct Execution<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for Execution<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> Default for Execution<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> Execution<T> {
    /// An execution with no work and no options. Give it work with
    /// [`define`](Self::define) before submitting.
    pub fn new() -> Self {
        Self::with_options(ExecutionOptions::default())
    }

    pub fn with_options(options: ExecutionOptions<T>) -> Self {
        let execution = Self {
            inner: Rc::new(Inner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                core: RefCell::new(Core {
                    work: None,
                    arg_count: 0,
                    args: None,
                    options,
                    state: State::Initialized,
                    entered_at: [None; 4],
                    result: None,
                    failure: None,
                    callback_errors: BTreeMap::new(),
                }),
                done: WaitSignal::new(),
            }),
        };
        execution.enter_state(State::Initialized);
        execution
    }

    pub fn from_fn<F, Fut>(work: F) -> Self
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        let execution = Self::new();
        execution.define(work);
        execution
    }

    /// Sets the work to run. Has no effect once the execution has started.
    pub fn define<F, Fut>(&self, work: F) -> &Self
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        self.store_work(0, None, Box::new(move || work().boxed_local()))
    }

    /// Sets the work together with its ordered arguments. A copy of the
    /// arguments stays readable through [`args`](Self::args).
    pub fn define_with_args<A, F, Fut>(&self, args: Vec<A>, work: F) -> &Self
    where
        A: Clone + 'static,
        F: FnOnce(Vec<A>) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        let kept: Rc<dyn Any> = Rc::new(args.clone());
        self.store_work(
            args.len(),
            Some(kept),
            Box::new(move || work(args).boxed_local()),
        )
    }

    fn store_work(&self, arg_count: usize, args: Option<Rc<dyn Any>>, work: Work<T>) -> &Self {
        let mut core = self.inner.core.borrow_mut();
        if core.state >= State::Started {
            warn!(execution = self.inner.id, "define after start ignored");
            return self;
        }
        core.work = Some(work);
        core.arg_count = arg_count;
        core.args = args;
        self
    }

    pub(crate) fn inherit_options(&self, fallback: &ExecutionOptions<T>) {
        self.inner.core.borrow_mut().options.inherit(fallback);
    }

    /// Runs the work to completion. Called once by the worker that dequeued
    /// this execution.
    pub(crate) async fn run(&self) {
        let (work, limit) = {
            let mut core = self.inner.core.borrow_mut();
            (core.work.take(), core.options.timeout.flatten())
        };
        self.enter_state(State::Started);

        let outcome = match (work, limit) {
            (None, _) => Ok(None),
            (Some(work), Some(limit)) => timeout::timeout(limit, work).await.map(Some),
            (Some(work), None) => match AssertUnwindSafe(async move { work().await })
                .catch_unwind()
                .await
            {
                Ok(Ok(value)) => Ok(Some(value)),
                Ok(Err(err)) => Err(PoolError::work(err)),
                Err(payload) => Err(PoolError::from_panic(payload)),
            },
        };

        {
            let mut core = self.inner.core.borrow_mut();
            match outcome {
                Ok(value) => core.result = value,
                Err(failure) => {
                    debug!(execution = self.inner.id, %failure, "execution failed");
                    core.result = core.options.default_result.clone();
                    core.failure = Some(failure);
                }
            }
        }

        self.enter_state(State::Finished);
        self.inner.done.signal();
    }

    /// Waits for the execution to finish.
    ///
    /// Returns the result, or the captured failure when `reraise_on_join` is
    /// enabled (the default). Joining a finished execution returns at once.
    pub async fn join(&self) -> PoolResult<Option<T>> {
        if !self.is_finished() {
            self.inner.done.wait().await?;
        }
        let core = self.inner.core.borrow();
        match &core.failure {
            Some(failure) if core.options.reraise_on_join.unwrap_or(true) => Err(failure.clone()),
            _ => Ok(core.result.clone()),
        }
    }

    pub(crate) fn enter_state(&self, state: State) {
        let callback = {
            let mut core = self.inner.core.borrow_mut();
            if core.entered_at[state.index()].is_some() || (state < core.state) {
                warn!(execution = self.inner.id, from = %core.state, to = %state, "backward or repeated transition ignored");
                return;
            }
            core.state = state;
            core.entered_at[state.index()] = Some(Instant::now());
            core.options.callbacks.get(state)
        };
        trace!(execution = self.inner.id, %state, "entered state");

        let Some(callback) = callback else {
            return;
        };
        let message = match std::panic::catch_unwind(AssertUnwindSafe(|| callback(self))) {
            Ok(Ok(())) => return,
            Ok(Err(err)) => format!("{err:#}"),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };
        warn!(execution = self.inner.id, %state, %message, "state callback failed");
        self.inner
            .core
            .borrow_mut()
            .callback_errors
            .insert(state, PoolError::CallbackFailed { state, message });
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn arg_count(&self) -> usize {
        self.inner.core.borrow().arg_count
    }

    /// Arguments given to [`define_with_args`](Self::define_with_args).
    /// `None` if the work was defined without arguments or `A` is not their type.
    pub fn args<A: Clone + 'static>(&self) -> Option<Vec<A>> {
        let core = self.inner.core.borrow();
        core.args.as_ref()?.downcast_ref::<Vec<A>>().cloned()
    }

    pub fn state(&self) -> State {
        self.inner.core.borrow().state
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == State::Initialized
    }

    pub fn is_queued(&self) -> bool {
        self.state() == State::Queued
    }

    pub fn is_started(&self) -> bool {
        self.state() == State::Started
    }

    pub fn is_finished(&self) -> bool {
        self.state() == State::Finished
    }

    /// Finished without an error or timeout.
    pub fn succeeded(&self) -> bool {
        let core = self.inner.core.borrow();
        core.state == State::Finished && core.failure.is_none()
    }

    pub fn timed_out(&self) -> bool {
        let core = self.inner.core.borrow();
        core.state == State::Finished && core.failure.as_ref().is_some_and(PoolError::is_timeout)
    }

    /// Finished with an error raised by the work (timeouts excluded).
    pub fn failed(&self) -> bool {
        let core = self.inner.core.borrow();
        core.state == State::Finished
            && core.failure.as_ref().is_some_and(|failure| !failure.is_timeout())
    }

    pub fn result(&self) -> Option<T> {
        self.inner.core.borrow().result.clone()
    }

    pub fn failure(&self) -> Option<PoolError> {
        self.inner.core.borrow().failure.clone()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.inner.core.borrow().options.timeout.flatten()
    }

    pub fn state_at(&self, state: State) -> Option<Instant> {
        self.inner.core.borrow().entered_at[state.index()]
    }

    /// Time spent in `state`: elapsed so far if it is the current state, the
    /// gap to the next recorded state if it is behind us, `None` otherwise.
    pub fn duration(&self, state: State) -> Option<Duration> {
        let core = self.inner.core.borrow();
        let entered = core.entered_at[state.index()]?;
        if state == core.state {
            return Some(entered.elapsed());
        }
        if state > core.state {
            return None;
        }
        core.entered_at[state.index() + 1..]
            .iter()
            .flatten()
            .next()
            .map(|next| next.saturating_duration_since(entered))
    }

    pub fn has_callback_error(&self) -> bool {
        !self.inner.core.borrow().callback_errors.is_empty()
    }

    pub fn callback_error(&self, state: State) -> Option<PoolError> {
        self.inner.core.borrow().callback_errors.get(&state).cloned()
    }

    pub fn callback_errors(&self) -> BTreeMap<State, PoolError> {
        self.inner.core.borrow().callback_errors.clone()
    }
}

impl<T> fmt::Debug for Execution<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.borrow();
        f.debug_struct("Execution")
            .field("id", &self.inner.id)
            .field("state", &core.state)
            .field("failure", &core.failure)
            .finish_non_exhaustive()
    }
}
