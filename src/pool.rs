use super::{
    errors::{PoolError, PoolResult},
    execution::{Execution, ExecutionOptions},
    model::{PoolMetrics, State},
    profiling::profile,
    signal::WaitSignal,
    worker::Worker,
};
use crossbeam::queue::SegQueue;
use std::{
    cell::{Cell, RefCell},
    future::Future,
    rc::Rc,
    time::Duration,
};
use tracing::{debug, info, Level};

/// Конфигурация пула
pub struct Config<T> {
    pub pool_size: usize,
    /// `submit` ждёт свободного воркера вместо постановки в очередь за занятыми.
    pub block_on_full: bool,
    /// Опции для всех выполнений, которые не задали свои.
    pub execution: ExecutionOptions<T>,
}

impl<T> Default for Config<T> {
    fn default() -> Self {
        Self {
            pool_size: 2,
            block_on_full: false,
            execution: ExecutionOptions::default(),
        }
    }
}

impl<T: Clone> Clone for Config<T> {
    fn clone(&self) -> Self {
        Self {
            pool_size: self.pool_size,
            block_on_full: self.block_on_full,
            execution: self.execution.clone(),
        }
    }
}

impl<T: Clone> Config<T> {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            ..Default::default()
        }
    }

    pub fn per_cpu() -> Self {
        Self::new(num_cpus::get())
    }

    /// Читает `STORM_POOL_SIZE`, `STORM_BLOCK_ON_FULL` и `STORM_TIMEOUT_MS`.
    /// Отсутствующие или битые значения оставляют дефолты.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(size) = env_parse::<usize>("STORM_POOL_SIZE") {
            config.pool_size = size;
        }
        if let Some(block) = env_parse::<bool>("STORM_BLOCK_ON_FULL") {
            config.block_on_full = block;
        }
        if let Some(ms) = env_parse::<u64>("STORM_TIMEOUT_MS") {
            config.execution.timeout = Some(Some(Duration::from_millis(ms)));
        }
        config
    }

    pub fn block_on_full(mut self, block: bool) -> Self {
        self.block_on_full = block;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.execution.timeout = Some(Some(timeout));
        self
    }

    pub fn reraise_on_join(mut self, reraise: bool) -> Self {
        self.execution.reraise_on_join = Some(reraise);
        self
    }

    pub fn default_result(mut self, value: T) -> Self {
        self.execution.default_result = Some(value);
        self
    }

    pub fn on_state_enter<F>(mut self, state: State, callback: F) -> Self
    where
        F: Fn(&Execution<T>) -> anyhow::Result<()> + 'static,
    {
        self.execution = self.execution.on_state_enter(state, callback);
        self
    }
}

fn env_parse<V: std::str::FromStr>(key: &str) -> Option<V> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            debug!(key, %raw, "ignoring malformed environment value");
            None
        }
    }
}

/// Общее состояние пула и воркеров.
pub(crate) struct Shared<T> {
    pub(crate) queue: SegQueue<Execution<T>>,
    /// Сигналится, когда воркер освобождается; на нём держится `block_on_full`.
    pub(crate) capacity: WaitSignal,
    succeeded: Cell<usize>,
    failed: Cell<usize>,
    timed_out: Cell<usize>,
}

impl<T: Clone + 'static> Shared<T> {
    pub(crate) fn record(&self, execution: &Execution<T>) {
        let counter = if execution.timed_out() {
            &self.timed_out
        } else if execution.failed() {
            &self.failed
        } else {
            &self.succeeded
        };
        counter.set(counter.get() + 1);
    }
}

/// Кооперативный пул задач с фиксированным числом воркеров.
///
/// Всё выполняется на [`tokio::task::LocalSet`] текущего потока; пул нужно
/// создавать внутри него (см. [`crate::reactor`]).
pub struct Pool<T> {
    config: Config<T>,
    shared: Rc<Shared<T>>,
    workers: Vec<Rc<Worker>>,
    executions: RefCell<Vec<Execution<T>>>,
    submitted: Cell<usize>,
    closed: Cell<bool>,
}

impl<T: Clone + 'static> Pool<T> {
    pub fn new(config: Config<T>) -> PoolResult<Self> {
        if config.pool_size == 0 {
            return Err(PoolError::InvalidConfig("pool_size must be positive".into()));
        }

        let shared = Rc::new(Shared {
            queue: SegQueue::new(),
            capacity: WaitSignal::new(),
            succeeded: Cell::new(0),
            failed: Cell::new(0),
            timed_out: Cell::new(0),
        });
        let workers = (0..config.pool_size)
            .map(|id| Worker::spawn(id, Rc::clone(&shared)))
            .collect();

        info!(
            size = config.pool_size,
            block_on_full = config.block_on_full,
            timeout = ?config.execution.timeout.flatten(),
            "pool created"
        );

        Ok(Self {
            config,
            shared,
            workers,
            executions: RefCell::new(Vec::new()),
            submitted: Cell::new(0),
            closed: Cell::new(false),
        })
    }

    pub fn with_size(pool_size: usize) -> PoolResult<Self> {
        Self::new(Config::new(pool_size))
    }

    pub fn config(&self) -> &Config<T> {
        &self.config
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Новое выполнение с опциями пула, ещё не отправленное.
    pub fn execution(&self) -> Execution<T> {
        Execution::with_options(self.config.execution.clone())
    }

    /// Как [`execution`](Self::execution), но `options` приоритетнее.
    pub fn execution_with(&self, mut options: ExecutionOptions<T>) -> Execution<T> {
        options.inherit(&self.config.execution);
        Execution::with_options(options)
    }

    /// Оборачивает `work` в выполнение и отправляет его.
    pub async fn spawn<F, Fut>(&self, work: F) -> PoolResult<Execution<T>>
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        let execution = self.execution();
        execution.define(work);
        self.submit(execution).await
    }

    /// Ставит `execution` в очередь и отдаёт свободному воркеру, если он есть.
    ///
    /// С `block_on_full` сначала ждёт свободного воркера. Ждать может только
    /// один отправитель; второй получает [`PoolError::ConcurrentWait`].
    ///
    /// После пробуждения воркера отправитель один раз уступает управление,
    /// и воркер доводит выполнение до первой точки приостановки.
    pub async fn submit(&self, execution: Execution<T>) -> PoolResult<Execution<T>> {
        if self.closed.get() {
            return Err(PoolError::Closed);
        }
        if !execution.is_initialized() {
            return Err(PoolError::AlreadySubmitted(execution.id()));
        }
        execution.inherit_options(&self.config.execution);

        if self.config.block_on_full {
            while !self.has_idle_worker() {
                profile(
                    Level::DEBUG,
                    "submit blocked for %t",
                    self.shared.capacity.wait(),
                )
                .await?;
                if self.closed.get() {
                    return Err(PoolError::Closed);
                }
            }
        }

        execution.enter_state(State::Queued);
        self.executions.borrow_mut().push(execution.clone());
        self.shared.queue.push(execution.clone());
        self.submitted.set(self.submitted.get() + 1);
        debug!(execution = execution.id(), queued = self.shared.queue.len(), "submitted");

        if let Some(worker) = self.workers.iter().find(|worker| worker.is_available()) {
            worker.resume();
            tokio::task::yield_now().await;
        }
        Ok(execution)
    }

    /// Дожидается всех сохранённых выполнений в порядке отправки, включая
    /// отправленные во время ожидания.
    ///
    /// [`PoolError::ConcurrentWait`] возвращается сразу. Иначе дожидаемся всех
    /// и возвращаем первую проброшенную ошибку, если она была.
    pub async fn join_all(&self) -> PoolResult<()> {
        let mut first_failure = None;
        let mut next = 0;
        loop {
            // Список перечитываем после каждого join: он мог вырасти или очиститься
            let Some(execution) = self.executions.borrow().get(next).cloned() else {
                break;
            };
            next += 1;
            match execution.join().await {
                Ok(_) => {}
                Err(PoolError::ConcurrentWait) => return Err(PoolError::ConcurrentWait),
                Err(failure) => {
                    first_failure.get_or_insert(failure);
                }
            }
        }
        first_failure.map_or(Ok(()), Err)
    }

    /// Кооперативный sleep, поток не блокирует.
    pub async fn sleep(&self, duration: Duration) {
        sleep(duration).await
    }

    /// Удаляет и возвращает сохранённые выполнения, подходящие под `predicate`.
    /// Запущенные и стоящие в очереди продолжают работать.
    pub fn clear<P>(&self, mut predicate: P) -> Vec<Execution<T>>
    where
        P: FnMut(&Execution<T>) -> bool,
    {
        let all = std::mem::take(&mut *self.executions.borrow_mut());
        let (cleared, remaining): (Vec<_>, Vec<_>) =
            all.into_iter().partition(|execution| predicate(execution));
        self.executions.borrow_mut().extend(remaining);
        cleared
    }

    pub fn clear_all(&self) -> Vec<Execution<T>> {
        self.clear(|_| true)
    }

    /// Снимок сохранённых выполнений в порядке отправки.
    pub fn executions(&self) -> Vec<Execution<T>> {
        self.executions.borrow().clone()
    }

    pub fn has_idle_worker(&self) -> bool {
        self.workers.iter().any(|worker| worker.is_available())
    }

    pub fn metrics(&self) -> PoolMetrics {
        let busy_workers = self.workers.iter().filter(|w| w.is_busy()).count();
        PoolMetrics {
            busy_workers,
            idle_workers: self.workers.len() - busy_workers,
            queued: self.shared.queue.len(),
            submitted: self.submitted.get(),
            succeeded: self.shared.succeeded.get(),
            failed: self.shared.failed.get(),
            timed_out: self.shared.timed_out.get(),
        }
    }

    /// Закрывает пул для новых задач, даёт воркерам разобрать очередь и ждёт
    /// их завершения.
    pub async fn shutdown(&self) {
        self.closed.set(true);
        for worker in &self.workers {
            worker.stop();
        }
        // Будим заблокированного отправителя, чтобы он увидел закрытый пул
        self.shared.capacity.signal();

        for worker in &self.workers {
            if let Some(handle) = worker.take_handle() {
                if let Err(err) = handle.await {
                    debug!(%err, "worker task ended abnormally");
                }
            }
        }
        info!(submitted = self.submitted.get(), "pool shut down");
    }
}

impl<T> Drop for Pool<T> {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.stop();
        }
    }
}

/// Suspends the calling task for `duration` on the reactor's timer.
pub async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await
}
