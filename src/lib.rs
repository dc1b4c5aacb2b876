//! Кооперативный пул задач с ограниченной конкурентностью
//!
//! # Features
//! - Фиксированное число воркеров, одна FIFO-очередь
//! - Опциональное блокирующее добавление, когда все воркеры заняты
//! - Жизненный цикл выполнения с callback'ами на состояния и таймстемпами
//! - Кооперативные таймауты с отбрасыванием зависшей работы
//! - Однопоточный: все задачи крутятся на одном tokio `LocalSet`

pub mod errors;
pub mod execution;
pub mod model;
pub mod pool;
pub mod profiling;
pub mod reactor;
pub mod signal;
pub mod timeout;
mod worker;

pub use errors::{PoolError, PoolResult};
pub use execution::{Execution, ExecutionOptions};
pub use model::{PoolMetrics, State};
pub use pool::{sleep, Config, Pool};
pub use reactor::Reactor;
pub use signal::WaitSignal;
