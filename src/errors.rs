use super::model::State;
use std::{any::Any, time::Duration};
use thiserror::Error;

pub type PoolResult<T> = Result<T, PoolError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Work exceeded its configured deadline.
    #[error("execution expired after {0:?}")]
    TimedOut(Duration),

    /// Work returned an error or panicked.
    #[error("work failed: {0}")]
    WorkFailed(String),

    /// A `WaitSignal` already had a live waiter.
    #[error("already waiting: a second concurrent wait on a single-waiter signal")]
    ConcurrentWait,

    /// A lifecycle callback returned an error or panicked.
    #[error("{state} callback failed: {message}")]
    CallbackFailed { state: State, message: String },

    #[error("execution #{0} was already submitted")]
    AlreadySubmitted(u64),

    #[error("pool is shut down")]
    Closed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PoolError {
    pub(crate) fn work(err: anyhow::Error) -> Self {
        PoolError::WorkFailed(format!("{err:#}"))
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        PoolError::WorkFailed(format!("panicked: {}", panic_message(payload.as_ref())))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PoolError::TimedOut(_))
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_error_keeps_context_chain() {
        let err = anyhow::anyhow!("connection reset").context("fetching page");
        assert_eq!(
            PoolError::work(err),
            PoolError::WorkFailed("fetching page: connection reset".into())
        );
    }

    #[test]
    fn panic_payloads_become_messages() {
        let err = PoolError::from_panic(Box::new("boom"));
        assert_eq!(err, PoolError::WorkFailed("panicked: boom".into()));

        let err = PoolError::from_panic(Box::new(String::from("owned boom")));
        assert_eq!(err, PoolError::WorkFailed("panicked: owned boom".into()));
    }
}
