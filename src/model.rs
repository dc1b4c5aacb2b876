use std::{fmt, str::FromStr};

use super::errors::PoolError;

/// Lifecycle state of an [`Execution`](crate::execution::Execution).
///
/// States only ever move forward, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    Initialized,
    Queued,
    Started,
    Finished,
}

impl State {
    pub const ALL: [State; 4] = [
        State::Initialized,
        State::Queued,
        State::Started,
        State::Finished,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            State::Initialized => "initialized",
            State::Queued => "queued",
            State::Started => "started",
            State::Finished => "finished",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for State {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        State::ALL
            .into_iter()
            .find(|state| state.name() == s)
            .ok_or_else(|| PoolError::InvalidConfig(format!("unknown state name: {s}")))
    }
}

#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub busy_workers: usize,
    pub idle_workers: usize,
    pub queued: usize,
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl PoolMetrics {
    pub fn utilization(&self) -> f64 {
        if self.busy_workers + self.idle_workers == 0 {
            return 0.0;
        }
        self.busy_workers as f64 / (self.busy_workers + self.idle_workers) as f64
    }

    pub fn finished(&self) -> usize {
        self.succeeded + self.failed + self.timed_out
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.finished();
        if total == 0 {
            return 1.0;
        }
        self.succeeded as f64 / total as f64
    }
}
