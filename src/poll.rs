//! Tick-driven wait primitive shared by the polling stages.
//!
//! A [`Ticker`] races three events: the next tick, cancellation of the run, and
//! an optional deadline. Cancellation wins ties, then the deadline, then the tick.

use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Shortest accepted tick period; `tokio::time::interval` rejects zero.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Why a wait ended before its tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// The run's cancellation token fired
    Cancelled,
    /// The ticker's deadline passed
    DeadlineExceeded,
}

/// Repeating timer with an optional overall deadline
///
/// The first tick fires one full period after construction, so a loop of
/// `tick()` followed by one provider call never busy-polls.
#[derive(Debug)]
pub struct Ticker {
    interval: Interval,
    deadline: Option<Instant>,
}

impl Ticker {
    /// Create a ticker firing every `period`, giving up after `timeout` if set
    pub fn new(period: Duration, timeout: Option<Duration>) -> Self {
        let period = period.max(MIN_PERIOD);
        let start = Instant::now();
        let mut interval = tokio::time::interval_at(start + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            interval,
            deadline: timeout.map(|t| start + t),
        }
    }

    /// Wait for the next tick
    pub async fn tick(&mut self, cancel: &CancellationToken) -> Result<(), Interrupt> {
        let deadline = self.deadline;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Interrupt::Cancelled),
            _ = wait_until(deadline) => Err(Interrupt::DeadlineExceeded),
            _ = self.interval.tick() => Ok(()),
        }
    }

    /// Run `fut` to completion unless cancellation or the deadline comes first
    pub async fn guard<F: Future>(
        &self,
        cancel: &CancellationToken,
        fut: F,
    ) -> Result<F::Output, Interrupt> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Interrupt::Cancelled),
            _ = wait_until(self.deadline) => Err(Interrupt::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}

/// Run `fut` to completion unless `cancel` fires first
pub async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, Interrupt> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        out = fut => Ok(out),
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
