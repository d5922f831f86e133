//! Cancellable wait-until-ready primitive.
//!
//! Used for both the remote store readiness wait and the identity wait. A
//! waiter re-probes its condition whenever it is woken by a notification,
//! on every poll tick, and once more at the deadline. Whichever trigger
//! observes the condition first completes the wait; later triggers have
//! nothing left to wake.

use std::future::pending;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// How long and how often to probe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Re-probe on this interval as a fallback for missed notifications.
    pub poll_interval: Option<Duration>,
    /// Give up after this long. `None` waits until cancelled.
    pub timeout: Option<Duration>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("Wait cancelled")]
    Cancelled,
    #[error("Timed out after {0:?}")]
    TimedOut(Duration),
}

/// Wait until `probe` yields a value.
///
/// `wake` is notified by the caller's event source. `Notify` keeps a permit
/// when nobody is waiting, so a notification racing the probe is not lost.
pub async fn wait_until_ready<T, F>(
    mut probe: F,
    wake: &Notify,
    policy: WaitPolicy,
    cancel: &CancellationToken,
) -> Result<T, WaitError>
where
    F: FnMut() -> Option<T>,
{
    let deadline = policy.timeout.map(|t| Instant::now() + t);
    let mut ticker = policy.poll_interval.map(|period| {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    });

    loop {
        if let Some(value) = probe() {
            return Ok(value);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WaitError::Cancelled),
            _ = wake.notified() => {}
            _ = tick(&mut ticker) => {}
            _ = expire(deadline) => {
                return match probe() {
                    Some(value) => Ok(value),
                    None => Err(WaitError::TimedOut(policy.timeout.unwrap_or_default())),
                };
            }
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending::<()>().await,
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}
