//! Bounded polling with exponential backoff.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::orchestrator::interrupt::InterruptFlag;

/// Poll schedule: start at `initial`, double up to `max`, give up after `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub total: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, total: Duration) -> Self {
        Self { initial, max, total }
    }

    /// Delay after `attempt` (0-based) unsuccessful checks.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial.saturating_mul(factor).min(self.max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut,
    Interrupted,
}

/// Call `check` until it yields a value, the budget runs out, or the
/// interrupt flag is raised. Probe errors are returned immediately.
pub async fn poll_until<T, E, F, Fut>(
    backoff: Backoff,
    interrupt: &InterruptFlag,
    mut check: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let deadline = Instant::now() + backoff.total;
    let mut attempt = 0;
    loop {
        if interrupt.is_raised() {
            return Ok(PollOutcome::Interrupted);
        }
        if let Some(value) = check().await? {
            return Ok(PollOutcome::Ready(value));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(PollOutcome::TimedOut);
        }
        let delay = backoff.delay(attempt).min(deadline - now);
        debug!(attempt, delay_secs = delay.as_secs(), "Not ready; polling again");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> Backoff {
        Backoff::new(Duration::from_millis(1), Duration::from_millis(4), Duration::from_millis(200))
    }

    #[test]
    fn delay_doubles_and_caps() {
        let b = Backoff::new(Duration::from_secs(15), Duration::from_secs(120), Duration::from_secs(1800));
        assert_eq!(b.delay(0), Duration::from_secs(15));
        assert_eq!(b.delay(1), Duration::from_secs(30));
        assert_eq!(b.delay(3), Duration::from_secs(120));
        assert_eq!(b.delay(40), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn returns_value_once_ready() {
        let calls = AtomicU32::new(0);
        let outcome: Result<_, ()> = poll_until(fast(), &InterruptFlag::new(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok((n >= 2).then_some(n)) }
        })
        .await;
        assert_eq!(outcome, Ok(PollOutcome::Ready(2)));
    }

    #[tokio::test]
    async fn times_out() {
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(2), Duration::from_millis(10));
        let outcome: Result<PollOutcome<()>, ()> =
            poll_until(backoff, &InterruptFlag::new(), || async { Ok(None) }).await;
        assert_eq!(outcome, Ok(PollOutcome::TimedOut));
    }

    #[tokio::test]
    async fn stops_on_interrupt() {
        let flag = InterruptFlag::new();
        flag.raise();
        let outcome: Result<PollOutcome<()>, ()> =
            poll_until(fast(), &flag, || async { Ok(None) }).await;
        assert_eq!(outcome, Ok(PollOutcome::Interrupted));
    }

    #[tokio::test]
    async fn check_error_is_returned() {
        let outcome: Result<PollOutcome<()>, &str> =
            poll_until(fast(), &InterruptFlag::new(), || async { Err("boom") }).await;
        assert_eq!(outcome, Err("boom"));
    }
}
