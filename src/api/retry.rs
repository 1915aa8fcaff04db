use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;


/// Attempt ceiling plus exponential backoff, shared by every retrying call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Retry immediately, e.g. when the next attempt uses a different token.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before the retry that follows the zero-based `attempt`: the base
    /// delay doubled per attempt, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether another attempt is allowed after the zero-based `attempt`.
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Run `op` until it succeeds, `should_retry` rejects the error, or the
    /// attempts run out. The last error is returned.
    pub async fn run<T, E, F, Fut, P>(&self, op_name: &str, op: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: Fn(&E) -> bool,
    {
        self.run_with(op_name, op, |e, delay| should_retry(e).then_some(delay))
            .await
    }

    /// Like [`run`](Self::run), but `retry_delay` picks the wait itself. It
    /// gets the failed attempt's error and the policy delay, and returns
    /// `None` to give up.
    pub async fn run_with<T, E, F, Fut, P>(&self, op_name: &str, mut op: F, retry_delay: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: Fn(&E, Duration) -> Option<Duration>,
    {
        let mut attempt = 0;
        loop {
            let e = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            let delay = if self.can_retry(attempt) {
                retry_delay(&e, self.delay_for(attempt))
            } else {
                None
            };
            let Some(delay) = delay else { return Err(e) };
            warn!(
                op = op_name,
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Retrying"
            );
            if !delay.is_zero() {
                sleep(delay).await;
            }
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}
