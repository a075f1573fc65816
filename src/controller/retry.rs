//! Fixed-interval retries
//!
//! Every retry loop of the operator waits a constant interval between
//! attempts and stops after an attempt budget or a deadline. Both are
//! expressed as a [`backoff::backoff::Backoff`] so the loops themselves run
//! on [`backoff::future::retry`].

use crate::error::{Error, Result};
use backoff::backoff::Backoff;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::warn;

/// Constant interval bounded by an attempt cap or a deadline
#[derive(Debug, Clone)]
pub struct FixedInterval {
    interval: Duration,
    max_attempts: Option<usize>,
    timeout: Option<Duration>,
    attempts: usize,
    started: Instant,
}

impl FixedInterval {
    /// Stop after `attempts` tries in total
    pub fn with_attempts(interval: Duration, attempts: usize) -> Self {
        Self {
            interval,
            max_attempts: Some(attempts.max(1)),
            timeout: None,
            attempts: 0,
            started: Instant::now(),
        }
    }

    /// Stop when the next attempt would start after `timeout`
    pub fn with_deadline(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            timeout: Some(timeout),
            attempts: 0,
            started: Instant::now(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl Backoff for FixedInterval {
    fn reset(&mut self) {
        self.attempts = 0;
        self.started = Instant::now();
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if let Some(max) = self.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }
        if let Some(timeout) = self.timeout {
            if self.started.elapsed() + self.interval > timeout {
                return None;
            }
        }
        Some(self.interval)
    }
}

/// Run `op` until it succeeds, retrying errors accepted by `retryable`.
/// Returns the last error once the policy is exhausted.
pub async fn retry_if<T, F, Fut, P>(
    policy: FixedInterval,
    what: &str,
    retryable: P,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let retryable = &retryable;
    backoff::future::retry(policy, || {
        let attempt = op();
        async move {
            attempt.await.map_err(|e| {
                if retryable(&e) {
                    warn!("{} failed, retrying: {}", what, e);
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        }
    })
    .await
}

/// Retry optimistic concurrency conflicts only
pub async fn retry_on_conflict<T, F, Fut>(policy: FixedInterval, what: &str, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_if(policy, what, Error::is_conflict, op).await
}
