//! Retry executor with exponential backoff and optional jitter.
//!
//! Callers pick a [`RetryPolicy`] and call [`execute`] around the operation
//! directly. Delays use `tokio::time::sleep`, so a waiting turn never blocks
//! other sessions.

use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use ragchat_core::error::{Classify, ErrorKind};
use thiserror::Error;
use tracing::{error, warn};

/// How often and how patiently to retry.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total tries, first attempt included. Never below 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Scale each delay by a uniform factor in `[0.5, 1.0]`.
    pub jitter_enabled: bool,
    pub retryable_kinds: HashSet<ErrorKind>,
}

impl RetryPolicy {
    /// Policy for inference calls. Tolerant of a cold-starting local model.
    pub fn inference() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_enabled: true,
            retryable_kinds: HashSet::from([
                ErrorKind::Connection,
                ErrorKind::Timeout,
                ErrorKind::RateLimited,
                ErrorKind::Upstream,
            ]),
        }
    }

    /// Policy for passage-index operations.
    pub fn storage() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 1.5,
            jitter_enabled: true,
            retryable_kinds: HashSet::from([ErrorKind::Storage, ErrorKind::Timeout]),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter_enabled = false;
        self
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable_kinds.contains(&kind)
    }

    /// Un-jittered delay after the failed attempt at `attempt_index` (0-based):
    /// `min(base * multiplier^index, max)`.
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let exponent = i32::try_from(attempt_index).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    fn sleep_for(&self, attempt_index: u32) -> Duration {
        let delay = self.delay_for(attempt_index);
        if self.jitter_enabled {
            delay.mul_f64(jitter_factor())
        } else {
            delay
        }
    }
}

fn jitter_factor() -> f64 {
    rand::rng().random_range(0.5..=1.0)
}

/// One failed attempt, as seen by [`execute_traced`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Sleep taken before the next attempt; `None` when none followed.
    pub delay: Option<Duration>,
    pub error: String,
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// The operation failed with an error the policy does not retry.
    #[error("{0}")]
    NonRetryable(E),
}

impl<E> RetryError<E> {
    /// The underlying error of the last attempt.
    pub fn last_error(&self) -> &E {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::NonRetryable(e) => e,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::NonRetryable(e) => e,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

impl<E: Classify> Classify for RetryError<E> {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Exhausted { .. } => ErrorKind::RetryExhausted,
            Self::NonRetryable(e) => e.kind(),
        }
    }
}

/// Run `operation` under `policy`.
pub async fn execute<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + Display,
{
    execute_traced(policy, operation).await.0
}

/// Like [`execute`], also returning a record of every failed attempt.
pub async fn execute_traced<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> (Result<T, RetryError<E>>, Vec<RetryAttempt>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = Vec::new();
    let mut index = 0;

    loop {
        let attempt = index + 1;
        let err = match operation().await {
            Ok(value) => return (Ok(value), attempts),
            Err(e) => e,
        };

        let kind = err.kind();
        if !policy.is_retryable(kind) {
            attempts.push(RetryAttempt {
                attempt,
                delay: None,
                error: err.to_string(),
            });
            return (Err(RetryError::NonRetryable(err)), attempts);
        }

        if attempt == max_attempts {
            error!(attempts = attempt, kind = %kind, "All retry attempts failed: {err}");
            attempts.push(RetryAttempt {
                attempt,
                delay: None,
                error: err.to_string(),
            });
            return (
                Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                }),
                attempts,
            );
        }

        let delay = policy.sleep_for(index);
        warn!(
            attempt,
            max_attempts,
            kind = %kind,
            delay_ms = delay.as_millis() as u64,
            "Attempt failed, retrying: {err}"
        );
        attempts.push(RetryAttempt {
            attempt,
            delay: Some(delay),
            error: err.to_string(),
        });
        tokio::time::sleep(delay).await;
        index += 1;
    }
}
