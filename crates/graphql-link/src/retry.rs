//! Retry policy and the retry link.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::NetworkError;
use crate::link::{Forward, Link, LinkResult};
use crate::operation::Operation;

/// Context key holding the 1-based attempt number of the current pass.
pub const RETRY_ATTEMPT_KEY: &str = "graphql_link.retry.attempt";

/// Retry decision result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after a delay.
    RetryAfter(Duration),
    /// Do not retry.
    DoNotRetry,
}

/// Retry strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Never retry.
    Never,
    /// Retry only for idempotent operations.
    IdempotentOnly,
    /// Retry regardless of idempotency.
    #[default]
    Always,
}

/// Exponential backoff with optional full jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Maximum delay between attempts.
    pub max: Duration,
    /// Growth factor per retry.
    pub multiplier: f64,
    /// Pick the delay uniformly from `[0, computed]`.
    pub jitter: bool,
}

impl ExponentialBackoff {
    /// Backoff doubling from `initial` up to `max`, with jitter.
    #[must_use]
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Set the multiplier.
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay after the `attempt`-th failed attempt (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = if base.is_finite() {
            base.clamp(0.0, self.max.as_secs_f64())
        } else {
            self.max.as_secs_f64()
        };

        let secs = if self.jitter {
            rand::thread_rng().gen_range(0.0..=capped)
        } else {
            capped
        };
        Duration::try_from_secs_f64(secs).unwrap_or(self.max)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(300), Duration::from_secs(30))
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    pub max_attempts: u32,
    /// Delay schedule.
    pub backoff: ExponentialBackoff,
    /// Retry strategy.
    pub strategy: RetryStrategy,
    /// Also retry responses carrying GraphQL errors.
    pub retry_graphql_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: ExponentialBackoff::default(),
            strategy: RetryStrategy::Always,
            retry_graphql_errors: false,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    #[must_use]
    pub fn never() -> Self {
        Self {
            max_attempts: 1,
            strategy: RetryStrategy::Never,
            ..Self::default()
        }
    }

    /// Decide whether the `attempt`-th attempt (1-based) may be followed by
    /// another one. A server-supplied `retry_after` replaces the backoff
    /// delay, capped at the backoff maximum.
    #[must_use]
    pub fn decide(
        &self,
        attempt: u32,
        idempotent: bool,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::DoNotRetry;
        }

        match self.strategy {
            RetryStrategy::Never => RetryDecision::DoNotRetry,
            RetryStrategy::IdempotentOnly if !idempotent => RetryDecision::DoNotRetry,
            _ => {
                let delay = retry_after.map_or_else(
                    || self.backoff.delay(attempt),
                    |requested| requested.min(self.backoff.max),
                );
                RetryDecision::RetryAfter(delay)
            }
        }
    }
}

type RetryPredicate = dyn Fn(&NetworkError, &Operation, u32) -> bool + Send + Sync;

/// Link re-issuing operations after transient network failures.
///
/// The last outcome is returned unchanged once attempts are exhausted or the
/// failure is not retryable. The backoff sleep is part of the operation
/// future, so dropping the future cancels a pending retry.
#[derive(Clone)]
pub struct RetryLink {
    policy: RetryPolicy,
    retry_if: Option<Arc<RetryPredicate>>,
}

impl RetryLink {
    /// Retry link using [`NetworkError::is_retryable`] as the predicate.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retry_if: None,
        }
    }

    /// Replace the predicate deciding which network errors are retried.
    /// Receives the error, the operation and the attempt that failed.
    #[must_use]
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&NetworkError, &Operation, u32) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    /// Policy in use.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn should_retry(&self, err: &NetworkError, operation: &Operation, attempt: u32) -> bool {
        if err.is_cancelled() {
            return false;
        }
        self.retry_if.as_ref().map_or_else(
            || err.is_retryable(),
            |predicate| predicate(err, operation, attempt),
        )
    }
}

impl fmt::Debug for RetryLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryLink")
            .field("policy", &self.policy)
            .field("custom_predicate", &self.retry_if.is_some())
            .finish()
    }
}

#[async_trait]
impl Link for RetryLink {
    fn name(&self) -> &str {
        "retry"
    }

    async fn request(&self, mut operation: Operation, forward: Forward) -> LinkResult {
        let mut attempt: u32 = 1;
        loop {
            operation.context_mut().insert(RETRY_ATTEMPT_KEY, attempt);
            let outcome = forward.run(operation.clone()).await;

            let idempotent = operation.is_idempotent();
            let decision = match &outcome {
                Ok(response) if self.policy.retry_graphql_errors && !response.is_ok() => {
                    self.policy.decide(attempt, idempotent, None)
                }
                Err(err) if self.should_retry(err, &operation, attempt) => {
                    self.policy.decide(attempt, idempotent, err.retry_after())
                }
                Ok(_) | Err(_) => RetryDecision::DoNotRetry,
            };

            match decision {
                RetryDecision::RetryAfter(delay) => {
                    debug!(
                        operation = operation.display_name(),
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "retrying GraphQL operation"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::DoNotRetry => return outcome,
            }
        }
    }
}
