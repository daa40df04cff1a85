//! Retry stage with rate-limit aware backoff
//!
//! Decides whether a failed attempt is re-issued and how long to wait first.
//! Authentication failures are left to the recovery stage and mutations are
//! never re-issued.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::http::error::Classification;
use crate::link::{Link, SharedLink};
use crate::operation::{GraphQlResponse, OperationAttempt, OperationKind, Request};
use crate::Result;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// First rate-limit delay when the server gives no hint
    pub rate_limit_base_ms: u64,
    /// Growth factor between successive rate-limit delays
    pub rate_limit_multiplier: f64,
    /// Upper bound on a computed rate-limit delay
    pub rate_limit_max_ms: u64,
    /// Relative jitter applied to computed rate-limit delays (0.25 = ±25%)
    pub jitter: f64,
    /// Step of the linear backoff used for network and server failures
    pub linear_step_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            rate_limit_base_ms: 2_000,
            rate_limit_multiplier: 2.5,
            rate_limit_max_ms: 30_000,
            jitter: 0.25,
            linear_step_ms: 1_000,
        }
    }
}

/// Decision on whether to retry an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation after the specified delay
    Retry { delay: Duration },
    /// Surface the failure
    NoRetry,
}

impl RetryPolicy {
    /// Create a retry policy with a custom retry budget
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Disable jitter, mostly useful in tests
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    pub fn with_linear_step(mut self, step: Duration) -> Self {
        self.linear_step_ms = step.as_millis() as u64;
        self
    }

    /// Whether a failed attempt may be re-issued by this stage
    pub fn should_retry(&self, attempt: &OperationAttempt) -> bool {
        if attempt.operation().kind == OperationKind::Mutation {
            return false;
        }
        match attempt.classification() {
            Some(classification) if classification.is_retryable() => {
                attempt.attempt_number() <= self.max_retries
            }
            _ => false,
        }
    }

    /// Delay before re-issuing a failed attempt, jitter included
    pub fn delay_before_retry(&self, attempt: &OperationAttempt) -> Duration {
        match attempt.classification() {
            Some(Classification::RateLimited) => match attempt.retry_after_hint() {
                Some(hint) => hint,
                None => self.jittered(self.rate_limit_delay(attempt.attempt_number())),
            },
            _ => self.linear_delay(attempt.attempt_number()),
        }
    }

    /// Computed rate-limit delay before retry `n` (1-based), without jitter
    pub fn rate_limit_delay(&self, n: u32) -> Duration {
        let exponent = n.saturating_sub(1).min(64) as i32;
        let millis = self.rate_limit_base_ms as f64 * self.rate_limit_multiplier.powi(exponent);
        let capped = millis.min(self.rate_limit_max_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Linear delay before retry `n` (1-based)
    pub fn linear_delay(&self, n: u32) -> Duration {
        Duration::from_millis(self.linear_step_ms.saturating_mul(n as u64))
    }

    /// Combined decision for a failed attempt
    pub fn decide(&self, attempt: &OperationAttempt) -> RetryDecision {
        if self.should_retry(attempt) {
            RetryDecision::Retry {
                delay: self.delay_before_retry(attempt),
            }
        } else {
            RetryDecision::NoRetry
        }
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_millis((base.as_millis() as f64 * factor).max(0.0) as u64)
    }

    /// Validate retry configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.rate_limit_multiplier < 1.0 {
            return Err("Rate-limit multiplier must be at least 1.0".to_string());
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err("Jitter must be in [0, 1)".to_string());
        }
        if self.rate_limit_base_ms > self.rate_limit_max_ms {
            return Err("Rate-limit base delay exceeds the cap".to_string());
        }
        Ok(())
    }
}

/// Stage that re-issues retryable failures sequentially
pub struct RetryLink {
    inner: SharedLink,
    policy: RetryPolicy,
}

impl RetryLink {
    pub fn new(inner: SharedLink, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Link for RetryLink {
    async fn execute(&self, request: Request) -> Result<GraphQlResponse> {
        let mut request = request;
        loop {
            let error = match self.inner.execute(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            let Some(failure) = error.wire_failure() else {
                return Err(error);
            };
            let attempt = request.attempt.failed(failure);

            match self.policy.decide(&attempt) {
                RetryDecision::Retry { delay } => {
                    warn!(
                        operation = %attempt.operation().name(),
                        attempt = attempt.attempt_number(),
                        classification = %failure.classification(),
                        delay_ms = delay.as_millis() as u64,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    request = request.retry();
                }
                RetryDecision::NoRetry => {
                    debug!(
                        operation = %attempt.operation().name(),
                        attempt = attempt.attempt_number(),
                        classification = %failure.classification(),
                        "Not retrying"
                    );
                    return Err(error);
                }
            }
        }
    }
}
