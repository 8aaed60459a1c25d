use crate::actors::messages::{AppError, GenerationRequest};
use crate::actors::traits::GenerativeModel;
use crate::config::AppConfig;
use crate::error::FailureKind;
use crate::rate_limiter::RateLimiter;
use rand::Rng;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Shortest sleep while polling a full throttle window.
const MIN_SLOT_WAIT: Duration = Duration::from_millis(1);

/// Backoff schedule and per-attempt timeout for external calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, first try included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: config.retry_base_delay,
            max_delay: config.retry_max_delay,
            jitter: config.retry_jitter,
            timeout: config.request_timeout,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// `base * 2^(attempt - 1)`, capped at `max_delay`. With jitter the delay is
    /// drawn uniformly from `[d/2, d]` so it never exceeds the cap.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        if self.jitter && !delay.is_zero() {
            let half = delay / 2;
            let spread = rand::thread_rng().gen_range(0..=(delay - half).as_millis() as u64);
            half + Duration::from_millis(spread)
        } else {
            delay
        }
    }

    pub fn budget(&self) -> Budget {
        Budget {
            max_attempts: self.max_attempts,
            timeout: self.timeout,
        }
    }
}

/// Limits for one invocation. Operations can tighten the policy defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub max_attempts: u32,
    pub timeout: Duration,
}

impl Budget {
    pub fn single_attempt(timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            timeout,
        }
    }
}

/// Result of an invocation plus how much it cost to get there.
#[derive(Debug, Clone)]
pub struct InvocationOutcome<T> {
    pub result: Result<T, AppError>,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Wraps a [`GenerativeModel`] with timeout, classification-driven retry and
/// exponential backoff.
///
/// Only `TransientQuota` and `TransientNetwork` failures are retried; every
/// other failure is returned after the attempt that produced it.
pub struct ResilientInvoker<M: GenerativeModel + ?Sized> {
    model: Arc<M>,
    policy: RetryPolicy,
    limiter: Option<Mutex<RateLimiter>>,
}

impl<M: GenerativeModel + ?Sized> ResilientInvoker<M> {
    pub fn new(model: Arc<M>, policy: RetryPolicy) -> Self {
        Self {
            model,
            policy,
            limiter: None,
        }
    }

    /// Adds a client-side throttle.
    ///
    /// Each attempt waits for a free slot, bounded by the attempt timeout.
    /// The wait is not an attempt of its own; only a slot that stays refused
    /// past the timeout fails the attempt as `TransientQuota`.
    pub fn with_rate_limit(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(Mutex::new(limiter));
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn default_budget(&self) -> Budget {
        self.policy.budget()
    }

    /// Invokes the model and returns its raw text.
    pub async fn invoke(&self, request: &GenerationRequest, budget: Budget) -> InvocationOutcome<String> {
        self.invoke_parsed(request, budget, |raw| Ok(raw.to_string()))
            .await
    }

    /// Invokes the model and decodes the answer with `parse`.
    ///
    /// A parse failure is classified like any other failure, so a
    /// `MalformedResponse` from `parse` ends the loop immediately.
    pub async fn invoke_parsed<T, F>(
        &self,
        request: &GenerationRequest,
        budget: Budget,
        parse: F,
    ) -> InvocationOutcome<T>
    where
        F: Fn(&str) -> Result<T, AppError> + Send + Sync,
    {
        let started = Instant::now();
        let max_attempts = budget.max_attempts.max(1);
        let task = request.task.label();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self.attempt(request, budget.timeout).await.and_then(|raw| parse(&raw));

            match result {
                Ok(value) => {
                    debug!(task, attempt, "invocation succeeded");
                    return InvocationOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    };
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    // Never retry before the throttle could admit the call.
                    let delay = self.policy.delay_for(attempt).max(self.slot_wait(task));
                    warn!(
                        task,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if err.is_retryable() {
                        error!(task, attempts = attempt, error = %err, "retries exhausted");
                    } else {
                        warn!(task, attempt, error = %err, "non-retryable failure");
                    }
                    return InvocationOutcome {
                        result: Err(err),
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    };
                }
            }
        }
    }

    async fn attempt(&self, request: &GenerationRequest, limit: Duration) -> Result<String, AppError> {
        self.wait_for_slot(request.task.label(), limit).await?;
        timeout(limit, self.model.generate(request.clone())).await?
    }

    /// Waits up to `limit` for a throttle slot on `key`.
    ///
    /// A slot that does not free up in time is a `TransientQuota` failure and
    /// the model is never called for it.
    async fn wait_for_slot(&self, key: &str, limit: Duration) -> Result<(), AppError> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };
        let deadline = Instant::now() + limit;

        loop {
            let wait = {
                let mut limiter = limiter.lock().unwrap_or_else(PoisonError::into_inner);
                if limiter.check(key) {
                    return Ok(());
                }
                limiter.retry_after(key).max(MIN_SLOT_WAIT)
            };

            if Instant::now() + wait > deadline {
                return Err(AppError::from_failure(
                    FailureKind::TransientQuota,
                    format!(
                        "client rate limit reached for '{}', next slot in {}ms",
                        key,
                        wait.as_millis()
                    ),
                ));
            }
            debug!(key, wait_ms = wait.as_millis() as u64, "waiting for throttle slot");
            tokio::time::sleep(wait).await;
        }
    }

    /// Time until the throttle admits another call for `key`. Zero without a throttle.
    fn slot_wait(&self, key: &str) -> Duration {
        self.limiter
            .as_ref()
            .map(|limiter| {
                limiter
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retry_after(key)
            })
            .unwrap_or_default()
    }
}
