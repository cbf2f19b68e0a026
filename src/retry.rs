//! The Retry Controller: backoff calculation, jitter, and the retry loop
//! itself. Fixed/exponential backoff with a multiplier, a max-delay cap,
//! and retryable-status classification, driven by an explicit attempts
//! count (`Attempts = 1` means "send once, never retry") plus an optional
//! max-elapsed-seconds abort condition.

use crate::error::Error;
use crate::model::{BackoffStrategy, Jitter, RetryPolicy};
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// How a single attempt concluded: distinguishes retryable from terminal
/// failures for both the retry decision and the results record. The
/// status-carrying variants keep the attempt's produced value alongside the
/// status so a terminal or exhausted outcome can still report what was
/// actually received.
#[derive(Debug, Clone)]
pub enum AttemptOutcome<T> {
    Succeeded(T),
    RetryableStatus(u16, T),
    TerminalStatus(u16, T),
    RetryableNetwork(String),
    RetryableTimeout(String),
    TerminalFailure(String),
}

/// Diagnostic record of one attempt, regardless of outcome.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub status: Option<u16>,
    pub delay_before_next: Option<Duration>,
    pub reason: String,
}

pub struct RetryOutcome<T> {
    pub result: Result<T, Error>,
    /// The value produced by the last attempt that returned one (a status
    /// plus whatever payload the caller's operation carries), even when
    /// `result` is `Err` — an exhausted or terminal non-2xx status still
    /// has a response to report.
    pub last_value: Option<T>,
    pub attempts: u32,
    pub history: Vec<AttemptRecord>,
}

fn status_is_listed(status: u16, retry_on_status: &[u16]) -> bool {
    retry_on_status.contains(&status)
}

/// Computes the delay before the retry that follows the attempt numbered
/// `attempt` (1-indexed: the delay before the *second* attempt, i.e. the
/// first retry, is `delay_for_attempt(policy, 1)`). For exponential
/// backoff the n-th retry's pre-jitter wait is `base * multiplier^(n-1)`,
/// so the first retry waits exactly `base`.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base_ms = policy.backoff_seconds * 1000.0;
    let exponent = attempt.saturating_sub(1).min(30);
    let raw_ms = match policy.backoff_strategy {
        BackoffStrategy::Fixed => base_ms,
        BackoffStrategy::Exponential => base_ms * policy.multiplier.powi(exponent as i32),
    };

    let capped_ms = match policy.max_backoff_seconds {
        Some(max) => raw_ms.min(max * 1000.0),
        None => raw_ms,
    };

    let jittered_ms = match policy.jitter {
        Jitter::None => capped_ms,
        Jitter::Full => fastrand::f64() * capped_ms,
        Jitter::Equal => capped_ms / 2.0 + fastrand::f64() * (capped_ms / 2.0),
    };

    Duration::from_millis(jittered_ms.max(0.0) as u64)
}

/// Runs `operation` until it succeeds, exhausts `policy.attempts`, hits a
/// non-retryable outcome, or exceeds `policy.max_elapsed_seconds`. `policy
/// == None` sends exactly once regardless of outcome (retries disabled).
pub async fn execute<F, Fut, T>(policy: Option<&RetryPolicy>, mut operation: F) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = AttemptOutcome<T>>,
{
    let start = Instant::now();
    let max_attempts = policy.map_or(1, |p| p.attempts);
    let mut history = Vec::new();

    for attempt in 1..=max_attempts {
        let outcome = operation(attempt).await;

        match outcome {
            AttemptOutcome::Succeeded(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    last_value: None,
                    attempts: attempt,
                    history,
                };
            }
            AttemptOutcome::TerminalStatus(status, value) => {
                history.push(AttemptRecord {
                    attempt,
                    status: Some(status),
                    delay_before_next: None,
                    reason: format!("status {status} is not retryable"),
                });
                return RetryOutcome {
                    result: Err(Error::runtime(format!("request failed with non-retryable status {status}"))),
                    last_value: Some(value),
                    attempts: attempt,
                    history,
                };
            }
            AttemptOutcome::TerminalFailure(reason) => {
                history.push(AttemptRecord {
                    attempt,
                    status: None,
                    delay_before_next: None,
                    reason: reason.clone(),
                });
                return RetryOutcome {
                    result: Err(Error::runtime(reason)),
                    last_value: None,
                    attempts: attempt,
                    history,
                };
            }
            retryable => {
                let (status, reason, value) = match retryable {
                    AttemptOutcome::RetryableStatus(status, v) => (Some(status), format!("status {status}"), Some(v)),
                    AttemptOutcome::RetryableNetwork(msg) => (None, msg, None),
                    AttemptOutcome::RetryableTimeout(msg) => (None, msg, None),
                    _ => unreachable!("non-retryable variants handled above"),
                };

                let is_last_attempt = attempt >= max_attempts;
                let Some(policy) = policy else {
                    history.push(AttemptRecord {
                        attempt,
                        status,
                        delay_before_next: None,
                        reason: reason.clone(),
                    });
                    return RetryOutcome {
                        result: Err(Error::runtime(reason)),
                        last_value: value,
                        attempts: attempt,
                        history,
                    };
                };

                if is_last_attempt {
                    history.push(AttemptRecord {
                        attempt,
                        status,
                        delay_before_next: None,
                        reason: reason.clone(),
                    });
                    return RetryOutcome {
                        result: Err(Error::runtime(format!(
                            "exhausted {max_attempts} attempt(s), last failure: {reason}"
                        ))),
                        last_value: value,
                        attempts: attempt,
                        history,
                    };
                }

                let delay = delay_for_attempt(policy, attempt);

                if let Some(max_elapsed) = policy.max_elapsed_seconds {
                    let projected = start.elapsed() + delay;
                    if projected.as_secs_f64() > max_elapsed {
                        history.push(AttemptRecord {
                            attempt,
                            status,
                            delay_before_next: None,
                            reason: reason.clone(),
                        });
                        return RetryOutcome {
                            result: Err(Error::runtime(format!(
                                "aborting retries: next attempt would exceed max elapsed {max_elapsed}s, last failure: {reason}"
                            ))),
                            last_value: value,
                            attempts: attempt,
                            history,
                        };
                    }
                }

                history.push(AttemptRecord {
                    attempt,
                    status,
                    delay_before_next: Some(delay),
                    reason,
                });
                sleep(delay).await;
            }
        }
    }

    unreachable!("loop always returns on its final iteration")
}

/// Classifies whether `status` should be retried under `policy`
/// (`RetryOnStatus` list only — 2xx/3xx are never routed through this
/// function by the executor).
#[must_use]
pub fn status_outcome<T>(status: u16, policy: &RetryPolicy, value: T) -> AttemptOutcome<T> {
    if status_is_listed(status, &policy.retry_on_status) {
        AttemptOutcome::RetryableStatus(status, value)
    } else {
        // Non-2xx statuses not on the retry list still complete the
        // attempt; the executor decides success/failure from the status
        // code itself, this controller only decides retry-or-stop.
        AttemptOutcome::Succeeded(value)
    }
}
