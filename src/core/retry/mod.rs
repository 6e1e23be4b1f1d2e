//! # Retry Module
//!
//! One bounded-retry combinator for every suspension point: metadata reads,
//! each sanitization stage, and placing a replacement. Destroying an
//! original is never wrapped.
//!
//! ## Policy
//! - Up to `max_attempts` calls (default 3)
//! - Fixed or capped exponential delay between calls
//! - Only errors whose [`Classify::is_transient`] is true are retried
//! - A tripped [`CancellationToken`] stops before the next call and
//!   interrupts the delay

mod cancel;

pub use cancel::CancellationToken;

use crate::error::{Classify, FailureReason};
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};
use tracing::warn;

/// Sleep granularity while waiting between attempts
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Delay between two attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayPolicy {
    /// The same delay every time
    Fixed(Duration),
    /// `base * 2^(n-1)` after the n-th failure, never more than `cap`
    Exponential { base: Duration, cap: Duration },
}

impl DelayPolicy {
    /// Delay after `failed_attempts` failures (1-based)
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        match *self {
            DelayPolicy::Fixed(delay) => delay,
            DelayPolicy::Exponential { base, cap } => {
                let shift = failed_attempts.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << shift).min(cap)
            }
        }
    }
}

/// How hard to try before giving up on a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: DelayPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: DelayPolicy::Exponential {
                base: Duration::from_millis(200),
                cap: Duration::from_secs(2),
            },
        }
    }
}

impl RetryPolicy {
    /// `max_attempts` tries with no delay; handy for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: DelayPolicy::Fixed(Duration::ZERO),
        }
    }
}

/// A value produced by a retried operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    /// Calls made, including the successful one
    pub attempts: u32,
}

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// The last error, after `attempts` calls
    Failed { error: E, attempts: u32 },
    /// Cancellation was requested before the operation succeeded
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Failed { attempts, .. } | RetryError::Cancelled { attempts } => *attempts,
        }
    }
}

impl<E: Classify> RetryError<E> {
    pub fn reason(&self) -> FailureReason {
        match self {
            RetryError::Failed { error, .. } => error.reason(),
            RetryError::Cancelled { .. } => FailureReason::Cancelled,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Failed { error, attempts } => {
                write!(f, "{} (after {} attempt(s))", error, attempts)
            }
            RetryError::Cancelled { .. } => f.write_str("cancelled"),
        }
    }
}

/// Call `operation` until it succeeds, fails permanently, runs out of
/// attempts, or `cancel` is tripped.
///
/// `on_retry` sees each transient failure that will be followed by another
/// attempt; it is how retries reach logs and progress listeners without
/// ever reaching the failure report.
pub fn retry<T, E, F, R>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut on_retry: R,
    mut operation: F,
) -> Result<Retried<T>, RetryError<E>>
where
    E: Classify + fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
    R: FnMut(u32, &E),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts: attempt });
        }
        attempt += 1;

        match operation(attempt) {
            Ok(value) => {
                return Ok(Retried {
                    value,
                    attempts: attempt,
                })
            }
            Err(error) if error.is_transient() && attempt < max_attempts => {
                let delay = policy.delay.delay_after(attempt);
                warn!(
                    "{} failed on attempt {}/{}: {}; retrying in {}ms",
                    label,
                    attempt,
                    max_attempts,
                    error,
                    delay.as_millis()
                );
                on_retry(attempt, &error);
                if !sleep_unless_cancelled(delay, cancel) {
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
            }
            Err(error) => {
                return Err(RetryError::Failed {
                    error,
                    attempts: attempt,
                })
            }
        }
    }
}

/// Returns false when cancelled before `delay` elapsed
fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(CANCEL_POLL.min(deadline - now));
    }
}
