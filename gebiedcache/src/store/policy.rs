//! Retry and backoff policy for area fetches.
//!
//! A failed fetch is retried up to `max_retries` times within one attempt
//! sequence. The wait before retry `n` (1-based) comes from the policy; the
//! wait itself goes through a [`Delay`] so tests can skip it.
//!
//! # Example
//!
//! ```
//! use gebiedcache::store::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::default(); // 2 retries, 1s then 2s
//! assert_eq!(policy.max_attempts(), 3);
//! assert_eq!(policy.delay_for_retry(2), Some(Duration::from_secs(2)));
//! assert_eq!(policy.delay_for_retry(3), None);
//! ```

use std::time::Duration;

use crate::source::BoxFuture;

// =============================================================================
// Retry Policy Constants
// =============================================================================

/// Default number of retries after the first failed attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default linear backoff step (retry `n` waits `n * step`).
pub const DEFAULT_BACKOFF_STEP_MS: u64 = 1000;

/// Default maximum delay for exponential backoff (30 seconds).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 30;

/// Default multiplier for exponential backoff.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// How a failed fetch is retried.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    /// No retries - fail after the first attempt.
    None,

    /// Constant delay between attempts.
    Fixed {
        /// Retries after the initial attempt.
        max_retries: u32,
        /// Delay before every retry.
        delay: Duration,
    },

    /// Delay grows linearly: retry `n` waits `n * step`.
    Linear {
        /// Retries after the initial attempt.
        max_retries: u32,
        /// Delay unit.
        step: Duration,
    },

    /// Delay multiplies after each failure, up to a cap.
    ExponentialBackoff {
        /// Retries after the initial attempt.
        max_retries: u32,
        /// Delay before the first retry.
        initial_delay: Duration,
        /// Maximum delay cap.
        max_delay: Duration,
        /// Multiplier applied per retry (typically 2.0).
        multiplier: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(DEFAULT_MAX_RETRIES, Duration::from_millis(DEFAULT_BACKOFF_STEP_MS))
    }
}

impl RetryPolicy {
    /// Creates a linear backoff policy.
    pub fn linear(max_retries: u32, step: Duration) -> Self {
        Self::Linear { max_retries, step }
    }

    /// Creates a fixed-delay policy.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self::Fixed { max_retries, delay }
    }

    /// Creates an exponential backoff policy with default cap and multiplier.
    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        Self::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    /// Retries allowed after the initial attempt.
    pub fn max_retries(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Fixed { max_retries, .. }
            | Self::Linear { max_retries, .. }
            | Self::ExponentialBackoff { max_retries, .. } => *max_retries,
        }
    }

    /// Total attempts including the initial one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries().saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// Returns `None` once `retry` exceeds the retry budget.
    pub fn delay_for_retry(&self, retry: u32) -> Option<Duration> {
        if retry == 0 || retry > self.max_retries() {
            return None;
        }
        match self {
            Self::None => None,
            Self::Fixed { delay, .. } => Some(*delay),
            Self::Linear { step, .. } => Some(step.saturating_mul(retry)),
            Self::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let factor = multiplier.powi((retry - 1) as i32);
                let delay_ms = initial_delay.as_millis() as f64 * factor;
                let capped = delay_ms.min(max_delay.as_millis() as f64);
                Some(Duration::from_millis(capped as u64).min(*max_delay))
            }
        }
    }

    /// Returns a copy with the retry budget replaced.
    pub fn with_max_retries(&self, retries: u32) -> Self {
        match self.clone() {
            Self::None if retries == 0 => Self::None,
            Self::None => Self::linear(retries, Duration::from_millis(DEFAULT_BACKOFF_STEP_MS)),
            Self::Fixed { delay, .. } => Self::fixed(retries, delay),
            Self::Linear { step, .. } => Self::linear(retries, step),
            Self::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => Self::ExponentialBackoff {
                max_retries: retries,
                initial_delay,
                max_delay,
                multiplier,
            },
        }
    }
}

/// Waits out a backoff delay.
pub trait Delay: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

impl Delay for TokioDelay {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Returns immediately. For tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl Delay for NoDelay {
    fn sleep(&self, _duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(futures::future::ready(()))
    }
}
