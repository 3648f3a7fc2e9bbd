//! Backoff policies for retryable failures.
//!
//! A [`RetryPolicy`] maps an attempt number to the delay the transaction
//! manager waits before the next attempt.

use rand::Rng;
use std::time::Duration;

/// Backoff policy carried by every retryable error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryPolicy {
    /// The same delay for every attempt.
    Fixed {
        /// Base delay.
        delay: Duration,
        /// Relative jitter in `[0, 1]`.
        jitter: f64,
    },
    /// Exponentially growing delay, capped at `max`.
    Exponential {
        /// Delay before the second attempt.
        initial: Duration,
        /// Upper bound before jitter is applied.
        max: Duration,
        /// Relative jitter in `[0, 1]`.
        jitter: f64,
        /// Growth factor between attempts.
        multiplier: f64,
    },
}

impl RetryPolicy {
    /// Retries without waiting.
    #[must_use]
    pub const fn retry_immediately() -> Self {
        Self::fixed(Duration::ZERO, 0.0)
    }

    /// Creates a fixed-delay policy.
    #[must_use]
    pub const fn fixed(delay: Duration, jitter: f64) -> Self {
        Self::Fixed { delay, jitter }
    }

    /// Creates an exponential backoff policy.
    #[must_use]
    pub const fn exponential(initial: Duration, max: Duration, jitter: f64, multiplier: f64) -> Self {
        Self::Exponential {
            initial,
            max,
            jitter,
            multiplier,
        }
    }

    /// Calculates the delay after the given (1-based) attempt failed.
    ///
    /// Attempt `0` is treated like attempt `1`.
    pub fn calc_duration(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed { delay, jitter } => apply_jitter(delay.as_secs_f64(), jitter),
            Self::Exponential {
                initial,
                max,
                jitter,
                multiplier,
            } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let base = initial.as_secs_f64() * multiplier.powi(exponent);
                apply_jitter(base.min(max.as_secs_f64()), jitter)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1), Duration::from_secs(120), 0.2, 1.6)
    }
}

fn apply_jitter(secs: f64, jitter: f64) -> Duration {
    let jitter = jitter.clamp(0.0, 1.0);
    if secs <= 0.0 || !secs.is_finite() {
        return Duration::ZERO;
    }
    if jitter == 0.0 {
        return saturating_secs(secs);
    }
    let factor = 1.0 + jitter * rand::thread_rng().gen_range(-1.0..=1.0);
    saturating_secs((secs * factor).max(0.0))
}

fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
