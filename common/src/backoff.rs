//! Bounded exponential retry intervals.

use core::time::Duration;

const DEFAULT_MIN: Duration = Duration::from_secs(1);
const DEFAULT_MAX: Duration = Duration::from_secs(100);
const DEFAULT_FACTOR: f64 = 2.0;

/// Generates `min * factor^attempt`, clamped to `max`.
///
/// Each call to [`BackoffPolicy::next`] advances the attempt counter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    min: Duration,
    max: Duration,
    factor: f64,
    attempt: u32,
}

impl BackoffPolicy {
    /// Build a policy; zero durations and non-positive factors fall back to
    /// 1s / 100s / 2.
    #[must_use]
    pub fn new(min: Duration, max: Duration, factor: f64) -> Self {
        let min = if min.is_zero() { DEFAULT_MIN } else { min };
        let max = if max.is_zero() { DEFAULT_MAX } else { max };
        let factor = if factor > 0.0 && factor.is_finite() {
            factor
        } else {
            DEFAULT_FACTOR
        };
        Self {
            min,
            max: max.max(min),
            factor,
            attempt: 0,
        }
    }

    /// The next interval to wait.
    pub fn next(&mut self) -> Duration {
        let exponent = i32::try_from(self.attempt).unwrap_or(i32::MAX);
        self.attempt = self.attempt.saturating_add(1);

        let secs = self.min.as_secs_f64() * self.factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::try_from_secs_f64(secs).map_or(self.max, |d| d.min(self.max))
    }

    /// Start over from `min`.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of intervals handed out since construction or the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MIN, DEFAULT_MAX, DEFAULT_FACTOR)
    }
}
