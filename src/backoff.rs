//! Delay schedules for the readiness check.

use std::fmt::Debug;
use std::time::Duration;

/// A retry schedule: how many times to try, and how long to wait after a
/// given (zero-based) failed attempt.
pub trait Backoff: Send + Sync + Debug {
    fn max_attempts(&self) -> u32;
    fn delay(&self, attempt: u32) -> Duration;
}

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            ..Self::default()
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 1.5,
            max_delay: Duration::from_secs(30),
            max_attempts: 40,
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, attempt: u32) -> Duration {
        // powi overflows to inf long before i32::MAX, min() takes care of it
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base.as_secs_f64() * self.factor.powi(exp);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

#[derive(Debug, Clone)]
pub struct FixedBackoff {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Backoff for FixedBackoff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}
