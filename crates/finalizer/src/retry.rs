//! Exponential backoff for conflicting writes, and cancellable sleeps.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Default number of write attempts.
const DEFAULT_STEPS: u32 = 4;
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(10);
const DEFAULT_FACTOR: f64 = 5.0;
const DEFAULT_JITTER: f64 = 0.1;

/// Bounded exponential backoff between conflicting writes.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictBackoff {
    /// Total number of write attempts, including the first.
    pub steps: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after every attempt.
    pub factor: f64,
    /// Up to this fraction of each delay is added at random.
    pub jitter: f64,
}

impl Default for ConflictBackoff {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEPS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            factor: DEFAULT_FACTOR,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl ConflictBackoff {
    /// Set the number of attempts.
    #[must_use]
    pub const fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    /// Set the initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the backoff factor.
    #[must_use]
    pub const fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Set the jitter fraction.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retrying after `attempt` failed writes, without jitter.
    ///
    /// `attempt` is 1-based; `base_delay(1)` is the initial delay.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.factor.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Delay before retrying after `attempt` failed writes, with jitter applied.
    ///
    /// Jitter is clamped to `[0, 1]`; a non-finite jitter is treated as none.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter.is_finite() || self.jitter <= 0.0 {
            return base;
        }

        let extra = rand::thread_rng().gen_range(0.0..=self.jitter.min(1.0));
        Duration::try_from_secs_f64(base.as_secs_f64() * (1.0 + extra)).unwrap_or(base)
    }
}

/// Sleep for `delay` unless `cancel` fires first.
///
/// Returns `false` if the sleep was cut short by cancellation.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}
