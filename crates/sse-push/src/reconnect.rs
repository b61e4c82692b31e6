//! Optional delay between a transport failure and the retry attempt.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff applied before each automatic reconnect.
///
/// The retry budget itself is owned by the connection state machine; this
/// only spaces the attempts out.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Multiplier applied per consecutive failure.
    pub factor: f64,
    /// Random jitter factor (0.0–1.0).
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.initial_delay.is_zero() {
            return Err("Initial reconnect delay must be > 0".to_string());
        }
        if self.max_delay < self.initial_delay {
            return Err("Max reconnect delay must be >= initial reconnect delay".to_string());
        }
        if self.factor < 1.0 || !self.factor.is_finite() {
            return Err("Backoff factor must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) || !self.jitter.is_finite() {
            return Err("Jitter must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }

    /// Delay before the retry that follows the `failures`-th consecutive
    /// failure (1-based).
    pub(crate) fn delay_for(&self, failures: u32) -> Duration {
        let initial = self.initial_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        let exponent = self.factor.powf(f64::from(failures.saturating_sub(1)));
        let base = (initial * exponent).min(max);

        if self.jitter == 0.0 {
            return Duration::from_secs_f64(base);
        }

        let randomized = rand::rng().random_range(0.0..=base);
        let blended = base * (1.0 - self.jitter) + randomized * self.jitter;
        Duration::from_secs_f64(blended)
    }
}
