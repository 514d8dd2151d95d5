use std::time::Duration;

use serde::Deserialize;

/// Retry schedule for transient database failures inside a worker.
///
/// After each failed attempt the delay is multiplied by `backoff_multiplier`,
/// capped at `max_delay_ms`. Attempts are bounded; on exhaustion the job is
/// marked failed and the worker moves on.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry.
    ///
    /// Specified in milliseconds for serialization compatibility.
    /// Default: 1000ms (1 second)
    #[serde(default = "default_initial_delay_ms", rename = "initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries.
    ///
    /// The backoff schedule will not exceed this delay.
    /// Default: 60000ms (60 seconds)
    #[serde(default = "default_max_delay_ms", rename = "max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier applied to the delay after each failed attempt.
    ///
    /// Must be >= 1.0. Default: 2.0
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Maximum number of attempts, counting the first one.
    ///
    /// Default: 3
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetryConfig {
    /// Returns the delay to sleep after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent as i32);
        let capped = delay.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Returns the initial retry delay as a [`Duration`].
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Returns the maximum retry delay as a [`Duration`].
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}
