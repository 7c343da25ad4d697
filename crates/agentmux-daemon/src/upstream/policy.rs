//! Backoff between upstream (re)connect attempts.

use std::time::Duration;

use agentmux_core::config::ReconnectConfig;

/// Exponential backoff, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Growth factor per consecutive failure; never below 1.
    pub multiplier: f64,
    /// `None` keeps the agent restarting forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier.max(1.0),
            max_attempts: config.max_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0 is the first retry).
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let grown = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let ceiling = self.max_delay.as_millis() as f64;
        Duration::from_millis(grown.min(ceiling) as u64)
    }

    /// False once `attempt` failures have used up the budget.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}
