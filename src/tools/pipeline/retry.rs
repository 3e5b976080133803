use crate::config::RetryConfig;
use crate::error::ToolError;
use std::time::Duration;

/// Bounded retry with exponential backoff for transiently failing tools.
///
/// Only failures classified [`ToolError::Transient`] are eligible; anything
/// else propagates on the first attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Whether `attempt` (1-based) may be followed by another try for this
    /// error.
    pub fn should_retry(&self, attempt: u32, error: &anyhow::Error) -> bool {
        if attempt >= self.config.max_attempts {
            return false;
        }
        error
            .downcast_ref::<ToolError>()
            .is_some_and(ToolError::is_transient)
    }

    /// Delay before the attempt after `attempt`: base doubled per completed
    /// attempt, capped at the configured maximum.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .config
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.max_delay_ms);
        Duration::from_millis(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
