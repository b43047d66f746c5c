use serde::Deserialize;

use crate::shared::ValidationError;

/// Settings controlling how long and how often the oracle polls the bus.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CollectorConfig {
    /// Default upper bound, in milliseconds, for collecting the expected messages of a scenario.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Pause, in milliseconds, between two polls of the bus.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl CollectorConfig {
    /// Default collect timeout in milliseconds.
    pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

    /// Default poll interval in milliseconds.
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

    /// Validates that both durations are non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.timeout_ms == 0 {
            return Err(ValidationError::must_be_positive("collector.timeout_ms"));
        }

        if self.poll_interval_ms == 0 {
            return Err(ValidationError::must_be_positive(
                "collector.poll_interval_ms",
            ));
        }

        Ok(())
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    CollectorConfig::DEFAULT_TIMEOUT_MS
}

fn default_poll_interval_ms() -> u64 {
    CollectorConfig::DEFAULT_POLL_INTERVAL_MS
}
